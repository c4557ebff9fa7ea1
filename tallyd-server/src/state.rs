//! Shared application state handed to every handler.

use std::fmt;
use std::sync::Arc;

use tallyd_core::pipeline::traits::{OwnershipOracle, SignatureVerifier};
use tallyd_core::{Ingestor, PollRegistry, ProofPipeline, Scheduler};

use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<PollRegistry>,
    pub ingestor: Arc<Ingestor>,
    pub pipeline: Arc<ProofPipeline>,
    pub scheduler: Arc<Scheduler>,
    pub oracle: Arc<dyn OwnershipOracle>,
    pub verifier: Arc<dyn SignatureVerifier>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("namespace", &self.config.namespace)
            .finish_non_exhaustive()
    }
}
