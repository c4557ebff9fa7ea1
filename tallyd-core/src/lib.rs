//! Core library for the tallyd coordinator.
//!
//! Owns the persisted scheduled-poll registry and its lifecycle state
//! machine, the scheduler loop, and the merge -> generate -> submit proof
//! pipeline. The cryptographic engine, delegated-signer subsystem, and
//! chain-indexing oracle are consumed through the traits in
//! [`pipeline::traits`].

pub mod config;
pub mod error;
pub mod ingest;
pub mod pipeline;
pub mod registry;
pub mod scheduler;

pub use config::CoordinatorSettings;
pub use error::{CoordinatorError, Result};
pub use ingest::{decode_chain_event, IngestOutcome, Ingestor};
pub use pipeline::{EventSink, PipelineStage, ProofPipeline, RunOptions};
pub use registry::{
    Lease, MemoryRegistryStore, PollRegistry, RedisRegistryStore, RegistryStore,
};
pub use scheduler::Scheduler;
