//! HTTP-backed implementations of the pipeline's collaborator traits.

pub mod engine;
pub mod signer;
pub mod subgraph;

pub use engine::HttpProvingEngine;
pub use signer::{HttpSignatureVerifier, HttpSignerProvider};
pub use subgraph::SubgraphOracle;
