//! Contracts for the external collaborators the pipeline drives.
//!
//! The cryptographic engine, the delegated-signer subsystem, and the
//! chain-indexing query service are consumed through these narrow seams; the
//! server crate provides HTTP-backed implementations.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use tallyd_model::{
    GenerationProgress, Proof, ProofSessionRequest, SupportedChain,
    TallyArtifact, VotingMode,
};

use crate::error::Result;

/// A scoped, revocable signer authorized for a bounded set of on-chain
/// actions. Obtained per pipeline run from a [`SignerProvider`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SignerClient: Send + Sync {
    /// Address the delegated signer acts as.
    fn address(&self) -> String;

    /// Publish a transaction on-chain; returns the transaction hash.
    async fn send_transaction(&self, to: &str, data: &str) -> Result<String>;
}

/// Delegated-signer (session key) subsystem.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SignerProvider: Send + Sync {
    /// Build a signer client from a session key and its authorization proof.
    /// Fails with `SessionKeyNotFound` when the key has been deactivated;
    /// this is the fast-fail gate before any chain interaction.
    async fn create_client(
        &self,
        session_key_address: &str,
        approval: &str,
        chain: SupportedChain,
    ) -> Result<Arc<dyn SignerClient>>;
}

/// The zero-knowledge proving engine.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProvingEngine: Send + Sync {
    /// Merge the poll's accumulator trees. Idempotent on the engine side:
    /// re-running a completed merge is wasteful but safe.
    async fn merge(
        &self,
        request: &ProofSessionRequest,
        signer: &(dyn SignerClient + 'static),
    ) -> Result<()>;

    /// Produce all proofs for the poll in batches. Each completed batch is
    /// pushed to `progress`; total batch count is poll-size dependent.
    async fn generate(
        &self,
        request: &ProofSessionRequest,
        voting_mode: VotingMode,
        progress: mpsc::Sender<GenerationProgress>,
    ) -> Result<(Vec<Proof>, Option<TallyArtifact>)>;

    /// Publish the computed results on-chain through the delegated signer.
    async fn submit(
        &self,
        request: &ProofSessionRequest,
        signer: &(dyn SignerClient + 'static),
        tally: &TallyArtifact,
    ) -> Result<TallyArtifact>;
}

/// Read-only chain-indexing query service used for ownership checks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OwnershipOracle: Send + Sync {
    /// Resolve the coordinator (owner) address of a poll.
    async fn fetch_poll_owner(
        &self,
        poll_id: &str,
        chain: SupportedChain,
    ) -> Result<String>;
}

/// Signature recovery, delegated to the external crypto service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    /// Recover the signer address of `signature` over `digest`.
    async fn recover_signer(&self, digest: &str, signature: &str) -> Result<String>;
}
