use std::time::Duration;

use thiserror::Error;

use crate::pipeline::PipelineStage;

#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// A non-terminal record with the same identity already exists.
    /// Non-fatal: callers treat registration as already handled.
    #[error("poll is already scheduled for finalization")]
    PollAlreadyScheduled,

    /// A terminal record exists; the poll was finalized earlier.
    #[error("poll has already been tallied")]
    PollAlreadyTallied,

    #[error("poll not found: {0}")]
    PollNotFound(String),

    #[error("unsupported chain id: {0}")]
    UnsupportedChain(u64),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("embedded coordinator key does not match the operator key")]
    UnauthorizedCoordinator,

    #[error("session key not found or deactivated: {0}")]
    SessionKeyNotFound(String),

    /// Another worker holds the in-flight lease. Not an error for the
    /// scheduler, which simply skips the poll this cycle.
    #[error("finalization lease for {0} is held elsewhere")]
    LeaseHeld(String),

    #[error("pipeline failed at {stage}: {message}")]
    Pipeline {
        stage: PipelineStage,
        message: String,
    },

    /// The run was cancelled at its deadline. Kept distinct from stage
    /// failures so callers can tell "the engine said no" from "we gave up".
    #[error("finalization attempt exceeded its {0:?} deadline")]
    Timeout(Duration),

    #[error("proving engine error: {0}")]
    Engine(String),

    #[error("ownership oracle error: {0}")]
    Oracle(String),

    #[error("signer service error: {0}")]
    Signer(String),

    #[error("registry storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CoordinatorError {
    /// Conflicts are absorbed by ingestion as "already handled".
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::PollAlreadyScheduled | Self::PollAlreadyTallied
        )
    }
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;
