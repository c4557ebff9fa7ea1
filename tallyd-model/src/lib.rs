//! Core data model definitions shared across tallyd crates.

pub mod chain;
pub mod events;
pub mod poll;
pub mod webhook;

pub use chain::SupportedChain;
pub use events::{
    GenerationProgress, Proof, ProofSessionEvent, ProofSessionRequest,
    TallyArtifact,
};
pub use poll::{PollIdentity, ScheduledPoll, VotingMode};
pub use webhook::{ChainEvent, PollCreatedEvent, PollCreatedPayload};
