//! Webhook ingestion payloads.
//!
//! Incoming notifications carry a flat `event_params` vector whose positions
//! are event-signature specific. Each supported signature gets its own
//! decoding schema, resolved once at the ingestion boundary into a
//! [`ChainEvent`] variant; nothing downstream probes raw positions.

use serde::{Deserialize, Serialize};

use crate::chain::SupportedChain;
use crate::poll::VotingMode;

/// Number of event parameters in the v1 PollCreated signature.
pub const POLL_CREATED_PARAM_COUNT: usize = 10;
/// Position of the poll id in the v1 PollCreated parameter vector.
pub const POLL_CREATED_POLL_ID_INDEX: usize = 0;
/// Position of the embedded coordinator public key.
pub const POLL_CREATED_COORDINATOR_INDEX: usize = 1;
/// Position of the voting end date (epoch seconds).
pub const POLL_CREATED_END_DATE_INDEX: usize = 3;
/// Position of the voting-mode discriminant.
pub const POLL_CREATED_MODE_INDEX: usize = 5;

/// Raw webhook payload as delivered by the indexing pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollCreatedPayload {
    /// Delivery id assigned by the indexer.
    pub id: String,
    pub transaction_hash: String,
    pub block_number: u64,
    pub block_timestamp: i64,
    pub log_index: u32,
    /// Emitting contract address.
    pub address: String,
    pub event_signature: String,
    pub chain_id: u64,
    /// Free-form chain name from the indexer; the numeric id is authoritative.
    pub chain: String,
    pub event_params: Vec<String>,
}

/// A structurally decoded PollCreated event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollCreatedEvent {
    pub contract_address: String,
    pub poll_id: String,
    pub chain: SupportedChain,
    pub coordinator_public_key: String,
    pub voting_mode: VotingMode,
    /// Voting close time decoded from the event, epoch seconds.
    pub end_date: i64,
    pub deployment_block_number: u64,
    pub block_timestamp: i64,
    pub transaction_hash: String,
}

/// Chain events the coordinator understands, keyed by event signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    PollCreated(PollCreatedEvent),
    /// Signature the coordinator does not subscribe to; skipped, not an error.
    Unsupported { event_signature: String },
}
