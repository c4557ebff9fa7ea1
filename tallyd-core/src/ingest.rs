//! Ingestion of chain-event notifications into the registry.
//!
//! The payload's parameter vector is resolved into a typed [`ChainEvent`]
//! once, here at the boundary; everything past this point works with decoded
//! fields. Duplicate or already-finalized notifications are swallowed.

use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use tallyd_model::webhook::{
    POLL_CREATED_COORDINATOR_INDEX, POLL_CREATED_END_DATE_INDEX,
    POLL_CREATED_MODE_INDEX, POLL_CREATED_PARAM_COUNT,
    POLL_CREATED_POLL_ID_INDEX,
};
use tallyd_model::{
    ChainEvent, PollCreatedEvent, PollCreatedPayload, PollIdentity,
    ScheduledPoll, SupportedChain, VotingMode,
};

use crate::error::{CoordinatorError, Result};
use crate::registry::PollRegistry;

/// Result of processing one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// A new registry record was created.
    Registered,
    /// The poll was already scheduled or already tallied; treated as success.
    AlreadyHandled,
    /// The event signature is not one the coordinator subscribes to.
    Skipped,
}

/// Decode and structurally validate a raw payload.
///
/// Exactly one versioned PollCreated schema is accepted; anything that does
/// not match it precisely is `MalformedPayload`, never a best-effort guess.
pub fn decode_chain_event(payload: &PollCreatedPayload) -> Result<ChainEvent> {
    if payload.event_signature != "PollCreated" {
        return Ok(ChainEvent::Unsupported {
            event_signature: payload.event_signature.clone(),
        });
    }

    if payload.event_params.len() != POLL_CREATED_PARAM_COUNT {
        return Err(CoordinatorError::MalformedPayload(format!(
            "PollCreated expects {} event params, got {}",
            POLL_CREATED_PARAM_COUNT,
            payload.event_params.len()
        )));
    }
    if payload.event_params.iter().any(|param| param.is_empty()) {
        return Err(CoordinatorError::MalformedPayload(
            "event params must be non-empty strings".into(),
        ));
    }
    if !payload.address.starts_with("0x") {
        return Err(CoordinatorError::MalformedPayload(
            "contract address must be 0x-prefixed".into(),
        ));
    }
    if !payload.transaction_hash.starts_with("0x") {
        return Err(CoordinatorError::MalformedPayload(
            "transaction hash must be 0x-prefixed".into(),
        ));
    }

    let chain = SupportedChain::from_chain_id(payload.chain_id)
        .ok_or(CoordinatorError::UnsupportedChain(payload.chain_id))?;

    let poll_id = &payload.event_params[POLL_CREATED_POLL_ID_INDEX];
    if poll_id.parse::<u64>().is_err() {
        return Err(CoordinatorError::MalformedPayload(format!(
            "poll id must be numeric, got {poll_id:?}"
        )));
    }

    let end_date = payload.event_params[POLL_CREATED_END_DATE_INDEX]
        .parse::<i64>()
        .map_err(|_| {
            CoordinatorError::MalformedPayload("end date must be epoch seconds".into())
        })?;

    let voting_mode =
        VotingMode::from_event_param(&payload.event_params[POLL_CREATED_MODE_INDEX])
            .ok_or_else(|| {
                CoordinatorError::MalformedPayload(format!(
                    "unknown voting mode discriminant {:?}",
                    payload.event_params[POLL_CREATED_MODE_INDEX]
                ))
            })?;

    Ok(ChainEvent::PollCreated(PollCreatedEvent {
        contract_address: payload.address.clone(),
        poll_id: poll_id.clone(),
        chain,
        coordinator_public_key: payload.event_params[POLL_CREATED_COORDINATOR_INDEX]
            .clone(),
        voting_mode,
        end_date,
        deployment_block_number: payload.block_number,
        block_timestamp: payload.block_timestamp,
        transaction_hash: payload.transaction_hash.clone(),
    }))
}

/// Converts validated notifications into registry records.
pub struct Ingestor {
    registry: Arc<PollRegistry>,
    /// Operator key; events embedding a different coordinator key are
    /// rejected before any registry mutation.
    coordinator_public_key: String,
}

impl fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ingestor").finish_non_exhaustive()
    }
}

impl Ingestor {
    pub fn new(registry: Arc<PollRegistry>, coordinator_public_key: String) -> Self {
        Self {
            registry,
            coordinator_public_key,
        }
    }

    pub async fn ingest(&self, payload: &PollCreatedPayload) -> Result<IngestOutcome> {
        let event = match decode_chain_event(payload)? {
            ChainEvent::PollCreated(event) => event,
            ChainEvent::Unsupported { event_signature } => {
                warn!("Skipping unsubscribed event signature {event_signature:?}");
                return Ok(IngestOutcome::Skipped);
            }
        };

        if event.coordinator_public_key != self.coordinator_public_key {
            return Err(CoordinatorError::UnauthorizedCoordinator);
        }

        let identity = PollIdentity {
            contract_address: event.contract_address.clone(),
            poll_id: event.poll_id.clone(),
            chain: event.chain,
        };
        let poll = ScheduledPoll::new(
            identity.clone(),
            event.deployment_block_number,
            event.voting_mode,
            event.end_date,
        );

        match self.registry.register(&poll).await {
            Ok(()) => {
                info!(
                    "Poll {} registered for finalization (ends at {})",
                    identity, poll.end_date
                );
                Ok(IngestOutcome::Registered)
            }
            Err(err) if err.is_conflict() => {
                warn!("Poll {} already handled: {}", identity, err);
                Ok(IngestOutcome::AlreadyHandled)
            }
            Err(err) => Err(err),
        }
    }
}
