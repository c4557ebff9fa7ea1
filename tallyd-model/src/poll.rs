//! Scheduled poll records and their identity key.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::chain::SupportedChain;

/// Voting mode of a poll. Opaque to the coordinator core; forwarded to the
/// proving engine which picks the matching proof strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VotingMode {
    Quadratic,
    NonQuadratic,
    Full,
}

impl VotingMode {
    /// Decode the numeric mode discriminant embedded in PollCreated events.
    pub fn from_event_param(raw: &str) -> Option<Self> {
        match raw {
            "0" => Some(Self::Quadratic),
            "1" => Some(Self::NonQuadratic),
            "2" => Some(Self::Full),
            _ => None,
        }
    }
}

/// Minimal immutable key identifying one poll instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PollIdentity {
    /// Address of the contract that deployed the poll.
    pub contract_address: String,
    /// Poll id, unique within contract and chain.
    pub poll_id: String,
    /// Network the poll is deployed on.
    pub chain: SupportedChain,
}

impl fmt::Display for PollIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}@{}",
            self.contract_address, self.poll_id, self.chain
        )
    }
}

/// One registry record per poll awaiting (or past) finalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledPoll {
    pub contract_address: String,
    pub poll_id: String,
    pub chain: SupportedChain,
    /// Block at which the poll contract was deployed, kept for replay.
    pub deployment_block_number: u64,
    pub voting_mode: VotingMode,
    /// Voting close time, epoch seconds. The poll is due once now >= end_date.
    pub end_date: i64,
    /// True once the accumulator trees have been merged.
    pub merged: bool,
    /// True once all proofs exist and results were submitted. Terminal.
    pub proofs_generated: bool,
    /// Consecutive failed finalization attempts.
    pub retry_count: u32,
    /// Excluded from automatic selection after exhausting retries.
    pub dead: bool,
}

impl ScheduledPoll {
    /// Build a fresh record for a newly discovered poll.
    pub fn new(
        identity: PollIdentity,
        deployment_block_number: u64,
        voting_mode: VotingMode,
        end_date: i64,
    ) -> Self {
        Self {
            contract_address: identity.contract_address,
            poll_id: identity.poll_id,
            chain: identity.chain,
            deployment_block_number,
            voting_mode,
            end_date,
            merged: false,
            proofs_generated: false,
            retry_count: 0,
            dead: false,
        }
    }

    pub fn identity(&self) -> PollIdentity {
        PollIdentity {
            contract_address: self.contract_address.clone(),
            poll_id: self.poll_id.clone(),
            chain: self.chain,
        }
    }

    /// Terminal: finalization completed, nothing left to do.
    pub fn is_finalized(&self) -> bool {
        self.proofs_generated
    }

    /// Eligible for scheduler selection at `now`.
    pub fn is_due(&self, now: i64) -> bool {
        !self.proofs_generated && !self.dead && self.end_date <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> PollIdentity {
        PollIdentity {
            contract_address: "0xaaa".into(),
            poll_id: "7".into(),
            chain: SupportedChain::Optimism,
        }
    }

    #[test]
    fn new_record_starts_unmerged_and_alive() {
        let poll = ScheduledPoll::new(identity(), 123, VotingMode::Quadratic, 1_700_000_000);
        assert!(!poll.merged);
        assert!(!poll.proofs_generated);
        assert_eq!(poll.retry_count, 0);
        assert!(!poll.dead);
    }

    #[test]
    fn due_only_after_end_date() {
        let poll = ScheduledPoll::new(identity(), 123, VotingMode::Quadratic, 1000);
        assert!(!poll.is_due(999));
        assert!(poll.is_due(1000));
        assert!(poll.is_due(1001));
    }

    #[test]
    fn finalized_and_dead_polls_are_never_due() {
        let mut poll = ScheduledPoll::new(identity(), 123, VotingMode::Full, 1000);
        poll.proofs_generated = true;
        assert!(!poll.is_due(2000));

        poll.proofs_generated = false;
        poll.dead = true;
        assert!(!poll.is_due(2000));
    }

    #[test]
    fn voting_mode_decodes_from_event_param() {
        assert_eq!(
            VotingMode::from_event_param("0"),
            Some(VotingMode::Quadratic)
        );
        assert_eq!(
            VotingMode::from_event_param("2"),
            Some(VotingMode::Full)
        );
        assert_eq!(VotingMode::from_event_param("9"), None);
    }
}
