//! Proof-session protocol: the duplex websocket contract between a
//! coordinator client and the pipeline.
//!
//! Per session the server emits, in order: at most one `merge-finished`,
//! zero or more `progress` records with strictly increasing batch index, at
//! most one `generate-finished`, at most one `submit-finished` — or an
//! `error` that terminates the workflow at the failing stage.

use serde::{Deserialize, Serialize};

use crate::chain::SupportedChain;

/// Start request carrying the parameters for all three pipeline stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofSessionRequest {
    pub contract_address: String,
    pub poll_id: String,
    pub chain: SupportedChain,
    /// Delegated signer (session key) address used for merge and submit.
    pub session_key_address: String,
    /// Authorization proof scoping the session key to this operation.
    pub approval: String,
}

/// One completed generation batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationProgress {
    /// Index of the batch that just completed, starting at 1.
    pub current: u32,
    /// Total batches for this poll; poll-size dependent, not fixed.
    pub total: u32,
}

/// A single zero-knowledge proof produced by the proving engine. The
/// coordinator treats the contents as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub public_inputs: Vec<String>,
    pub proof: String,
}

/// Derived tally output published on-chain during submit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyArtifact {
    pub tally_commitment: String,
    pub results: Vec<String>,
}

/// Server-to-client events of one proof session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ProofSessionEvent {
    MergeFinished {
        poll_id: String,
    },
    Progress(GenerationProgress),
    GenerateFinished {
        proofs: Vec<Proof>,
        tally: Option<TallyArtifact>,
    },
    SubmitFinished {
        tally: TallyArtifact,
    },
    Error {
        stage: String,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_kebab_case_tags() {
        let event = ProofSessionEvent::MergeFinished {
            poll_id: "3".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "merge-finished");

        let event = ProofSessionEvent::Progress(GenerationProgress {
            current: 2,
            total: 8,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "progress");
        assert_eq!(json["current"], 2);
    }

    #[test]
    fn error_event_names_the_failing_stage() {
        let event = ProofSessionEvent::Error {
            stage: "generate".into(),
            message: "batch 3 failed".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "error");
        assert_eq!(json["stage"], "generate");
    }
}
