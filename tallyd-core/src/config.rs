//! Process-wide coordinator settings.
//!
//! Built once at startup (the server reads the environment) and passed by
//! reference into every component; nothing in the core reads ambient state.

use std::time::Duration;

use crate::error::{CoordinatorError, Result};

/// Immutable settings shared by the registry, scheduler, and ingestion.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Registry key namespace, separates test and production key spaces.
    pub namespace: String,
    /// Consecutive failures after which a poll is marked dead.
    pub max_retries: u32,
    /// Lifetime of the in-flight finalization lease.
    pub lease_ttl: Duration,
    /// Scheduler cycle interval.
    pub poll_interval: Duration,
    /// Upper bound on a single pipeline run.
    pub pipeline_timeout: Duration,
    /// Concurrent pipeline runs allowed across all polls.
    pub max_concurrent_pipelines: usize,
    /// Operator public key; PollCreated events must embed the same key.
    pub coordinator_public_key: String,
    /// Delegated signer used for scheduler-driven (unattended) runs.
    pub session_key_address: String,
    /// Authorization proof for the scheduler's session key.
    pub session_key_approval: String,
}

impl CoordinatorSettings {
    /// Reject configurations that break lease semantics: a lease that can
    /// expire while its pipeline is still running allows duplicate concurrent
    /// finalization of the same poll.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(CoordinatorError::Config(
                "registry namespace must not be empty".into(),
            ));
        }
        if self.max_concurrent_pipelines == 0 {
            return Err(CoordinatorError::Config(
                "max_concurrent_pipelines must be at least 1".into(),
            ));
        }
        if self.lease_ttl <= self.pipeline_timeout {
            return Err(CoordinatorError::Config(format!(
                "lease_ttl ({:?}) must exceed pipeline_timeout ({:?})",
                self.lease_ttl, self.pipeline_timeout
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> CoordinatorSettings {
        CoordinatorSettings {
            namespace: "test".into(),
            max_retries: 3,
            lease_ttl: Duration::from_secs(600),
            poll_interval: Duration::from_secs(60),
            pipeline_timeout: Duration::from_secs(300),
            max_concurrent_pipelines: 4,
            coordinator_public_key: "macipk.abc".into(),
            session_key_address: "0xsession".into(),
            session_key_approval: "approval".into(),
        }
    }

    #[test]
    fn valid_settings_pass() {
        assert!(settings().validate().is_ok());
    }

    #[test]
    fn lease_ttl_must_exceed_pipeline_timeout() {
        let mut s = settings();
        s.lease_ttl = Duration::from_secs(300);
        assert!(matches!(
            s.validate(),
            Err(CoordinatorError::Config(_))
        ));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut s = settings();
        s.max_concurrent_pipelines = 0;
        assert!(s.validate().is_err());
    }
}
