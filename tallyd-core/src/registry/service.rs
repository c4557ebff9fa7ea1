//! Poll registry service: lifecycle state machine over the persistence port.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use tallyd_model::{PollIdentity, ScheduledPoll};

use crate::error::{CoordinatorError, Result};
use crate::registry::store::RegistryStore;

/// Fencing token proving ownership of an in-flight finalization lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    token: String,
}

/// CRUD and deduplication over scheduled-poll records. One record per
/// (contract, poll, chain); the (merged, proofs_generated) pair only moves
/// forward, retry_count only grows on recorded failure.
pub struct PollRegistry {
    store: Arc<dyn RegistryStore>,
    namespace: String,
    max_retries: u32,
}

impl std::fmt::Debug for PollRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollRegistry")
            .field("namespace", &self.namespace)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl PollRegistry {
    pub fn new(store: Arc<dyn RegistryStore>, namespace: String, max_retries: u32) -> Self {
        Self {
            store,
            namespace,
            max_retries,
        }
    }

    /// Record key: `{namespace}:{chain}:{contract}:{poll_id}`.
    fn record_key(&self, identity: &PollIdentity) -> String {
        format!(
            "{}:{}:{}:{}",
            self.namespace, identity.chain, identity.contract_address, identity.poll_id
        )
    }

    /// Lease keys live under their own root so record prefix scans never see
    /// lock tokens.
    fn lease_key(&self, identity: &PollIdentity) -> String {
        format!(
            "lease:{}:{}:{}:{}",
            self.namespace, identity.chain, identity.contract_address, identity.poll_id
        )
    }

    fn record_prefix(&self) -> String {
        format!("{}:", self.namespace)
    }

    /// Create a new record. Idempotent at the workflow level: an existing
    /// non-terminal record yields `PollAlreadyScheduled`, a terminal one
    /// `PollAlreadyTallied`; neither mutates anything.
    pub async fn register(&self, poll: &ScheduledPoll) -> Result<()> {
        let identity = poll.identity();
        let key = self.record_key(&identity);

        if let Some(existing) = self.store.get(&key).await? {
            return Err(Self::classify_existing(&existing)?);
        }

        let serialized = serde_json::to_string(poll)?;
        if !self.store.put_if_absent(&key, &serialized).await? {
            // Lost a create race; classify whatever won.
            let existing = self.store.get(&key).await?.ok_or_else(|| {
                CoordinatorError::Storage("record vanished during registration".into())
            })?;
            return Err(Self::classify_existing(&existing)?);
        }

        info!("Registered poll {} for finalization", identity);
        Ok(())
    }

    fn classify_existing(serialized: &str) -> Result<CoordinatorError> {
        let existing: ScheduledPoll = serde_json::from_str(serialized)?;
        if existing.is_finalized() {
            Ok(CoordinatorError::PollAlreadyTallied)
        } else {
            Ok(CoordinatorError::PollAlreadyScheduled)
        }
    }

    pub async fn get(&self, identity: &PollIdentity) -> Result<ScheduledPoll> {
        let key = self.record_key(identity);
        let serialized = self
            .store
            .get(&key)
            .await?
            .ok_or_else(|| CoordinatorError::PollNotFound(identity.to_string()))?;
        Ok(serde_json::from_str(&serialized)?)
    }

    /// Non-terminal, non-dead records whose end date has passed, oldest-due
    /// first so the stalest poll is always attempted before fresher ones.
    pub async fn list_due(&self, now: i64) -> Result<Vec<ScheduledPoll>> {
        let values = self.store.values_with_prefix(&self.record_prefix()).await?;

        let mut due: Vec<ScheduledPoll> = values
            .iter()
            .filter_map(|raw| match serde_json::from_str::<ScheduledPoll>(raw) {
                Ok(poll) => Some(poll),
                Err(e) => {
                    warn!("Skipping unparseable registry record: {}", e);
                    None
                }
            })
            .filter(|poll| poll.is_due(now))
            .collect();

        due.sort_by_key(|poll| poll.end_date);
        Ok(due)
    }

    /// Monotonic: sets `merged`, no-op if already set.
    pub async fn mark_merged(&self, identity: &PollIdentity) -> Result<()> {
        let mut poll = self.get(identity).await?;
        if poll.merged {
            return Ok(());
        }
        poll.merged = true;
        self.put_record(&poll).await?;
        debug!("Poll {} marked merged", identity);
        Ok(())
    }

    /// Monotonic terminal transition: sets `proofs_generated` (and `merged`,
    /// which it implies). No-op if already finalized.
    pub async fn mark_finalized(&self, identity: &PollIdentity) -> Result<()> {
        let mut poll = self.get(identity).await?;
        if poll.proofs_generated {
            return Ok(());
        }
        poll.merged = true;
        poll.proofs_generated = true;
        self.put_record(&poll).await?;
        info!("Poll {} finalized", identity);
        Ok(())
    }

    /// Increment the failure counter; crossing the retry limit marks the
    /// record dead so it drops out of automatic selection. Returns the
    /// updated record so callers can surface the dead transition.
    pub async fn record_failure(&self, identity: &PollIdentity) -> Result<ScheduledPoll> {
        let mut poll = self.get(identity).await?;
        poll.retry_count += 1;
        if poll.retry_count >= self.max_retries {
            poll.dead = true;
        }
        self.put_record(&poll).await?;

        if poll.dead {
            warn!(
                "Poll {} exceeded {} retries and was marked dead",
                identity, self.max_retries
            );
        } else {
            debug!(
                "Poll {} failure recorded (attempt {})",
                identity, poll.retry_count
            );
        }
        Ok(poll)
    }

    /// Try to claim the in-flight lease for an identity. `None` means another
    /// worker owns it — skip, don't error. The ttl guards against leases
    /// orphaned by crashes.
    pub async fn acquire_lease(
        &self,
        identity: &PollIdentity,
        ttl: Duration,
    ) -> Result<Option<Lease>> {
        let token = Uuid::new_v4().to_string();
        let key = self.lease_key(identity);

        if self.store.acquire_lock(&key, &token, ttl).await? {
            debug!("Lease acquired for poll {}", identity);
            Ok(Some(Lease { token }))
        } else {
            Ok(None)
        }
    }

    /// Release a held lease. Releasing an expired or stolen lease is a no-op;
    /// the fencing token prevents releasing someone else's claim.
    pub async fn release_lease(&self, identity: &PollIdentity, lease: &Lease) -> Result<()> {
        let key = self.lease_key(identity);
        if !self.store.release_lock(&key, &lease.token).await? {
            warn!("Lease for poll {} was already reclaimed", identity);
        }
        Ok(())
    }

    async fn put_record(&self, poll: &ScheduledPoll) -> Result<()> {
        let key = self.record_key(&poll.identity());
        let serialized = serde_json::to_string(poll)?;
        self.store.put(&key, &serialized).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::store::MemoryRegistryStore;
    use tallyd_model::{SupportedChain, VotingMode};

    fn registry() -> PollRegistry {
        PollRegistry::new(Arc::new(MemoryRegistryStore::new()), "test".into(), 3)
    }

    fn poll(poll_id: &str, end_date: i64) -> ScheduledPoll {
        ScheduledPoll::new(
            PollIdentity {
                contract_address: "0xaaa".into(),
                poll_id: poll_id.into(),
                chain: SupportedChain::OptimismSepolia,
            },
            100,
            VotingMode::Quadratic,
            end_date,
        )
    }

    #[tokio::test]
    async fn register_rejects_duplicate_as_already_scheduled() {
        let registry = registry();
        let record = poll("1", 1000);

        registry.register(&record).await.unwrap();
        let err = registry.register(&record).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::PollAlreadyScheduled));

        // No mutation on conflict
        let stored = registry.get(&record.identity()).await.unwrap();
        assert_eq!(stored.retry_count, 0);
        assert!(!stored.merged);
        assert!(!stored.proofs_generated);
    }

    #[tokio::test]
    async fn register_rejects_finalized_as_already_tallied() {
        let registry = registry();
        let record = poll("2", 1000);

        registry.register(&record).await.unwrap();
        registry.mark_finalized(&record.identity()).await.unwrap();

        let err = registry.register(&record).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::PollAlreadyTallied));
    }

    #[tokio::test]
    async fn list_due_orders_oldest_first_and_applies_cutoff() {
        let registry = registry();
        registry.register(&poll("late", 3000)).await.unwrap();
        registry.register(&poll("early", 1000)).await.unwrap();
        registry.register(&poll("mid", 2000)).await.unwrap();

        // Before any end date nothing is due
        assert!(registry.list_due(999).await.unwrap().is_empty());

        let due = registry.list_due(2500).await.unwrap();
        let ids: Vec<&str> = due.iter().map(|p| p.poll_id.as_str()).collect();
        assert_eq!(ids, vec!["early", "mid"]);

        let due = registry.list_due(3000).await.unwrap();
        assert_eq!(due.len(), 3);
    }

    #[tokio::test]
    async fn list_due_excludes_finalized_and_dead() {
        let registry = registry();
        let done = poll("done", 1000);
        let dead = poll("dead", 1000);
        let live = poll("live", 1000);
        registry.register(&done).await.unwrap();
        registry.register(&dead).await.unwrap();
        registry.register(&live).await.unwrap();

        registry.mark_finalized(&done.identity()).await.unwrap();
        for _ in 0..3 {
            registry.record_failure(&dead.identity()).await.unwrap();
        }

        let due = registry.list_due(5000).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].poll_id, "live");
    }

    #[tokio::test]
    async fn mark_merged_and_finalized_are_idempotent_and_monotonic() {
        let registry = registry();
        let record = poll("3", 1000);
        registry.register(&record).await.unwrap();
        let id = record.identity();

        registry.mark_merged(&id).await.unwrap();
        registry.mark_merged(&id).await.unwrap();
        assert!(registry.get(&id).await.unwrap().merged);

        registry.mark_finalized(&id).await.unwrap();
        registry.mark_finalized(&id).await.unwrap();
        let stored = registry.get(&id).await.unwrap();
        assert!(stored.merged);
        assert!(stored.proofs_generated);
    }

    #[tokio::test]
    async fn record_failure_counts_up_and_kills_at_limit() {
        let registry = registry();
        let record = poll("4", 1000);
        registry.register(&record).await.unwrap();
        let id = record.identity();

        let updated = registry.record_failure(&id).await.unwrap();
        assert_eq!(updated.retry_count, 1);
        assert!(!updated.dead);

        registry.record_failure(&id).await.unwrap();
        let updated = registry.record_failure(&id).await.unwrap();
        assert_eq!(updated.retry_count, 3);
        assert!(updated.dead);

        assert!(registry.list_due(5000).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn success_never_touches_retry_count() {
        let registry = registry();
        let record = poll("5", 1000);
        registry.register(&record).await.unwrap();
        let id = record.identity();

        registry.record_failure(&id).await.unwrap();
        registry.mark_merged(&id).await.unwrap();
        registry.mark_finalized(&id).await.unwrap();

        assert_eq!(registry.get(&id).await.unwrap().retry_count, 1);
    }

    #[tokio::test]
    async fn concurrent_lease_acquisition_admits_exactly_one() {
        let registry = Arc::new(registry());
        let record = poll("6", 1000);
        registry.register(&record).await.unwrap();
        let id = record.identity();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .acquire_lease(&id, Duration::from_secs(60))
                    .await
                    .unwrap()
            }));
        }

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                granted += 1;
            }
        }
        assert_eq!(granted, 1);
    }

    #[tokio::test]
    async fn released_lease_is_reacquirable() {
        let registry = registry();
        let record = poll("7", 1000);
        registry.register(&record).await.unwrap();
        let id = record.identity();

        let lease = registry
            .acquire_lease(&id, Duration::from_secs(60))
            .await
            .unwrap()
            .expect("first acquisition succeeds");
        assert!(
            registry
                .acquire_lease(&id, Duration::from_secs(60))
                .await
                .unwrap()
                .is_none()
        );

        registry.release_lease(&id, &lease).await.unwrap();
        assert!(
            registry
                .acquire_lease(&id, Duration::from_secs(60))
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn leases_do_not_leak_into_record_scans() {
        let registry = registry();
        let record = poll("8", 1000);
        registry.register(&record).await.unwrap();
        registry
            .acquire_lease(&record.identity(), Duration::from_secs(60))
            .await
            .unwrap();

        // The lease key must not show up as a (broken) record
        let due = registry.list_due(5000).await.unwrap();
        assert_eq!(due.len(), 1);
    }
}
