//! Scheduler: the periodic loop that finds due polls and drives their
//! finalization, with lease-based dedup and bounded retry accounting.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use tallyd_model::{ProofSessionRequest, ScheduledPoll};

use crate::config::CoordinatorSettings;
use crate::error::{CoordinatorError, Result};
use crate::pipeline::{EventSink, ProofPipeline, RunOptions};
use crate::registry::PollRegistry;

pub struct Scheduler {
    registry: Arc<PollRegistry>,
    pipeline: Arc<ProofPipeline>,
    settings: CoordinatorSettings,
    limiter: Arc<Semaphore>,
    wake: Notify,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("poll_interval", &self.settings.poll_interval)
            .field("max_concurrent", &self.settings.max_concurrent_pipelines)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub fn new(
        registry: Arc<PollRegistry>,
        pipeline: Arc<ProofPipeline>,
        settings: CoordinatorSettings,
    ) -> Arc<Self> {
        let limiter = Arc::new(Semaphore::new(settings.max_concurrent_pipelines));
        Arc::new(Self {
            registry,
            pipeline,
            settings,
            limiter,
            wake: Notify::new(),
        })
    }

    /// Wake the loop outside its fixed interval, e.g. right after ingestion
    /// registered a poll that is already due.
    pub fn tick_now(&self) {
        self.wake.notify_one();
    }

    /// Run cycles forever. Cycle errors are logged, never fatal.
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.settings.poll_interval);
        info!(
            "Scheduler started (interval {:?}, max {} concurrent pipelines)",
            self.settings.poll_interval, self.settings.max_concurrent_pipelines
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.wake.notified() => {
                    debug!("Scheduler woken by external trigger");
                }
            }

            let now = Utc::now().timestamp();
            if let Err(err) = self.run_cycle(now).await {
                error!("Scheduler cycle failed: {}", err);
            }
        }
    }

    /// One cycle: list due polls, claim leases, run pipelines concurrently
    /// (bounded), persist outcomes, release leases. Returns the number of
    /// polls this cycle attempted.
    pub async fn run_cycle(&self, now: i64) -> Result<usize> {
        let due = self.registry.list_due(now).await?;
        if due.is_empty() {
            return Ok(0);
        }
        info!("Scheduler cycle: {} poll(s) due", due.len());

        let mut runs = JoinSet::new();
        let mut attempted = 0;

        for poll in due {
            let identity = poll.identity();

            // Wait for capacity before touching the lease: a lease claimed
            // while queued behind the limiter would sit idle and could
            // expire mid-run, letting a second worker start the same poll.
            let permit = Arc::clone(&self.limiter)
                .acquire_owned()
                .await
                .map_err(|_| CoordinatorError::Storage("pipeline limiter closed".into()))?;

            // Lease contention is the dedup guard, not an error: another
            // worker or session owns this poll right now. A storage error
            // skips this poll only; in-flight runs keep going.
            let lease = match self
                .registry
                .acquire_lease(&identity, self.settings.lease_ttl)
                .await
            {
                Ok(Some(lease)) => lease,
                Ok(None) => {
                    debug!("Poll {} is leased elsewhere, skipping", identity);
                    continue;
                }
                Err(err) => {
                    warn!("Lease lookup for poll {} failed: {}", identity, err);
                    continue;
                }
            };

            attempted += 1;
            let registry = Arc::clone(&self.registry);
            let pipeline = Arc::clone(&self.pipeline);
            let request = self.session_request(&poll);
            let timeout = self.settings.pipeline_timeout;

            runs.spawn(async move {
                let _permit = permit;
                let sink = EventSink::disabled();
                let options = RunOptions {
                    submit_requires_listener: false,
                };

                match pipeline
                    .run_bounded(&poll, &request, &sink, options, timeout)
                    .await
                {
                    Ok(_) => info!("Poll {} finalized by scheduler", identity),
                    Err(err) => {
                        warn!("Poll {} finalization failed: {}", identity, err);
                    }
                }

                if let Err(err) = registry.release_lease(&identity, &lease).await {
                    error!("Failed to release lease for poll {}: {}", identity, err);
                }
            });
        }

        while runs.join_next().await.is_some() {}
        Ok(attempted)
    }

    /// Unattended runs use the scheduler's own delegated signer.
    fn session_request(&self, poll: &ScheduledPoll) -> ProofSessionRequest {
        ProofSessionRequest {
            contract_address: poll.contract_address.clone(),
            poll_id: poll.poll_id.clone(),
            chain: poll.chain,
            session_key_address: self.settings.session_key_address.clone(),
            approval: self.settings.session_key_approval.clone(),
        }
    }
}
