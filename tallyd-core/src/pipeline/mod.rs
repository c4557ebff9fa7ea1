//! Proof pipeline engine: merge -> generate -> submit for one poll.
//!
//! The pipeline is stateless across invocations; everything durable lives in
//! the registry. It emits session-scoped events and never retries — retry is
//! exclusively the scheduler's policy.

pub mod traits;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use tallyd_model::{
    PollIdentity, ProofSessionEvent, ProofSessionRequest, ScheduledPoll,
    TallyArtifact,
};

use crate::error::{CoordinatorError, Result};
use crate::registry::PollRegistry;
use traits::{ProvingEngine, SignerProvider};

/// The three externally visible stages of finalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Merge,
    Generate,
    Submit,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Merge => "merge",
            Self::Generate => "generate",
            Self::Submit => "submit",
        })
    }
}

/// Per-invocation status. `Errored` absorbs from any non-idle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineStatus {
    Idle,
    Merging,
    Generating,
    Submitting,
    Done,
    Errored(PipelineStage),
}

/// Session-scoped outlet for pipeline events.
///
/// Each invocation gets its own sink; events are never broadcast across
/// sessions. A closed receiver (client went away) is remembered but does not
/// abort the run: in-flight stages complete and persist their outcome.
#[derive(Clone)]
pub struct EventSink {
    tx: Option<mpsc::Sender<ProofSessionEvent>>,
    connected: Arc<AtomicBool>,
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl EventSink {
    /// Sink backed by a channel, for sessions with a listening client.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProofSessionEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx: Some(tx),
                connected: Arc::new(AtomicBool::new(true)),
            },
            rx,
        )
    }

    /// Sink for unattended (scheduler-driven) runs; events are only logged.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub async fn emit(&self, event: ProofSessionEvent) {
        match &self.tx {
            Some(tx) => {
                if tx.send(event).await.is_err() {
                    self.connected.store(false, Ordering::Release);
                }
            }
            None => debug!("Pipeline event (no listener): {:?}", event),
        }
    }
}

/// Options for one pipeline invocation.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// When set, submit is attempted only while the session listener is
    /// still connected. True for websocket sessions (submission wants
    /// human-visible confirmation), false for scheduler-driven runs.
    pub submit_requires_listener: bool,
}

/// Executes merge -> generate -> submit for a single poll.
pub struct ProofPipeline {
    registry: Arc<PollRegistry>,
    engine: Arc<dyn ProvingEngine>,
    signer: Arc<dyn SignerProvider>,
}

impl fmt::Debug for ProofPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProofPipeline").finish_non_exhaustive()
    }
}

impl ProofPipeline {
    pub fn new(
        registry: Arc<PollRegistry>,
        engine: Arc<dyn ProvingEngine>,
        signer: Arc<dyn SignerProvider>,
    ) -> Self {
        Self {
            registry,
            engine,
            signer,
        }
    }

    /// Run the pipeline and fold the outcome back into the registry:
    /// success finalizes the poll, failure increments its retry accounting.
    /// The caller must hold the finalization lease for the poll.
    pub async fn run_and_record(
        &self,
        poll: &ScheduledPoll,
        request: &ProofSessionRequest,
        sink: &EventSink,
        options: RunOptions,
    ) -> Result<TallyArtifact> {
        let identity = poll.identity();

        match self.run(poll, request, sink, options).await {
            Ok(tally) => {
                self.registry.mark_finalized(&identity).await?;
                Ok(tally)
            }
            Err(err) => {
                let updated = self.registry.record_failure(&identity).await?;
                if updated.dead {
                    error!(
                        "Poll {} is dead after {} failed attempts; operator intervention required",
                        identity, updated.retry_count
                    );
                }
                Err(err)
            }
        }
    }

    /// [`run_and_record`](Self::run_and_record) under a wall-clock deadline.
    /// A run cancelled at the deadline never got to record its own outcome,
    /// so the failure is accounted here unless the poll actually finished.
    /// Keeping every caller on this path bounds how long a finalization
    /// lease stays held.
    pub async fn run_bounded(
        &self,
        poll: &ScheduledPoll,
        request: &ProofSessionRequest,
        sink: &EventSink,
        options: RunOptions,
        limit: Duration,
    ) -> Result<TallyArtifact> {
        let identity = poll.identity();

        let run = self.run_and_record(poll, request, sink, options);
        match tokio::time::timeout(limit, run).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Poll {} finalization timed out after {:?}",
                    identity, limit
                );
                match self.registry.get(&identity).await {
                    Ok(current) if !current.is_finalized() => {
                        if let Err(err) = self.registry.record_failure(&identity).await {
                            error!(
                                "Failed to record timeout for poll {}: {}",
                                identity, err
                            );
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        error!("Failed to re-read poll {}: {}", identity, err);
                    }
                }
                sink.emit(ProofSessionEvent::Error {
                    stage: "session".into(),
                    message: format!("finalization timed out after {limit:?}"),
                })
                .await;
                Err(CoordinatorError::Timeout(limit))
            }
        }
    }

    /// Execute the stage sequence once. Resumable: a poll whose merge was
    /// already persisted starts at generate. Mutates no lifecycle state on
    /// its own except `merged`, which must be durable before generation so a
    /// crash never forces a re-merge.
    pub async fn run(
        &self,
        poll: &ScheduledPoll,
        request: &ProofSessionRequest,
        sink: &EventSink,
        options: RunOptions,
    ) -> Result<TallyArtifact> {
        let identity = poll.identity();
        let mut status = PipelineStatus::Idle;

        // Fail fast on a deactivated session key, before any chain
        // interaction.
        let first_stage = if poll.merged {
            PipelineStage::Generate
        } else {
            PipelineStage::Merge
        };
        let client = match self
            .signer
            .create_client(&request.session_key_address, &request.approval, request.chain)
            .await
        {
            Ok(client) => client,
            Err(err) => return self.fail(sink, &mut status, first_stage, err).await,
        };

        // Stage 1: merge
        if poll.merged {
            debug!("Poll {} already merged, resuming at generate", identity);
        } else {
            self.transition(&mut status, PipelineStatus::Merging, &identity);

            if let Err(err) = self.engine.merge(request, client.as_ref()).await {
                return self.fail(sink, &mut status, PipelineStage::Merge, err).await;
            }
            // Persist before proceeding; a crash here redoes the (idempotent)
            // merge instead of losing it.
            if let Err(err) = self.registry.mark_merged(&identity).await {
                return self.fail(sink, &mut status, PipelineStage::Merge, err).await;
            }

            sink.emit(ProofSessionEvent::MergeFinished {
                poll_id: identity.poll_id.clone(),
            })
            .await;
        }

        // Stage 2: generate, with batch progress forwarded as push events
        self.transition(&mut status, PipelineStatus::Generating, &identity);

        let (progress_tx, mut progress_rx) = mpsc::channel(64);
        let progress_sink = sink.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(batch) = progress_rx.recv().await {
                progress_sink
                    .emit(ProofSessionEvent::Progress(batch))
                    .await;
            }
        });

        let generated = self
            .engine
            .generate(request, poll.voting_mode, progress_tx)
            .await;

        // Drain remaining progress before any later-stage event so ordering
        // holds even when the engine finished between batches.
        if forwarder.await.is_err() {
            warn!("Progress forwarder for poll {} panicked", identity);
        }

        let (proofs, tally) = match generated {
            Ok(output) => output,
            Err(err) => {
                return self
                    .fail(sink, &mut status, PipelineStage::Generate, err)
                    .await;
            }
        };

        sink.emit(ProofSessionEvent::GenerateFinished {
            proofs,
            tally: tally.clone(),
        })
        .await;

        // Stage 3: submit
        self.transition(&mut status, PipelineStatus::Submitting, &identity);

        let Some(tally) = tally else {
            return self
                .fail(
                    sink,
                    &mut status,
                    PipelineStage::Submit,
                    CoordinatorError::Engine("no tally artifact produced".into()),
                )
                .await;
        };

        if options.submit_requires_listener && !sink.is_connected() {
            return self
                .fail(
                    sink,
                    &mut status,
                    PipelineStage::Submit,
                    CoordinatorError::Engine(
                        "session disconnected before submission".into(),
                    ),
                )
                .await;
        }

        let tally = match self.engine.submit(request, client.as_ref(), &tally).await {
            Ok(tally) => tally,
            Err(err) => {
                return self
                    .fail(sink, &mut status, PipelineStage::Submit, err)
                    .await;
            }
        };

        sink.emit(ProofSessionEvent::SubmitFinished {
            tally: tally.clone(),
        })
        .await;

        self.transition(&mut status, PipelineStatus::Done, &identity);
        Ok(tally)
    }

    fn transition(
        &self,
        status: &mut PipelineStatus,
        next: PipelineStatus,
        identity: &PollIdentity,
    ) {
        debug!("Poll {} pipeline {:?} -> {:?}", identity, status, next);
        *status = next;
    }

    /// Terminal error path: an `error` event closes the session's workflow;
    /// no further stage events follow.
    async fn fail(
        &self,
        sink: &EventSink,
        status: &mut PipelineStatus,
        stage: PipelineStage,
        err: CoordinatorError,
    ) -> Result<TallyArtifact> {
        *status = PipelineStatus::Errored(stage);
        error!("Pipeline {} stage failed: {}", stage, err);

        sink.emit(ProofSessionEvent::Error {
            stage: stage.to_string(),
            message: err.to_string(),
        })
        .await;

        Err(CoordinatorError::Pipeline {
            stage,
            message: err.to_string(),
        })
    }
}
