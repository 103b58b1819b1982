use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use docsync_config::shared::{CollectionSyncSpec, PipelineConfig};
use metrics::counter;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinError;
use tracing::{Instrument, error, info, warn};

use crate::concurrency::shutdown::{ShutdownRx, shutdown_requested};
use crate::concurrency::signal::{GateResult, GateRx, wait_for_gate};
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::metrics::{DOCSYNC_PHASE_RETRIES_TOTAL, OUTCOME_LABEL, PHASE_LABEL};
use crate::replication::apply::{ChangeFeedConsumer, ConsumeReport};
use crate::replication::snapshot::{CopyResult, copy_collection};
use crate::store::checkpoint::{CheckpointKey, CheckpointStore};
use crate::store::document::{StartPosition, Store};
use crate::sync_error;
use crate::types::{Namespace, OperationFilter};
use crate::workers::policy::{ErrorHandlingPolicy, SyncOutcome, build_error_handling_policy};
use crate::workers::pool::{CollectionWorkerId, CollectionWorkerPool};

/// Lifecycle phase of a collection supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionPhase {
    Idle,
    Copying,
    /// Copy phase finished, waiting for every other supervisor to finish theirs.
    WaitingForGate,
    Streaming,
    /// The resume position was lost and streaming restarts from the time fallback.
    ResyncPending,
    /// A phase attempt failed and the supervisor waits before retrying it.
    Retrying,
    Stopped,
}

impl CollectionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Copying => "copying",
            Self::WaitingForGate => "waiting_for_gate",
            Self::Streaming => "streaming",
            Self::ResyncPending => "resync_pending",
            Self::Retrying => "retrying",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for CollectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable phase of a collection supervisor.
#[derive(Debug, Clone)]
pub struct CollectionWorkerState {
    worker_id: CollectionWorkerId,
    phase_tx: Arc<watch::Sender<CollectionPhase>>,
}

impl CollectionWorkerState {
    pub fn new(worker_id: CollectionWorkerId) -> Self {
        let (phase_tx, _) = watch::channel(CollectionPhase::Idle);

        Self {
            worker_id,
            phase_tx: Arc::new(phase_tx),
        }
    }

    pub fn phase(&self) -> CollectionPhase {
        *self.phase_tx.borrow()
    }

    /// Waits until the supervisor is in one of `phases`.
    ///
    /// Phases that are left before the waiter observes them can be missed.
    pub async fn wait_for_phase(&self, phases: &[CollectionPhase]) -> CollectionPhase {
        let mut phase_rx = self.phase_tx.subscribe();

        // The sender lives as long as `self`, the wait cannot fail.
        match phase_rx.wait_for(|phase| phases.contains(phase)).await {
            Ok(phase) => *phase,
            Err(_) => self.phase(),
        }
    }

    fn set(&self, phase: CollectionPhase) {
        let previous = self.phase_tx.send_replace(phase);
        if previous != phase {
            info!(
                worker_id = %self.worker_id,
                from_phase = %previous,
                to_phase = %phase,
                "collection phase changing"
            );
        }
    }
}

/// How the copy phase of a supervisor ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    Copied { copied: u64 },
    /// A checkpoint exists, the destination already tracks the source.
    SkippedCheckpointExists,
    /// No cutover time is configured.
    SkippedNoCutover,
    NotRequested,
}

/// Sent once by every supervisor when its copy phase ended.
#[derive(Debug, Clone)]
pub struct CopyReport {
    pub worker_id: CollectionWorkerId,
    pub source: Namespace,
    pub outcome: CopyOutcome,
}

/// Where the next streaming attempt takes its start position from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResumeStrategy {
    /// The stored checkpoint, falling back to the cutover time when there is none.
    Checkpoint,
    /// The cutover time, ignoring any stored checkpoint.
    CutoverFallback,
    /// The current end of the change history.
    Now,
}

impl ResumeStrategy {
    /// Returns the strategy to try after an attempt lost its resume position without applying
    /// any event, `None` once every strategy was exhausted.
    fn escalate(self) -> Option<Self> {
        match self {
            Self::Checkpoint => Some(Self::CutoverFallback),
            Self::CutoverFallback => Some(Self::Now),
            Self::Now => None,
        }
    }
}

/// Everything a phase attempt needs, cloned into the attempt task.
#[derive(Debug, Clone)]
struct AttemptContext<S, D, C> {
    spec: CollectionSyncSpec,
    config: Arc<PipelineConfig>,
    cutover: Option<DateTime<Utc>>,
    source: S,
    destination: D,
    checkpoints: C,
    shutdown_rx: ShutdownRx,
}

/// Supervisor of a single collection pair.
///
/// Runs the copy phase when requested, reports its end to the coordinator, waits for the
/// streaming gate and then streams changes forever. Every phase attempt runs in its own task.
/// Failed attempts are retried after the configured delay, except for lost resume positions
/// which restart streaming immediately from the cutover time.
#[derive(Debug)]
pub struct CollectionWorker<S, D, C> {
    worker_id: CollectionWorkerId,
    context: AttemptContext<S, D, C>,
    copy_report_tx: mpsc::UnboundedSender<CopyReport>,
    gate_rx: GateRx,
    shutdown_rx: ShutdownRx,
}

impl<S, D, C> CollectionWorker<S, D, C>
where
    S: Store + Clone + Send + Sync + 'static,
    D: Store + Clone + Send + Sync + 'static,
    C: CheckpointStore + Clone + Send + Sync + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        worker_id: CollectionWorkerId,
        spec: CollectionSyncSpec,
        config: Arc<PipelineConfig>,
        cutover: Option<DateTime<Utc>>,
        source: S,
        destination: D,
        checkpoints: C,
        copy_report_tx: mpsc::UnboundedSender<CopyReport>,
        gate_rx: GateRx,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            worker_id,
            context: AttemptContext {
                spec,
                config,
                cutover,
                source,
                destination,
                checkpoints,
                shutdown_rx: shutdown_rx.clone(),
            },
            copy_report_tx,
            gate_rx,
            shutdown_rx,
        }
    }

    /// Spawns the supervisor into `pool`.
    pub async fn spawn_into_pool(self, pool: &CollectionWorkerPool) {
        let worker_id = self.worker_id;
        let state = CollectionWorkerState::new(worker_id);

        let span = tracing::info_span!(
            "collection_worker",
            worker_id = %worker_id,
            source = %self.context.spec.source,
            destination = %self.context.spec.destination,
        );

        let future = self.run(state.clone()).instrument(span);
        pool.spawn(worker_id, state, future).await;
    }

    async fn run(mut self, state: CollectionWorkerState) -> SyncResult<()> {
        info!("starting collection worker");

        let Some(outcome) = self.run_copy_phase(&state).await else {
            state.set(CollectionPhase::Stopped);
            return Ok(());
        };

        let report = CopyReport {
            worker_id: self.worker_id,
            source: Namespace::from(&self.context.spec.source),
            outcome,
        };
        if self.copy_report_tx.send(report).is_err() {
            warn!("copy coordinator is gone, streaming gate may never open");
        }

        state.set(CollectionPhase::WaitingForGate);
        if wait_for_gate(&mut self.gate_rx, &mut self.shutdown_rx).await == GateResult::Shutdown {
            info!("shutdown requested while waiting for the streaming gate");
            state.set(CollectionPhase::Stopped);
            return Ok(());
        }

        self.run_streaming_phase(&state).await;
        state.set(CollectionPhase::Stopped);

        info!("collection worker stopped");

        Ok(())
    }

    /// Runs copy attempts until one ends, returns `None` on shutdown.
    async fn run_copy_phase(&mut self, state: &CollectionWorkerState) -> Option<CopyOutcome> {
        if !self.context.spec.copy {
            return Some(CopyOutcome::NotRequested);
        }

        loop {
            state.set(CollectionPhase::Copying);

            let attempt = tokio::spawn(copy_attempt(self.context.clone()).in_current_span());
            match join_attempt(attempt.await) {
                Ok(Some(outcome)) => {
                    info!(?outcome, "copy phase finished");
                    return Some(outcome);
                }
                Ok(None) => return None,
                Err(err) => {
                    let policy = build_error_handling_policy(&err);
                    if !self
                        .wait_before_retry(state, CollectionPhase::Copying, &err, policy)
                        .await
                    {
                        return None;
                    }
                }
            }
        }
    }

    /// Streams changes until shutdown.
    async fn run_streaming_phase(&mut self, state: &CollectionWorkerState) {
        let mut strategy = ResumeStrategy::Checkpoint;

        loop {
            state.set(CollectionPhase::Streaming);

            let attempt =
                tokio::spawn(stream_attempt(self.context.clone(), strategy).in_current_span());
            let report = match attempt.await {
                Ok(report) => report,
                Err(join_err) => ConsumeReport {
                    processed: 0,
                    result: Err(panic_error(join_err)),
                },
            };

            let err = match report.result {
                Ok(()) => return,
                Err(err) => err,
            };

            let policy = build_error_handling_policy(&err);
            if policy.outcome() == SyncOutcome::ResumePositionInvalidated {
                // An attempt that applied events lost a position that used to be valid, so the
                // stored checkpoint is discarded before trying anything newer.
                let next = if report.processed > 0 {
                    Some(ResumeStrategy::CutoverFallback)
                } else {
                    strategy.escalate()
                };

                if let Some(next) = next {
                    warn!(
                        error = %err,
                        from = ?strategy,
                        to = ?next,
                        "resume position is no longer available, restarting streaming"
                    );
                    counter!(
                        DOCSYNC_PHASE_RETRIES_TOTAL,
                        PHASE_LABEL => CollectionPhase::Streaming.as_str(),
                        OUTCOME_LABEL => "resume_position_invalidated"
                    )
                    .increment(1);

                    state.set(CollectionPhase::ResyncPending);
                    strategy = next;

                    if shutdown_requested(&self.shutdown_rx) {
                        return;
                    }

                    continue;
                }
            }

            if !self
                .wait_before_retry(state, CollectionPhase::Streaming, &err, policy)
                .await
            {
                return;
            }
            strategy = ResumeStrategy::Checkpoint;
        }
    }

    /// Waits the retry delay, returns `false` if shutdown was requested meanwhile.
    async fn wait_before_retry(
        &mut self,
        state: &CollectionWorkerState,
        phase: CollectionPhase,
        err: &SyncError,
        policy: ErrorHandlingPolicy,
    ) -> bool {
        let delay = self.context.config.retry_delay;

        error!(
            error = %err,
            %phase,
            solution = policy.solution().unwrap_or_default(),
            delay_ms = delay.as_millis() as u64,
            "phase attempt failed, retrying after delay"
        );
        counter!(
            DOCSYNC_PHASE_RETRIES_TOTAL,
            PHASE_LABEL => phase.as_str(),
            OUTCOME_LABEL => "transient"
        )
        .increment(1);

        state.set(CollectionPhase::Retrying);

        tokio::select! {
            biased;

            _ = self.shutdown_rx.changed() => {
                info!(%phase, "shutdown requested, cancelling retry");
                false
            }

            _ = tokio::time::sleep(delay) => true,
        }
    }
}

/// Decides whether to copy and runs the copy, returns `None` when interrupted by shutdown.
async fn copy_attempt<S, D, C>(
    mut context: AttemptContext<S, D, C>,
) -> SyncResult<Option<CopyOutcome>>
where
    S: Store + Sync,
    D: Store + Sync,
    C: CheckpointStore + Sync,
{
    let key = CheckpointKey::for_source(&context.spec.source);
    if context.checkpoints.get(&key).await?.is_some() {
        info!(%key, "checkpoint exists, skipping copy");
        return Ok(Some(CopyOutcome::SkippedCheckpointExists));
    }

    let Some(cutover) = context.cutover else {
        info!("no cutover time configured, skipping copy");
        return Ok(Some(CopyOutcome::SkippedNoCutover));
    };

    let result = copy_collection(
        &context.spec,
        cutover,
        &context.source,
        &context.destination,
        &mut context.shutdown_rx,
    )
    .await?;

    match result {
        CopyResult::Completed { copied } => Ok(Some(CopyOutcome::Copied { copied })),
        CopyResult::Stopped { .. } => Ok(None),
    }
}

/// Subscribes to the source change feed and consumes it until it fails or shutdown.
async fn stream_attempt<S, D, C>(
    mut context: AttemptContext<S, D, C>,
    strategy: ResumeStrategy,
) -> ConsumeReport
where
    S: Store + Sync,
    D: Store + Sync,
    C: CheckpointStore + Sync,
{
    let source = Namespace::from(&context.spec.source);
    let key = CheckpointKey::for_source(&context.spec.source);

    let start = match start_position(&context, &key, strategy).await {
        Ok(start) => start,
        Err(err) => {
            return ConsumeReport {
                processed: 0,
                result: Err(err),
            };
        }
    };

    info!(%start, "subscribing to change feed");

    let stream_filter = OperationFilter::from_names(&context.config.stream_operations);
    let feed = tokio::select! {
        biased;

        _ = context.shutdown_rx.changed() => {
            return ConsumeReport { processed: 0, result: Ok(()) };
        }

        feed = context.source.subscribe_changes(&source, &stream_filter, start) => feed,
    };

    let feed = match feed {
        Ok(feed) => feed,
        Err(err) => {
            return ConsumeReport {
                processed: 0,
                result: Err(err),
            };
        }
    };

    let upserts = OperationFilter::from_names(&context.config.upsert_operations);
    let consumer = ChangeFeedConsumer::new(
        source,
        Namespace::from(&context.spec.destination),
        key,
        &upserts,
        &context.destination,
        &context.checkpoints,
    );

    consumer.consume(feed, &mut context.shutdown_rx).await
}

async fn start_position<S, D, C>(
    context: &AttemptContext<S, D, C>,
    key: &CheckpointKey,
    strategy: ResumeStrategy,
) -> SyncResult<StartPosition>
where
    C: CheckpointStore,
{
    let fallback = context.cutover.map_or(StartPosition::Now, StartPosition::At);

    match strategy {
        ResumeStrategy::Checkpoint => Ok(context
            .checkpoints
            .get(key)
            .await?
            .map_or(fallback, |checkpoint| StartPosition::After(checkpoint.token))),
        ResumeStrategy::CutoverFallback => Ok(fallback),
        ResumeStrategy::Now => Ok(StartPosition::Now),
    }
}

fn join_attempt<T>(result: Result<SyncResult<T>, JoinError>) -> SyncResult<T> {
    result.map_err(panic_error)?
}

fn panic_error(err: JoinError) -> SyncError {
    sync_error!(
        ErrorKind::CollectionWorkerPanic,
        "Phase attempt task failed",
        err
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalation_ends_after_now() {
        assert_eq!(
            ResumeStrategy::Checkpoint.escalate(),
            Some(ResumeStrategy::CutoverFallback)
        );
        assert_eq!(
            ResumeStrategy::CutoverFallback.escalate(),
            Some(ResumeStrategy::Now)
        );
        assert_eq!(ResumeStrategy::Now.escalate(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn state_reports_phase_changes() {
        let state = CollectionWorkerState::new(CollectionWorkerId(3));
        assert_eq!(state.phase(), CollectionPhase::Idle);

        let waiter = {
            let state = state.clone();
            tokio::spawn(async move {
                state
                    .wait_for_phase(&[CollectionPhase::Streaming, CollectionPhase::Stopped])
                    .await
            })
        };

        state.set(CollectionPhase::Copying);
        state.set(CollectionPhase::Streaming);

        assert_eq!(waiter.await.unwrap(), CollectionPhase::Streaming);
    }
}
