use std::sync::Arc;

use chrono::Utc;
use docsync_config::shared::PipelineConfig;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::bail;
use crate::concurrency::shutdown::{ShutdownRx, ShutdownTx, create_shutdown_channel};
use crate::concurrency::signal::{GateRx, GateTx, create_gate};
use crate::error::{ErrorKind, SyncResult};
use crate::replication::cutover::cutover_time;
use crate::store::checkpoint::CheckpointStore;
use crate::store::document::Store;
use crate::workers::collection::{CollectionWorker, CollectionWorkerState, CopyReport};
use crate::workers::pool::{CollectionWorkerId, CollectionWorkerPool};

#[derive(Debug)]
enum PipelineState {
    NotStarted,
    Started {
        pool: CollectionWorkerPool,
        coordinator: JoinHandle<()>,
        gate_rx: GateRx,
    },
}

/// Replicates every configured collection pair from `source` to `destination`.
///
/// Each pair gets its own supervisor. Streaming starts only after every supervisor finished its
/// copy phase, so that no pair applies live changes while another one still copies.
#[derive(Debug)]
pub struct Pipeline<S, D, C> {
    config: Arc<PipelineConfig>,
    source: S,
    destination: D,
    checkpoints: C,
    state: PipelineState,
    shutdown_tx: ShutdownTx,
}

impl<S, D, C> Pipeline<S, D, C>
where
    S: Store + Clone + Send + Sync + 'static,
    D: Store + Clone + Send + Sync + 'static,
    C: CheckpointStore + Clone + Send + Sync + 'static,
{
    pub fn new(config: PipelineConfig, source: S, destination: D, checkpoints: C) -> Self {
        // Receivers are created on start through `subscribe`.
        let (shutdown_tx, _) = create_shutdown_channel();

        Self {
            config: Arc::new(config),
            source,
            destination,
            checkpoints,
            state: PipelineState::NotStarted,
            shutdown_tx,
        }
    }

    pub fn shutdown_tx(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    /// Spawns one supervisor per collection pair and the copy coordinator.
    pub async fn start(&mut self) -> SyncResult<()> {
        if matches!(self.state, PipelineState::Started { .. }) {
            bail!(ErrorKind::InvalidState, "Pipeline was already started");
        }

        if self.config.collections.is_empty() {
            bail!(ErrorKind::ConfigError, "No collections configured");
        }

        let cutover = cutover_time(&self.config.cutover, Utc::now());
        info!(
            collections = self.config.collections.len(),
            cutover = ?cutover.map(|cutover| cutover.to_rfc3339()),
            "starting pipeline"
        );

        let (gate_tx, gate_rx) = create_gate();
        let (copy_report_tx, copy_report_rx) = mpsc::unbounded_channel();

        let coordinator = tokio::spawn(coordinate_copies(
            self.config.collections.len(),
            copy_report_rx,
            gate_tx,
            self.shutdown_tx.subscribe(),
        ));

        let pool = CollectionWorkerPool::new();
        for (index, spec) in self.config.collections.iter().enumerate() {
            let worker = CollectionWorker::new(
                CollectionWorkerId(index),
                spec.clone(),
                self.config.clone(),
                cutover,
                self.source.clone(),
                self.destination.clone(),
                self.checkpoints.clone(),
                copy_report_tx.clone(),
                gate_rx.clone(),
                self.shutdown_tx.subscribe(),
            );

            worker.spawn_into_pool(&pool).await;
        }

        self.state = PipelineState::Started {
            pool,
            coordinator,
            gate_rx,
        };

        Ok(())
    }

    /// Returns the state of every running supervisor.
    pub async fn worker_states(&self) -> Vec<(CollectionWorkerId, CollectionWorkerState)> {
        match &self.state {
            PipelineState::NotStarted => vec![],
            PipelineState::Started { pool, .. } => pool.active_states().await,
        }
    }

    /// Returns `true` once every supervisor finished its copy phase.
    pub fn streaming_gate_open(&self) -> bool {
        match &self.state {
            PipelineState::NotStarted => false,
            PipelineState::Started { gate_rx, .. } => *gate_rx.borrow(),
        }
    }

    /// Waits for every supervisor to end.
    ///
    /// Supervisors only end on shutdown, so without a shutdown this never returns.
    pub async fn wait(self) -> SyncResult<()> {
        let PipelineState::Started {
            pool, coordinator, ..
        } = self.state
        else {
            info!("pipeline was not started, nothing to wait for");

            return Ok(());
        };

        info!("waiting for collection workers to complete");

        let result = pool.wait_all().await;

        // Supervisors are gone, nobody reports to the coordinator anymore.
        coordinator.abort();
        let _ = coordinator.await;

        if let Err(err) = &result {
            error!(
                failed_workers = err.kinds().len(),
                "collection workers completed with errors"
            );
        }

        result
    }

    pub fn shutdown(&self) {
        info!("trying to shut down the pipeline");

        if let Err(err) = self.shutdown_tx.shutdown() {
            error!("failed to send shutdown signal to the pipeline: {}", err);
            return;
        }

        info!("shut down signal successfully sent to all workers");
    }

    pub async fn shutdown_and_wait(self) -> SyncResult<()> {
        self.shutdown();
        self.wait().await
    }
}

/// Opens the streaming gate once `expected` supervisors reported the end of their copy phase.
async fn coordinate_copies(
    expected: usize,
    mut copy_report_rx: mpsc::UnboundedReceiver<CopyReport>,
    gate_tx: GateTx,
    mut shutdown_rx: ShutdownRx,
) {
    let mut reported = 0;

    while reported < expected {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                info!(reported, expected, "shutdown requested before every copy phase finished");
                return;
            }

            report = copy_report_rx.recv() => {
                let Some(report) = report else {
                    warn!(reported, expected, "every collection worker ended before reporting its copy phase");
                    return;
                };

                reported += 1;
                info!(
                    worker_id = %report.worker_id,
                    source = %report.source,
                    outcome = ?report.outcome,
                    reported,
                    expected,
                    "copy phase reported"
                );
            }
        }
    }

    info!("every copy phase finished, opening streaming gate");
    gate_tx.send_replace(true);

    // Keeping the sender alive leaves the gate open for supervisors that look at it later.
    let _ = shutdown_rx.changed().await;
}
