use tokio::sync::watch;

use crate::concurrency::shutdown::ShutdownRx;

/// Opens the streaming gate.
pub type GateTx = watch::Sender<bool>;

/// Waits on the streaming gate.
pub type GateRx = watch::Receiver<bool>;

/// Creates a closed gate.
pub fn create_gate() -> (GateTx, GateRx) {
    watch::channel(false)
}

/// Outcome of waiting on a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateResult {
    Open,
    Shutdown,
}

/// Waits until the gate is open or shutdown is requested.
///
/// A gate whose sender is gone without having been opened never opens, so the wait ends only on
/// shutdown in that case.
pub async fn wait_for_gate(gate_rx: &mut GateRx, shutdown_rx: &mut ShutdownRx) -> GateResult {
    tokio::select! {
        biased;

        _ = shutdown_rx.changed() => GateResult::Shutdown,

        // The guard returned by `wait_for` is dropped before awaiting again.
        opened = async { gate_rx.wait_for(|open| *open).await.is_ok() } => {
            if opened {
                GateResult::Open
            } else {
                let _ = shutdown_rx.changed().await;
                GateResult::Shutdown
            }
        }
    }
}
