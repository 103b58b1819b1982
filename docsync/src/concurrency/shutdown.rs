use tokio::sync::watch;

/// Receiver side of the shutdown channel.
///
/// `changed()` resolves once shutdown was requested or the sender was dropped, both are treated
/// as a request to stop.
pub type ShutdownRx = watch::Receiver<()>;

/// Sender side of the shutdown channel.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<()>);

impl ShutdownTx {
    /// Notifies every subscribed receiver that shutdown was requested.
    ///
    /// Fails only when no receiver is alive, in which case nothing is running.
    pub fn shutdown(&self) -> Result<(), watch::error::SendError<()>> {
        self.0.send(())
    }

    pub fn subscribe(&self) -> ShutdownRx {
        self.0.subscribe()
    }
}

/// Creates a new shutdown channel.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(());
    (ShutdownTx(tx), rx)
}

/// Returns `true` if shutdown was requested since `shutdown_rx` last observed the channel.
pub fn shutdown_requested(shutdown_rx: &ShutdownRx) -> bool {
    shutdown_rx.has_changed().unwrap_or(true)
}
