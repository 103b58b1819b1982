use docsync::error::SyncError;
use std::backtrace::Backtrace;
use std::error::Error;
use std::fmt;

fn should_render_backtrace() -> bool {
    matches!(
        std::env::var("RUST_BACKTRACE").as_deref(),
        Ok("1") | Ok("full")
    )
}

/// Result type for replicator operations.
pub type ReplicatorResult<T> = Result<T, ReplicatorError>;

/// Backtrace captured when an infrastructure error is created.
pub struct CapturedBacktrace(Backtrace);

impl CapturedBacktrace {
    fn capture() -> Self {
        Self(Backtrace::capture())
    }
}

impl fmt::Debug for CapturedBacktrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error type for the replicator binary.
///
/// Wraps [`SyncError`] for failures coming out of the pipeline and its stores, and carries the
/// startup failures that happen before a pipeline exists.
#[derive(Debug)]
pub enum ReplicatorError {
    /// Store, checkpoint or pipeline failure.
    Sync(SyncError),
    /// The configuration could not be loaded or is invalid.
    Config(Box<dyn Error + Send + Sync>, CapturedBacktrace),
    /// The runtime could not be built.
    Io(std::io::Error, CapturedBacktrace),
}

impl ReplicatorError {
    pub fn category(&self) -> &'static str {
        match self {
            ReplicatorError::Sync(_) => "replication error",
            ReplicatorError::Config(_, _) => "configuration error",
            ReplicatorError::Io(_, _) => "i/o error",
        }
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self {
            ReplicatorError::Sync(_) => None,
            ReplicatorError::Config(_, cb) => Some(&cb.0),
            ReplicatorError::Io(_, cb) => Some(&cb.0),
        }
    }

    /// Creates a configuration error from any error type.
    pub fn config<E: Error + Send + Sync + 'static>(err: E) -> Self {
        ReplicatorError::Config(Box::new(err), CapturedBacktrace::capture())
    }

    /// Returns a report for terminal output.
    ///
    /// The cause chain is skipped for aggregated errors, their display already lists every
    /// failure.
    pub fn render_report(&self) -> String {
        let mut out = String::new();
        out.push_str("replicator failed\n");
        out.push_str(&format!("category: {}\n", self.category()));
        out.push_str(&format!("error: {}\n", self));

        if !matches!(self, ReplicatorError::Sync(err) if err.errors().is_some()) {
            let mut source = Error::source(self);
            let mut idx = 1usize;
            while let Some(err) = source {
                out.push_str(&format!("cause {idx}: {err}\n"));
                source = err.source();
                idx += 1;
            }
        }

        if should_render_backtrace()
            && let Some(backtrace) = self.backtrace()
        {
            out.push_str("backtrace:\n");
            out.push_str(&backtrace.to_string());
            if !out.ends_with('\n') {
                out.push('\n');
            }
        }

        out
    }
}

impl fmt::Display for ReplicatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicatorError::Sync(err) => write!(f, "{err}"),
            ReplicatorError::Config(source, _) => write!(f, "configuration error: {source}"),
            ReplicatorError::Io(source, _) => write!(f, "i/o error: {source}"),
        }
    }
}

impl Error for ReplicatorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ReplicatorError::Sync(err) => err.source(),
            ReplicatorError::Config(source, _) => Some(source.as_ref()),
            ReplicatorError::Io(source, _) => Some(source),
        }
    }
}

impl From<std::io::Error> for ReplicatorError {
    fn from(err: std::io::Error) -> Self {
        ReplicatorError::Io(err, CapturedBacktrace::capture())
    }
}

impl From<SyncError> for ReplicatorError {
    fn from(err: SyncError) -> Self {
        ReplicatorError::Sync(err)
    }
}

#[cfg(test)]
mod tests {
    use docsync::error::ErrorKind;
    use docsync_config::shared::ValidationError;

    use super::*;

    #[test]
    fn config_errors_render_their_cause() {
        let err = ReplicatorError::config(ValidationError::RetryDelayZero);

        let report = err.render_report();

        assert!(report.starts_with("replicator failed\n"));
        assert!(report.contains("category: configuration error\n"));
        assert!(report.contains("cause 1: `retryDelayMs` cannot be zero\n"));
    }

    #[test]
    fn sync_errors_keep_their_kind() {
        let err: ReplicatorError =
            SyncError::from((ErrorKind::StoreConnectionFailed, "Failed to connect")).into();

        assert_eq!(err.category(), "replication error");
        assert!(matches!(
            err,
            ReplicatorError::Sync(inner) if inner.kind() == ErrorKind::StoreConnectionFailed
        ));
    }
}
