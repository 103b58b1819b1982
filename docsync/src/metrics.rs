//! Metric names and labels emitted by the replication pipeline.
//!
//! No recorder is installed by this crate, the binary embedding it decides where metrics go.

/// Label for the source namespace of a collection pair.
pub const SOURCE_LABEL: &str = "source";

/// Label for the change event operation.
pub const OPERATION_LABEL: &str = "operation";

/// Label for the phase a supervisor was running.
pub const PHASE_LABEL: &str = "phase";

/// Label for the outcome a failure was classified as.
pub const OUTCOME_LABEL: &str = "outcome";

/// Counter for documents written to the destination by the snapshot copy.
pub const DOCSYNC_DOCUMENTS_COPIED_TOTAL: &str = "docsync_documents_copied_total";

/// Counter for change events processed by the consumer.
pub const DOCSYNC_EVENTS_APPLIED_TOTAL: &str = "docsync_events_applied_total";

/// Counter for checkpoint writes that failed or were not applied.
pub const DOCSYNC_CHECKPOINT_FAILURES_TOTAL: &str = "docsync_checkpoint_failures_total";

/// Counter for failed phase attempts, labeled with their classified outcome.
pub const DOCSYNC_PHASE_RETRIES_TOTAL: &str = "docsync_phase_retries_total";
