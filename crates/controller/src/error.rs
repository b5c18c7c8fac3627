use nsclass_apply::{ApplyError, RenderError};
use nsclass_core::CodecError;
use nsclass_kubehub::BackendError;

/// Failure of one reconcile pass. Every variant is handed to the scheduler,
/// which requeues with backoff.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("fetch failed: {0}")]
    Fetch(#[source] BackendError),
    #[error("reading inventory: {0}")]
    Inventory(#[from] CodecError),
    #[error("malformed template: {0}")]
    MalformedTemplate(#[source] RenderError),
    #[error(transparent)]
    Apply(ApplyError),
    #[error(transparent)]
    Prune(ApplyError),
    #[error("cleanup: {0}")]
    Cleanup(#[source] ApplyError),
    #[error("persisting inventory: {0}")]
    Persist(#[source] BackendError),
    #[error("updating finalizers: {0}")]
    Finalizer(#[source] BackendError),
    #[error("detaching namespace {namespace}: {source}")]
    Cascade { namespace: String, #[source] source: BackendError },
}

impl ReconcileError {
    /// Metric label for the failing phase.
    pub fn phase(&self) -> &'static str {
        match self {
            ReconcileError::Fetch(_) => "fetch",
            ReconcileError::Inventory(_) => "read-inventory",
            ReconcileError::MalformedTemplate(_) => "render",
            ReconcileError::Apply(_) => "apply-resources",
            ReconcileError::Prune(_) => "prune",
            ReconcileError::Cleanup(_) => "cleanup",
            ReconcileError::Persist(_) => "persist-inventory",
            ReconcileError::Finalizer(_) => "finalizer",
            ReconcileError::Cascade { .. } => "cascade",
        }
    }

    /// False when retrying cannot succeed until the Class itself changes.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ReconcileError::MalformedTemplate(_))
    }

    pub(crate) fn from_apply(e: ApplyError) -> Self {
        match e {
            ApplyError::Render(r) => ReconcileError::MalformedTemplate(r),
            other => ReconcileError::Apply(other),
        }
    }
}
