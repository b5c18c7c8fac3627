//! Class Reconciler: finalizer bookkeeping and the Cascade/Orphan decision
//! when a NamespaceClass is deleted.

use nsclass_core::{DeletionPolicy, NamespaceClass, CLASS_FINALIZER, CLASS_LABEL};
use nsclass_kubehub::BackendError;
use tracing::{info, instrument, warn};

use crate::{Context, ReconcileError};

/// Lifecycle state of a class as stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassPhase {
    Active { finalized: bool },
    Terminating(DeletionPolicy),
    /// Deletion requested and our finalizer already gone.
    Released,
}

impl ClassPhase {
    pub fn of(class: &NamespaceClass) -> Self {
        let finalized = class.has_finalizer(CLASS_FINALIZER);
        match (class.is_terminating(), finalized) {
            (false, f) => ClassPhase::Active { finalized: f },
            (true, true) => ClassPhase::Terminating(class.policy()),
            (true, false) => ClassPhase::Released,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassOutcome {
    Gone,
    FinalizerAdded,
    Active,
    /// Finalizer removed after cascade or orphan handling.
    Finalized { policy: DeletionPolicy, detached: usize },
    Released,
}

#[instrument(skip(ctx), fields(class = %name))]
pub async fn reconcile_class(ctx: &Context, name: &str) -> Result<ClassOutcome, ReconcileError> {
    let class = match ctx.backend.get_class(name).await.map_err(ReconcileError::Fetch)? {
        Some(c) => c,
        None => return Ok(ClassOutcome::Gone),
    };
    let rv = class.metadata.resource_version.as_deref();
    let finalizers = class.metadata.finalizers.clone().unwrap_or_default();

    match ClassPhase::of(&class) {
        ClassPhase::Active { finalized: true } => Ok(ClassOutcome::Active),
        ClassPhase::Active { finalized: false } => {
            let mut next = finalizers;
            next.push(CLASS_FINALIZER.to_string());
            ctx.backend.set_class_finalizers(name, rv, next).await.map_err(ReconcileError::Finalizer)?;
            info!("added finalizer to NamespaceClass");
            Ok(ClassOutcome::FinalizerAdded)
        }
        ClassPhase::Released => Ok(ClassOutcome::Released),
        ClassPhase::Terminating(policy) => {
            info!(?policy, "NamespaceClass is being deleted");
            let detached = match policy {
                DeletionPolicy::Cascade => detach_all(ctx, name).await?,
                DeletionPolicy::Orphan => 0,
            };
            let next: Vec<String> = finalizers.into_iter().filter(|f| f != CLASS_FINALIZER).collect();
            match ctx.backend.set_class_finalizers(name, rv, next).await {
                Ok(()) | Err(BackendError::NotFound(_)) => {}
                Err(e) => return Err(ReconcileError::Finalizer(e)),
            }
            info!(?policy, detached, "removed finalizer from NamespaceClass");
            Ok(ClassOutcome::Finalized { policy, detached })
        }
    }
}

/// Remove the class label from every namespace carrying it. The Namespace
/// Reconciler then sees the label gone and prunes on its own.
async fn detach_all(ctx: &Context, class: &str) -> Result<usize, ReconcileError> {
    let namespaces = ctx
        .backend
        .list_namespaces(CLASS_LABEL, class)
        .await
        .map_err(|source| ReconcileError::Cascade { namespace: "*".into(), source })?;
    let mut detached = 0usize;
    for ns in namespaces {
        let ns_name = ns.metadata.name.unwrap_or_default();
        match ctx.backend.remove_namespace_label(&ns_name, CLASS_LABEL).await {
            Ok(()) => {
                detached += 1;
                info!(namespace = %ns_name, "detached NamespaceClass from Namespace (cascade)");
            }
            Err(BackendError::NotFound(_)) => {}
            Err(source) => {
                warn!(namespace = %ns_name, error = %source, "failed to remove label during cascade delete");
                return Err(ReconcileError::Cascade { namespace: ns_name, source });
            }
        }
    }
    Ok(detached)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use nsclass_core::NamespaceClassSpec;

    fn class(finalized: bool, deleting: bool, policy: Option<DeletionPolicy>) -> NamespaceClass {
        let mut c = NamespaceClass::new("web", NamespaceClassSpec { deletion_policy: policy, ..Default::default() });
        if finalized {
            c.metadata.finalizers = Some(vec!["other/keep".into(), CLASS_FINALIZER.into()]);
        }
        if deleting {
            c.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        }
        c
    }

    #[test]
    fn phases() {
        assert_eq!(ClassPhase::of(&class(false, false, None)), ClassPhase::Active { finalized: false });
        assert_eq!(ClassPhase::of(&class(true, false, None)), ClassPhase::Active { finalized: true });
        assert_eq!(ClassPhase::of(&class(true, true, None)), ClassPhase::Terminating(DeletionPolicy::Cascade));
        assert_eq!(
            ClassPhase::of(&class(true, true, Some(DeletionPolicy::Orphan))),
            ClassPhase::Terminating(DeletionPolicy::Orphan)
        );
        assert_eq!(ClassPhase::of(&class(false, true, None)), ClassPhase::Released);
    }
}
