//! Namespace Reconciler: keeps the objects of the attached class applied in
//! a namespace, prunes what is no longer desired and records the inventory.

use std::time::Instant;

use k8s_openapi::api::core::v1::Namespace;
use nsclass_core::{inventory, AnnotationPatch, Attachment};
use nsclass_kubehub::EventKind;
use tracing::{debug, info, instrument, warn};

use crate::{metrics, Context, ReconcileError};

/// What a namespace pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NsOutcome {
    /// Namespace does not exist.
    Gone,
    /// Namespace is being deleted; owner references take care of the objects.
    Terminating,
    /// No label and nothing recorded.
    Unattached,
    /// Label removed; previous class's objects pruned and annotations cleared.
    CleanedUp { class: String, pruned: usize },
    /// Label names a class that does not exist. Not retried.
    ClassMissing { class: String },
    /// Referenced class is being deleted; its own reconciler decides.
    ClassTerminating { class: String },
    Synced { class: String, applied: usize, pruned: usize },
}

/// Reconcile the namespace `name` against its attached class.
#[instrument(skip(ctx), fields(namespace = %name))]
pub async fn reconcile_namespace(ctx: &Context, name: &str) -> Result<NsOutcome, ReconcileError> {
    let ns = match ctx.backend.get_namespace(name).await.map_err(ReconcileError::Fetch)? {
        Some(ns) => ns,
        None => return Ok(NsOutcome::Gone),
    };
    if ns.metadata.deletion_timestamp.is_some() {
        debug!("namespace terminating; leaving cleanup to garbage collection");
        return Ok(NsOutcome::Terminating);
    }

    let started = Instant::now();
    let attachment = Attachment::of(&ns);
    let res = match &attachment {
        Attachment::Unattached => Ok(NsOutcome::Unattached),
        Attachment::Detaching(prev) => cleanup(ctx, &ns, prev).await,
        Attachment::Attached(class) => sync(ctx, &ns, class).await,
    };
    metrics::reconcile_duration(name, attachment.class(), started.elapsed().as_secs_f64());
    if let Err(e) = &res {
        metrics::reconcile_error(name, e.phase());
    }
    res
}

async fn cleanup(ctx: &Context, ns: &Namespace, prev: &str) -> Result<NsOutcome, ReconcileError> {
    info!(previous_class = %prev, "class label removed, cleaning up resources");
    let old = inventory::decode(ns.metadata.annotations.as_ref())?;
    let pruned = nsclass_apply::prune(ctx.backend.as_ref(), prev, &old, &[])
        .await
        .map_err(ReconcileError::Cleanup)?;
    persist(ctx, ns, AnnotationPatch::cleared(ns.metadata.annotations.as_ref())).await?;
    Ok(NsOutcome::CleanedUp { class: prev.to_string(), pruned })
}

async fn sync(ctx: &Context, ns: &Namespace, class_name: &str) -> Result<NsOutcome, ReconcileError> {
    let class = match ctx.backend.get_class(class_name).await.map_err(ReconcileError::Fetch)? {
        Some(c) => c,
        None => {
            info!(class = %class_name, "referenced NamespaceClass not found");
            ctx.event(ns, EventKind::Warning, "ClassMissing", format!("NamespaceClass {} not found", class_name)).await;
            metrics::reconcile_error(ns.metadata.name.as_deref().unwrap_or_default(), "class-missing");
            return Ok(NsOutcome::ClassMissing { class: class_name.to_string() });
        }
    };
    if class.is_terminating() {
        debug!(class = %class_name, "class terminating; waiting for detach or orphan");
        return Ok(NsOutcome::ClassTerminating { class: class_name.to_string() });
    }

    let old = inventory::decode(ns.metadata.annotations.as_ref())?;

    let applied = match nsclass_apply::apply_all(ctx.backend.as_ref(), ns, &class).await {
        Ok(applied) => applied,
        Err(e) => {
            let e = ReconcileError::from_apply(e);
            warn!(error = %e, "failed to apply resources");
            ctx.event(ns, EventKind::Warning, "ApplyFailed", format!("Failed to apply resources: {}", e)).await;
            return Err(e);
        }
    };

    let pruned = match nsclass_apply::prune(ctx.backend.as_ref(), class_name, &old, &applied).await {
        Ok(n) => n,
        Err(e) => {
            warn!(error = %e, "failed to prune resources");
            ctx.event(ns, EventKind::Warning, "PruneFailed", format!("Failed to prune resources: {}", e)).await;
            return Err(ReconcileError::Prune(e));
        }
    };

    persist(ctx, ns, AnnotationPatch::to_target(ns.metadata.annotations.as_ref(), Some(class_name), &applied)).await?;
    info!(class = %class_name, applied = applied.len(), pruned, "namespace reconciled");
    Ok(NsOutcome::Synced { class: class_name.to_string(), applied: applied.len(), pruned })
}

/// Last step of a pass; skipped when the annotations already match.
async fn persist(ctx: &Context, ns: &Namespace, patch: AnnotationPatch) -> Result<(), ReconcileError> {
    if patch.is_empty() {
        return Ok(());
    }
    let name = ns.metadata.name.as_deref().unwrap_or_default();
    ctx.backend
        .patch_namespace_annotations(name, ns.metadata.resource_version.as_deref(), &patch)
        .await
        .map_err(ReconcileError::Persist)
}
