//! Render, apply and prune for one namespace.
//!
//! `apply_all` walks a class's templates in order (render then apply per
//! entry, stopping at the first failure) and returns the applied inventory.
//! `prune` deletes what the previous inventory holds and the new one does not.

#![forbid(unsafe_code)]

pub mod render;

use k8s_openapi::api::core::v1::Namespace;
use metrics::counter;
use nsclass_core::{
    inventory, InventoryItem, NamespaceClass, APPLIED_RESOURCES_METRIC, CONTROLLER_NAME, PRUNED_RESOURCES_METRIC,
};
use nsclass_kubehub::{Backend, BackendError, Deleted};
use tracing::{debug, info};

pub use render::{render, RenderError};

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("failed to apply {object}: {source}")]
    Apply { object: InventoryItem, #[source] source: BackendError },
    #[error("failed to prune {object}: {source}")]
    Prune { object: InventoryItem, #[source] source: BackendError },
}

/// Apply every template of `class` into `ns`, in sequence order.
/// Entries applied before a failure stay applied.
pub async fn apply_all(
    backend: &dyn Backend,
    ns: &Namespace,
    class: &NamespaceClass,
) -> Result<Vec<InventoryItem>, ApplyError> {
    let class_name = class.metadata.name.as_deref().unwrap_or_default();
    let ns_name = ns.metadata.name.as_deref().unwrap_or_default();
    let mut applied = Vec::with_capacity(class.spec.resources.len());
    for (index, entry) in class.spec.resources.iter().enumerate() {
        let rendered = render(&entry.template, index, class_name, ns)?;
        let item = backend
            .apply(&rendered, CONTROLLER_NAME)
            .await
            .map_err(|source| ApplyError::Apply { object: rendered.item.clone(), source })?;
        debug!(object = %item, "applied resource");
        counter!(
            APPLIED_RESOURCES_METRIC,
            "namespace" => ns_name.to_string(), "class" => class_name.to_string(), "kind" => item.kind.clone()
        )
        .increment(1);
        applied.push(item);
    }
    Ok(inventory::dedup(applied))
}

/// Delete every record of `old` missing from `keep`. Already-absent objects
/// count as deleted; any other failure aborts the remaining deletes.
pub async fn prune(
    backend: &dyn Backend,
    class: &str,
    old: &[InventoryItem],
    keep: &[InventoryItem],
) -> Result<usize, ApplyError> {
    let mut pruned = 0usize;
    for item in inventory::prune_set(old, keep) {
        info!(object = %item, "pruning resource");
        match backend.delete(item).await {
            Ok(Deleted::Removed) => {}
            Ok(Deleted::AlreadyGone) => debug!(object = %item, "already gone"),
            Err(source) => return Err(ApplyError::Prune { object: item.clone(), source }),
        }
        counter!(
            PRUNED_RESOURCES_METRIC,
            "namespace" => item.namespace.clone(), "class" => class.to_string(), "kind" => item.kind.clone()
        )
        .increment(1);
        pruned += 1;
    }
    Ok(pruned)
}
