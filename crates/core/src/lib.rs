//! NamespaceClass core types: the Class resource, label/annotation keys,
//! the inventory codec and the namespace attachment model.

#![forbid(unsafe_code)]

pub mod attachment;
pub mod class;
pub mod inventory;

use serde::{Deserialize, Serialize};

pub use attachment::Attachment;
pub use class::{DeletionPolicy, NamespaceClass, NamespaceClassSpec, ResourceTemplate};
pub use inventory::{AnnotationPatch, CodecError, InventoryItem};

/// Label on a Namespace selecting the class it opts into.
pub const CLASS_LABEL: &str = "namespaceclass.akuity.io/name";
/// Stamped on every rendered object.
pub const MANAGED_BY_LABEL: &str = "namespaceclass.akuity.io/managed-by";
/// Stamped on every rendered object with the owning class name.
pub const SOURCE_CLASS_LABEL: &str = "namespaceclass.akuity.io/source-class";
/// JSON array of previously applied objects.
pub const INVENTORY_ANNOTATION: &str = "namespaceclass.akuity.io/inventory";
/// Class name active when the inventory was last written.
pub const ATTACHED_CLASS_ANNOTATION: &str = "namespaceclass.akuity.io/attached-class";
/// Finalizer guarding Class removal until cascade/orphan handling ran.
pub const CLASS_FINALIZER: &str = "namespaceclass.core.akuity.io/finalizer";
/// Field manager for server-side apply, event reporter and managed-by value.
pub const CONTROLLER_NAME: &str = "namespace-class-controller";

/// Counter of objects applied, labelled by namespace, class and kind.
pub const APPLIED_RESOURCES_METRIC: &str = "namespaceclass_applied_resources_total";
/// Counter of objects pruned, labelled by namespace, class and kind.
pub const PRUNED_RESOURCES_METRIC: &str = "namespaceclass_pruned_resources_total";
pub const RECONCILE_ERRORS_METRIC: &str = "namespaceclass_reconcile_errors_total";
pub const RECONCILE_DURATION_METRIC: &str = "namespaceclass_reconcile_duration_seconds";
pub const DISCOVERY_REFRESH_METRIC: &str = "namespaceclass_discovery_refresh_total";

/// A template rendered for one namespace, ready to be applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rendered {
    /// Identity of the object once applied.
    pub item: InventoryItem,
    pub body: serde_json::Value,
}
