//! The cluster-scoped `NamespaceClass` resource.

use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// What happens to attached namespaces when a class is deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletionPolicy {
    /// Detach every namespace so its own reconcile prunes the objects.
    #[default]
    Cascade,
    /// Leave namespaces and created objects alone.
    Orphan,
}

/// One entry of `spec.resources`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceTemplate {
    /// Arbitrary object payload (any apiVersion/kind).
    pub template: serde_json::Value,
}

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(group = "core.akuity.io", version = "v1", kind = "NamespaceClass", schema = "disabled")]
#[serde(rename_all = "camelCase")]
pub struct NamespaceClassSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceTemplate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<DeletionPolicy>,
}

impl NamespaceClass {
    /// Effective policy; unset means `Cascade`.
    pub fn policy(&self) -> DeletionPolicy {
        self.spec.deletion_policy.unwrap_or_default()
    }

    pub fn is_terminating(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, token: &str) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .map(|f| f.iter().any(|x| x == token))
            .unwrap_or(false)
    }
}
