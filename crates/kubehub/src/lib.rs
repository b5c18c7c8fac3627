//! Backing-store boundary: the get/list/apply/delete/patch capabilities the
//! reconcilers consume, and the kube-rs implementation of them.

#![forbid(unsafe_code)]

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::{
    api::{Api, DeleteParams, ListParams, Patch, PatchParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    discovery::{Discovery, Scope},
    runtime::events::{Event, EventType, Recorder, Reporter},
    Client, Resource,
};
use metrics::counter;
use nsclass_core::{
    AnnotationPatch, InventoryItem, NamespaceClass, Rendered, CONTROLLER_NAME, DISCOVERY_REFRESH_METRIC,
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("kind not served by the cluster: {0}")]
    UnknownKind(String),
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("kube: {0}")]
    Kube(#[source] kube::Error),
}

impl From<kube::Error> for BackendError {
    fn from(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(ae) if ae.code == 404 => BackendError::NotFound(ae.message),
            kube::Error::Api(ae) if ae.code == 409 => BackendError::Conflict(ae.message),
            // Invalid object, forbidden or unprocessable: retrying the same body cannot help.
            kube::Error::Api(ae) if matches!(ae.code, 400 | 403 | 422) => {
                BackendError::Rejected(format!("{} ({})", ae.message, ae.reason))
            }
            other => BackendError::Kube(other),
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Outcome of a delete by identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deleted {
    Removed,
    AlreadyGone,
}

/// Warning or informational event attached to a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Normal,
    Warning,
}

/// Capabilities the reconcilers need from the backing store.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn get_namespace(&self, name: &str) -> BackendResult<Option<Namespace>>;

    /// Namespaces whose label `key` equals `value`.
    async fn list_namespaces(&self, key: &str, value: &str) -> BackendResult<Vec<Namespace>>;

    async fn get_class(&self, name: &str) -> BackendResult<Option<NamespaceClass>>;

    /// Server-side apply with `field_manager`, forcing conflicting fields.
    async fn apply(&self, obj: &Rendered, field_manager: &str) -> BackendResult<InventoryItem>;

    async fn delete(&self, item: &InventoryItem) -> BackendResult<Deleted>;

    /// Merge-patch annotations, conditional on `resource_version` when given.
    async fn patch_namespace_annotations(
        &self,
        name: &str,
        resource_version: Option<&str>,
        patch: &AnnotationPatch,
    ) -> BackendResult<()>;

    async fn remove_namespace_label(&self, name: &str, key: &str) -> BackendResult<()>;

    /// Replace the class finalizer list, conditional on `resource_version`.
    async fn set_class_finalizers(
        &self,
        name: &str,
        resource_version: Option<&str>,
        finalizers: Vec<String>,
    ) -> BackendResult<()>;

    async fn publish_event(
        &self,
        ns: &Namespace,
        kind: EventKind,
        reason: &str,
        note: String,
    ) -> BackendResult<()>;
}

/// Label selector string `key=value`.
pub fn label_selector(key: &str, value: &str) -> String {
    format!("{}={}", key, value)
}

/// Merge patch removing one label.
pub fn label_removal_patch(key: &str) -> serde_json::Value {
    let mut labels = serde_json::Map::new();
    labels.insert(key.to_string(), serde_json::Value::Null);
    serde_json::json!({ "metadata": { "labels": labels } })
}

/// Merge patch replacing the finalizer list.
pub fn finalizers_patch(resource_version: Option<&str>, finalizers: &[String]) -> serde_json::Value {
    let mut meta = serde_json::Map::new();
    meta.insert("finalizers".into(), serde_json::json!(finalizers));
    if let Some(rv) = resource_version {
        meta.insert("resourceVersion".into(), serde_json::Value::String(rv.to_string()));
    }
    serde_json::json!({ "metadata": meta })
}

fn gvk_of(item: &InventoryItem) -> GroupVersionKind {
    let (group, version) = item.group_version();
    GroupVersionKind::gvk(group, version, &item.kind)
}

fn gvk_key(gvk: &GroupVersionKind) -> String {
    if gvk.group.is_empty() {
        format!("{}/{}", gvk.version, gvk.kind)
    } else {
        format!("{}/{}/{}", gvk.group, gvk.version, gvk.kind)
    }
}

/// kube-rs implementation. Arbitrary kinds are resolved through a cached
/// discovery run that is refreshed once on a miss.
pub struct KubeBackend {
    client: Client,
    discovery: RwLock<Option<Discovery>>,
}

impl KubeBackend {
    pub fn new(client: Client) -> Self {
        Self { client, discovery: RwLock::new(None) }
    }

    async fn refresh_discovery(&self) -> BackendResult<()> {
        let started = std::time::Instant::now();
        let discovery = Discovery::new(self.client.clone()).run().await?;
        info!(groups = discovery.groups().count(), took_ms = %started.elapsed().as_millis(), "api discovery refreshed");
        counter!(DISCOVERY_REFRESH_METRIC).increment(1);
        *self.discovery.write().await = Some(discovery);
        Ok(())
    }

    async fn lookup(&self, gvk: &GroupVersionKind) -> Option<(ApiResource, bool)> {
        let guard = self.discovery.read().await;
        let (ar, caps) = guard.as_ref()?.resolve_gvk(gvk)?;
        Some((ar, matches!(caps.scope, Scope::Namespaced)))
    }

    async fn find_api_resource(&self, gvk: &GroupVersionKind) -> BackendResult<(ApiResource, bool)> {
        if let Some(found) = self.lookup(gvk).await {
            return Ok(found);
        }
        // CRDs installed after the last run only show up after a refresh.
        self.refresh_discovery().await?;
        self.lookup(gvk).await.ok_or_else(|| BackendError::UnknownKind(gvk_key(gvk)))
    }

    async fn dynamic_api(&self, item: &InventoryItem) -> BackendResult<Api<DynamicObject>> {
        let (ar, namespaced) = self.find_api_resource(&gvk_of(item)).await?;
        Ok(if namespaced {
            Api::namespaced_with(self.client.clone(), &item.namespace, &ar)
        } else {
            Api::all_with(self.client.clone(), &ar)
        })
    }
}

#[async_trait]
impl Backend for KubeBackend {
    async fn get_namespace(&self, name: &str) -> BackendResult<Option<Namespace>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn list_namespaces(&self, key: &str, value: &str) -> BackendResult<Vec<Namespace>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let lp = ListParams::default().labels(&label_selector(key, value));
        Ok(api.list(&lp).await?.items)
    }

    async fn get_class(&self, name: &str) -> BackendResult<Option<NamespaceClass>> {
        let api: Api<NamespaceClass> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn apply(&self, obj: &Rendered, field_manager: &str) -> BackendResult<InventoryItem> {
        let api = self.dynamic_api(&obj.item).await?;
        let pp = PatchParams::apply(field_manager).force();
        let applied = api.patch(&obj.item.name, &pp, &Patch::Apply(&obj.body)).await?;
        debug!(object = %obj.item, rv = ?applied.metadata.resource_version, "server-side apply ok");
        Ok(obj.item.clone())
    }

    async fn delete(&self, item: &InventoryItem) -> BackendResult<Deleted> {
        let api = match self.dynamic_api(item).await {
            Ok(api) => api,
            // A kind no longer served cannot have live objects left.
            Err(BackendError::UnknownKind(k)) => {
                warn!(kind = %k, object = %item, "kind no longer served; treating as deleted");
                return Ok(Deleted::AlreadyGone);
            }
            Err(e) => return Err(e),
        };
        match api.delete(&item.name, &DeleteParams::background()).await.map_err(BackendError::from) {
            Ok(_) => Ok(Deleted::Removed),
            Err(BackendError::NotFound(_)) => Ok(Deleted::AlreadyGone),
            Err(e) => Err(e),
        }
    }

    async fn patch_namespace_annotations(
        &self,
        name: &str,
        resource_version: Option<&str>,
        patch: &AnnotationPatch,
    ) -> BackendResult<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let body = patch.to_merge_patch(resource_version);
        api.patch(name, &PatchParams::default(), &Patch::Merge(&body)).await?;
        Ok(())
    }

    async fn remove_namespace_label(&self, name: &str, key: &str) -> BackendResult<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.patch(name, &PatchParams::default(), &Patch::Merge(&label_removal_patch(key))).await?;
        Ok(())
    }

    async fn set_class_finalizers(
        &self,
        name: &str,
        resource_version: Option<&str>,
        finalizers: Vec<String>,
    ) -> BackendResult<()> {
        let api: Api<NamespaceClass> = Api::all(self.client.clone());
        let body = finalizers_patch(resource_version, &finalizers);
        api.patch(name, &PatchParams::default(), &Patch::Merge(&body)).await?;
        Ok(())
    }

    async fn publish_event(
        &self,
        ns: &Namespace,
        kind: EventKind,
        reason: &str,
        note: String,
    ) -> BackendResult<()> {
        let reporter = Reporter { controller: CONTROLLER_NAME.to_string(), instance: std::env::var("POD_NAME").ok() };
        let recorder = Recorder::new(self.client.clone(), reporter, ns.object_ref(&()));
        let type_ = match kind {
            EventKind::Normal => EventType::Normal,
            EventKind::Warning => EventType::Warning,
        };
        recorder
            .publish(Event { type_, reason: reason.to_string(), note: Some(note), action: "Reconcile".into(), secondary: None })
            .await?;
        Ok(())
    }
}
