//! In-memory backing store. Behaves like the API server where the
//! reconcilers can observe it: NotFound, resourceVersion conflicts,
//! finalizer-gated deletion and uid-stable re-apply.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use nsclass_core::{AnnotationPatch, InventoryItem, NamespaceClass, Rendered};
use nsclass_kubehub::{Backend, BackendError, BackendResult, Deleted, EventKind};
use rustc_hash::FxHashMap;
use tracing::debug;

/// A stored object: applied body plus server-assigned identity.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub uid: String,
    pub body: serde_json::Value,
    pub field_manager: String,
    /// Number of applies since creation.
    pub applies: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub namespace: String,
    pub kind: EventKind,
    pub reason: String,
    pub note: String,
}

/// One mutation seen by the store, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write {
    Apply(InventoryItem),
    Delete(InventoryItem),
    Annotations(String),
    RemoveLabel(String),
    Finalizers(String),
}

#[derive(Default)]
struct State {
    rv: u64,
    namespaces: BTreeMap<String, Namespace>,
    classes: BTreeMap<String, NamespaceClass>,
    objects: FxHashMap<InventoryItem, StoredObject>,
    events: Vec<RecordedEvent>,
    writes: Vec<Write>,
    fail_apply: FxHashMap<String, String>,
    fail_delete: FxHashMap<String, String>,
    fail_label: FxHashMap<String, String>,
    fail_annotations: bool,
}

impl State {
    fn next_rv(&mut self) -> String {
        self.rv += 1;
        self.rv.to_string()
    }

    fn stamp(&mut self, meta: &mut ObjectMeta) {
        if meta.uid.is_none() {
            meta.uid = Some(uuid::Uuid::new_v4().to_string());
        }
        meta.resource_version = Some(self.next_rv());
    }
}

fn check_rv(kind: &str, name: &str, want: Option<&str>, have: Option<&str>) -> BackendResult<()> {
    match want {
        Some(w) if Some(w) != have => Err(BackendError::Conflict(format!(
            "{} {}: resourceVersion {} is stale (current {:?})",
            kind, name, w, have
        ))),
        _ => Ok(()),
    }
}

/// Thread-safe in-memory store.
#[derive(Default)]
pub struct MemStore {
    state: Mutex<State>,
}

impl MemStore {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not wedge the others.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    // ---- seeding and user-side mutations ----

    pub fn put_namespace(&self, mut ns: Namespace) {
        let mut st = self.lock();
        st.stamp(&mut ns.metadata);
        let name = ns.metadata.name.clone().unwrap_or_default();
        st.namespaces.insert(name, ns);
    }

    pub fn put_class(&self, mut class: NamespaceClass) {
        let mut st = self.lock();
        st.stamp(&mut class.metadata);
        let name = class.metadata.name.clone().unwrap_or_default();
        st.classes.insert(name, class);
    }

    /// User edit of a namespace's labels (`None` removes).
    pub fn set_namespace_label(&self, ns: &str, key: &str, value: Option<&str>) {
        let mut st = self.lock();
        let rv = st.next_rv();
        if let Some(n) = st.namespaces.get_mut(ns) {
            let labels = n.metadata.labels.get_or_insert_with(BTreeMap::new);
            match value {
                Some(v) => { labels.insert(key.to_string(), v.to_string()); }
                None => { labels.remove(key); }
            }
            n.metadata.resource_version = Some(rv);
        }
    }

    /// Deletion request: sets the deletion timestamp while finalizers remain.
    pub fn delete_class(&self, name: &str) {
        let mut guard = self.lock();
        let st = &mut *guard;
        let rv = st.next_rv();
        let guarded = match st.classes.get(name) {
            Some(c) => c.metadata.finalizers.as_ref().map(|f| !f.is_empty()).unwrap_or(false),
            None => return,
        };
        if !guarded {
            st.classes.remove(name);
            return;
        }
        if let Some(c) = st.classes.get_mut(name) {
            c.metadata.deletion_timestamp.get_or_insert_with(|| Time(chrono::Utc::now()));
            c.metadata.resource_version = Some(rv);
        }
    }

    pub fn mark_namespace_deleting(&self, name: &str) {
        let mut st = self.lock();
        if let Some(n) = st.namespaces.get_mut(name) {
            n.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        }
    }

    /// Insert an object as if some earlier reconcile had applied it.
    pub fn seed_object(&self, item: InventoryItem, body: serde_json::Value) {
        let mut st = self.lock();
        let obj = StoredObject { uid: uuid::Uuid::new_v4().to_string(), body, field_manager: String::new(), applies: 1 };
        st.objects.insert(item, obj);
    }

    // ---- failure injection ----

    pub fn fail_apply_of_kind(&self, kind: &str, reason: &str) {
        self.lock().fail_apply.insert(kind.to_string(), reason.to_string());
    }

    pub fn fail_delete_of(&self, name: &str, reason: &str) {
        self.lock().fail_delete.insert(name.to_string(), reason.to_string());
    }

    pub fn fail_label_removal_on(&self, ns: &str, reason: &str) {
        self.lock().fail_label.insert(ns.to_string(), reason.to_string());
    }

    pub fn fail_annotation_writes(&self, on: bool) {
        self.lock().fail_annotations = on;
    }

    pub fn clear_failures(&self) {
        let mut st = self.lock();
        st.fail_apply.clear();
        st.fail_delete.clear();
        st.fail_label.clear();
        st.fail_annotations = false;
    }

    // ---- inspection ----

    pub fn namespace(&self, name: &str) -> Option<Namespace> { self.lock().namespaces.get(name).cloned() }

    pub fn class(&self, name: &str) -> Option<NamespaceClass> { self.lock().classes.get(name).cloned() }

    pub fn object(&self, item: &InventoryItem) -> Option<StoredObject> { self.lock().objects.get(item).cloned() }

    /// Stored object identities, sorted.
    pub fn objects(&self) -> Vec<InventoryItem> {
        let mut v: Vec<_> = self.lock().objects.keys().cloned().collect();
        v.sort();
        v
    }

    pub fn events(&self) -> Vec<RecordedEvent> { self.lock().events.clone() }

    pub fn writes(&self) -> Vec<Write> { self.lock().writes.clone() }

    pub fn take_writes(&self) -> Vec<Write> { std::mem::take(&mut self.lock().writes) }
}

#[async_trait]
impl Backend for MemStore {
    async fn get_namespace(&self, name: &str) -> BackendResult<Option<Namespace>> {
        Ok(self.lock().namespaces.get(name).cloned())
    }

    async fn list_namespaces(&self, key: &str, value: &str) -> BackendResult<Vec<Namespace>> {
        let st = self.lock();
        Ok(st
            .namespaces
            .values()
            .filter(|n| n.metadata.labels.as_ref().and_then(|l| l.get(key)).map(|v| v == value).unwrap_or(false))
            .cloned()
            .collect())
    }

    async fn get_class(&self, name: &str) -> BackendResult<Option<NamespaceClass>> {
        Ok(self.lock().classes.get(name).cloned())
    }

    async fn apply(&self, obj: &Rendered, field_manager: &str) -> BackendResult<InventoryItem> {
        let mut guard = self.lock();
        let st = &mut *guard;
        if let Some(reason) = st.fail_apply.get(&obj.item.kind) {
            return Err(BackendError::Rejected(reason.clone()));
        }
        if !st.namespaces.contains_key(&obj.item.namespace) {
            return Err(BackendError::NotFound(format!("namespace {}", obj.item.namespace)));
        }
        st.writes.push(Write::Apply(obj.item.clone()));
        match st.objects.get_mut(&obj.item) {
            Some(existing) => {
                existing.body = obj.body.clone();
                existing.field_manager = field_manager.to_string();
                existing.applies += 1;
            }
            None => {
                debug!(object = %obj.item, "created");
                let created = StoredObject {
                    uid: uuid::Uuid::new_v4().to_string(),
                    body: obj.body.clone(),
                    field_manager: field_manager.to_string(),
                    applies: 1,
                };
                st.objects.insert(obj.item.clone(), created);
            }
        }
        Ok(obj.item.clone())
    }

    async fn delete(&self, item: &InventoryItem) -> BackendResult<Deleted> {
        let mut st = self.lock();
        if let Some(reason) = st.fail_delete.get(&item.name) {
            return Err(BackendError::Rejected(reason.clone()));
        }
        st.writes.push(Write::Delete(item.clone()));
        Ok(match st.objects.remove(item) {
            Some(_) => Deleted::Removed,
            None => Deleted::AlreadyGone,
        })
    }

    async fn patch_namespace_annotations(
        &self,
        name: &str,
        resource_version: Option<&str>,
        patch: &AnnotationPatch,
    ) -> BackendResult<()> {
        let mut guard = self.lock();
        let st = &mut *guard;
        if st.fail_annotations {
            return Err(BackendError::Rejected("annotation writes disabled".into()));
        }
        let rv = st.next_rv();
        let ns = st.namespaces.get_mut(name).ok_or_else(|| BackendError::NotFound(name.to_string()))?;
        check_rv("namespace", name, resource_version, ns.metadata.resource_version.as_deref())?;
        patch.apply_to(ns.metadata.annotations.get_or_insert_with(BTreeMap::new));
        ns.metadata.resource_version = Some(rv);
        st.writes.push(Write::Annotations(name.to_string()));
        Ok(())
    }

    async fn remove_namespace_label(&self, name: &str, key: &str) -> BackendResult<()> {
        let mut guard = self.lock();
        let st = &mut *guard;
        if let Some(reason) = st.fail_label.get(name) {
            return Err(BackendError::Rejected(reason.clone()));
        }
        let rv = st.next_rv();
        let ns = st.namespaces.get_mut(name).ok_or_else(|| BackendError::NotFound(name.to_string()))?;
        if let Some(labels) = ns.metadata.labels.as_mut() {
            labels.remove(key);
        }
        ns.metadata.resource_version = Some(rv);
        st.writes.push(Write::RemoveLabel(name.to_string()));
        Ok(())
    }

    async fn set_class_finalizers(
        &self,
        name: &str,
        resource_version: Option<&str>,
        finalizers: Vec<String>,
    ) -> BackendResult<()> {
        let mut guard = self.lock();
        let st = &mut *guard;
        let rv = st.next_rv();
        let class = st.classes.get_mut(name).ok_or_else(|| BackendError::NotFound(name.to_string()))?;
        check_rv("namespaceclass", name, resource_version, class.metadata.resource_version.as_deref())?;
        let release = finalizers.is_empty() && class.metadata.deletion_timestamp.is_some();
        class.metadata.finalizers = Some(finalizers);
        class.metadata.resource_version = Some(rv);
        if release {
            st.classes.remove(name);
        }
        st.writes.push(Write::Finalizers(name.to_string()));
        Ok(())
    }

    async fn publish_event(&self, ns: &Namespace, kind: EventKind, reason: &str, note: String) -> BackendResult<()> {
        let namespace = ns.metadata.name.clone().unwrap_or_default();
        self.lock().events.push(RecordedEvent { namespace, kind, reason: reason.to_string(), note });
        Ok(())
    }
}

/// Namespace fixture with optional class label.
pub fn namespace(name: &str, class: Option<&str>) -> Namespace {
    let labels = class.map(|c| BTreeMap::from([(nsclass_core::CLASS_LABEL.to_string(), c.to_string())]));
    Namespace {
        metadata: ObjectMeta { name: Some(name.to_string()), labels, ..Default::default() },
        ..Default::default()
    }
}
