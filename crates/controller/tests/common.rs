#![allow(dead_code)]

use std::sync::Arc;

use nsclass_controller::{Backoff, Context};
use nsclass_core::{DeletionPolicy, InventoryItem, NamespaceClass, NamespaceClassSpec, ResourceTemplate};
use nsclass_store::MemStore;

pub fn setup() -> (Arc<MemStore>, Context) {
    let store = Arc::new(MemStore::new());
    let ctx = Context::new(store.clone(), Backoff::default());
    (store, ctx)
}

pub fn config_map(name: &str) -> serde_json::Value {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": { "name": name, "labels": { "app": name } },
        "data": { "owner": name }
    })
}

pub fn class(name: &str, templates: Vec<serde_json::Value>, policy: Option<DeletionPolicy>) -> NamespaceClass {
    let resources = templates.into_iter().map(|template| ResourceTemplate { template }).collect();
    NamespaceClass::new(name, NamespaceClassSpec { resources, deletion_policy: policy })
}

pub fn cm(name: &str, ns: &str) -> InventoryItem {
    InventoryItem::new("v1", "ConfigMap", name, ns)
}

pub fn inventory_of(store: &MemStore, ns: &str) -> Vec<InventoryItem> {
    let ns = store.namespace(ns).expect("namespace exists");
    nsclass_core::inventory::decode(ns.metadata.annotations.as_ref()).expect("inventory decodes")
}

pub fn attached_class_of(store: &MemStore, ns: &str) -> Option<String> {
    store
        .namespace(ns)
        .and_then(|n| n.metadata.annotations)
        .and_then(|a| a.get(nsclass_core::ATTACHED_CLASS_ANNOTATION).cloned())
}
