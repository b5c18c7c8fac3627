//! Inventory codec: the list of objects previously applied into a namespace,
//! persisted as a JSON array in a namespace annotation.
//!
//! Wire convention: an absent key (or empty string) means "no inventory".
//! An empty inventory is never written; the key is removed instead.

use std::collections::BTreeMap;
use std::fmt;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::{ATTACHED_CLASS_ANNOTATION, INVENTORY_ANNOTATION};

/// Identity of one applied object. The 4-tuple is the uniqueness key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

impl InventoryItem {
    pub fn new(api_version: &str, kind: &str, name: &str, namespace: &str) -> Self {
        Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }

    /// `(group, version)` split of `apiVersion`; core kinds have an empty group.
    pub fn group_version(&self) -> (&str, &str) {
        match self.api_version.split_once('/') {
            Some((g, v)) => (g, v),
            None => ("", self.api_version.as_str()),
        }
    }
}

impl fmt::Display for InventoryItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} {}/{}", self.api_version, self.kind, self.namespace, self.name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("inventory annotation is not a valid record list: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Read the inventory from a namespace's annotations.
pub fn decode(annotations: Option<&BTreeMap<String, String>>) -> Result<Vec<InventoryItem>, CodecError> {
    let raw = match annotations.and_then(|a| a.get(INVENTORY_ANNOTATION)) {
        Some(s) if !s.trim().is_empty() => s,
        _ => return Ok(Vec::new()),
    };
    let items: Vec<InventoryItem> = serde_json::from_str(raw)?;
    Ok(dedup(items))
}

/// Serialize an inventory. `None` means the annotation should be removed.
pub fn encode(items: &[InventoryItem]) -> Option<String> {
    if items.is_empty() {
        return None;
    }
    let items = dedup(items.to_vec());
    // A Vec of plain string structs always serializes.
    serde_json::to_string(&items).ok()
}

/// Drop repeated records, keeping first-seen order.
pub fn dedup(items: Vec<InventoryItem>) -> Vec<InventoryItem> {
    let mut seen = FxHashSet::default();
    items.into_iter().filter(|i| seen.insert(i.clone())).collect()
}

/// Records of `old` whose key is absent from `keep`.
pub fn prune_set<'a>(old: &'a [InventoryItem], keep: &[InventoryItem]) -> Vec<&'a InventoryItem> {
    let keep: FxHashSet<&InventoryItem> = keep.iter().collect();
    old.iter().filter(|i| !keep.contains(i)).collect()
}

/// Minimal annotation writes moving a namespace to a target inventory state.
/// `None` values remove the key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationPatch {
    pub changes: BTreeMap<String, Option<String>>,
}

impl AnnotationPatch {
    /// Target state: `inventory` recorded for `class`.
    /// An empty inventory removes the inventory key; `class == None` removes the attached-class key.
    pub fn to_target(
        current: Option<&BTreeMap<String, String>>,
        class: Option<&str>,
        inventory: &[InventoryItem],
    ) -> Self {
        let mut patch = Self::default();
        patch.set(current, INVENTORY_ANNOTATION, encode(inventory));
        patch.set(current, ATTACHED_CLASS_ANNOTATION, class.map(str::to_string));
        patch
    }

    /// Target state after full cleanup: both keys absent.
    pub fn cleared(current: Option<&BTreeMap<String, String>>) -> Self {
        Self::to_target(current, None, &[])
    }

    fn set(&mut self, current: Option<&BTreeMap<String, String>>, key: &str, want: Option<String>) {
        let have = current.and_then(|a| a.get(key));
        if have != want.as_ref() {
            self.changes.insert(key.to_string(), want);
        }
    }

    pub fn is_empty(&self) -> bool { self.changes.is_empty() }

    /// JSON merge patch body (`null` removes a key).
    pub fn to_merge_patch(&self, resource_version: Option<&str>) -> serde_json::Value {
        let mut meta = serde_json::Map::new();
        meta.insert("annotations".into(), serde_json::to_value(&self.changes).unwrap_or_default());
        if let Some(rv) = resource_version {
            meta.insert("resourceVersion".into(), serde_json::Value::String(rv.to_string()));
        }
        serde_json::json!({ "metadata": meta })
    }

    /// Apply to a plain annotation map, as the API server would.
    pub fn apply_to(&self, annotations: &mut BTreeMap<String, String>) {
        for (k, v) in &self.changes {
            match v {
                Some(v) => { annotations.insert(k.clone(), v.clone()); }
                None => { annotations.remove(k); }
            }
        }
    }
}
