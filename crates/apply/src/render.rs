//! Template renderer: one class template + one target namespace in, one
//! fully addressed object out. Pure; the class's stored template is never mutated.

use k8s_openapi::api::core::v1::Namespace;
use nsclass_core::{InventoryItem, Rendered, CONTROLLER_NAME, MANAGED_BY_LABEL, SOURCE_CLASS_LABEL};
use serde_json::{json, Map, Value as Json};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("template #{index}: {reason}")]
    Malformed { index: usize, reason: String },
}

fn required_str<'a>(v: &'a Json, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(v, |cur, key| cur.get(key))
        .and_then(Json::as_str)
        .filter(|s| !s.is_empty())
}

/// Render template `index` of class `class` into namespace `ns`.
pub fn render(template: &Json, index: usize, class: &str, ns: &Namespace) -> Result<Rendered, RenderError> {
    let bad = |reason: &str| RenderError::Malformed { index, reason: reason.to_string() };
    let ns_name = ns.metadata.name.as_deref().ok_or_else(|| bad("target namespace has no name"))?;

    if !template.is_object() {
        return Err(bad("template is not an object"));
    }
    let api_version = required_str(template, &["apiVersion"]).ok_or_else(|| bad("missing apiVersion"))?;
    let kind = required_str(template, &["kind"]).ok_or_else(|| bad("missing kind"))?;
    let name = required_str(template, &["metadata", "name"]).ok_or_else(|| bad("missing metadata.name"))?;
    let item = InventoryItem::new(api_version, kind, name, ns_name);

    let mut body = template.clone();
    let meta = body
        .get_mut("metadata")
        .and_then(Json::as_object_mut)
        .ok_or_else(|| bad("metadata is not an object"))?;
    meta.insert("namespace".into(), Json::String(ns_name.to_string()));

    let labels = meta.entry("labels").or_insert_with(|| Json::Object(Map::new()));
    let labels = labels.as_object_mut().ok_or_else(|| bad("metadata.labels is not an object"))?;
    labels.insert(MANAGED_BY_LABEL.into(), Json::String(CONTROLLER_NAME.into()));
    labels.insert(SOURCE_CLASS_LABEL.into(), Json::String(class.to_string()));

    // Back-reference for the API server's garbage collector; never followed here.
    meta.insert(
        "ownerReferences".into(),
        json!([{
            "apiVersion": "v1",
            "kind": "Namespace",
            "name": ns_name,
            "uid": ns.metadata.uid.clone().unwrap_or_default(),
            "controller": true,
            "blockOwnerDeletion": true,
        }]),
    );

    Ok(Rendered { item, body })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn ns(name: &str) -> Namespace {
        Namespace {
            metadata: ObjectMeta { name: Some(name.into()), uid: Some("uid-1".into()), ..Default::default() },
            ..Default::default()
        }
    }

    #[test]
    fn injects_namespace_labels_and_owner() {
        let t = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": "cfg", "namespace": "elsewhere", "labels": { "team": "a" } },
            "data": { "k": "v" }
        });
        let r = render(&t, 0, "web", &ns("team-a")).unwrap();
        assert_eq!(r.item, InventoryItem::new("v1", "ConfigMap", "cfg", "team-a"));
        let meta = &r.body["metadata"];
        assert_eq!(meta["namespace"], "team-a");
        assert_eq!(meta["labels"]["team"], "a");
        assert_eq!(meta["labels"][MANAGED_BY_LABEL], CONTROLLER_NAME);
        assert_eq!(meta["labels"][SOURCE_CLASS_LABEL], "web");
        assert_eq!(meta["ownerReferences"].as_array().unwrap().len(), 1);
        assert_eq!(meta["ownerReferences"][0]["uid"], "uid-1");
        assert_eq!(r.body["data"]["k"], "v");
        // source untouched
        assert_eq!(t["metadata"]["namespace"], "elsewhere");
        assert!(t["metadata"].get("ownerReferences").is_none());
    }

    #[test]
    fn creates_labels_when_absent() {
        let t = json!({ "apiVersion": "networking.k8s.io/v1", "kind": "NetworkPolicy", "metadata": { "name": "deny" } });
        let r = render(&t, 3, "web", &ns("b")).unwrap();
        assert_eq!(r.body["metadata"]["labels"][SOURCE_CLASS_LABEL], "web");
        assert_eq!(r.item.group_version(), ("networking.k8s.io", "v1"));
    }

    #[test]
    fn replaces_user_owner_references() {
        let t = json!({
            "apiVersion": "v1", "kind": "Secret",
            "metadata": { "name": "s", "ownerReferences": [{ "kind": "Other" }, { "kind": "More" }] }
        });
        let r = render(&t, 0, "web", &ns("b")).unwrap();
        let owners = r.body["metadata"]["ownerReferences"].as_array().unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0]["kind"], "Namespace");
    }

    #[test]
    fn large_templates_render_unchanged() {
        let ports: Vec<u32> = (0..100_000).collect();
        let t = json!({
            "apiVersion": "v1", "kind": "ConfigMap",
            "metadata": { "name": "big" },
            "spec": { "ports": ports }
        });
        let r = render(&t, 0, "web", &ns("b")).unwrap();
        assert_eq!(r.body["spec"]["ports"].as_array().unwrap().len(), 100_000);
        assert_eq!(r.body["spec"]["ports"][99_999], 99_999);
    }

    #[test]
    fn malformed_templates_name_the_index() {
        let cases = [
            (json!("just a string"), "not an object"),
            (json!({ "kind": "ConfigMap", "metadata": { "name": "a" } }), "missing apiVersion"),
            (json!({ "apiVersion": "v1", "metadata": { "name": "a" } }), "missing kind"),
            (json!({ "apiVersion": "v1", "kind": "ConfigMap", "metadata": {} }), "missing metadata.name"),
            (json!({ "apiVersion": "v1", "kind": "ConfigMap", "metadata": { "name": "a", "labels": [] } }), "labels is not an object"),
        ];
        for (t, want) in cases {
            let e = render(&t, 2, "web", &ns("b")).unwrap_err().to_string();
            assert!(e.contains("template #2"), "e={}", e);
            assert!(e.contains(want), "e={} want={}", e, want);
        }
    }
}
