//! Class event → one reconcile request per namespace labelled with the class.

use k8s_openapi::api::core::v1::Namespace;
use kube::runtime::reflector::ObjectRef;
use nsclass_core::CLASS_LABEL;

/// Namespaces among `namespaces` whose class label equals `class`.
pub fn namespaces_for_class<'a, I>(class: &str, namespaces: I) -> Vec<ObjectRef<Namespace>>
where
    I: IntoIterator<Item = &'a Namespace>,
{
    if class.is_empty() {
        return Vec::new();
    }
    namespaces
        .into_iter()
        .filter(|ns| ns.metadata.labels.as_ref().and_then(|l| l.get(CLASS_LABEL)).map(String::as_str) == Some(class))
        .filter_map(|ns| ns.metadata.name.as_deref().map(ObjectRef::new))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn ns(name: &str, labels: &[(&str, &str)]) -> Namespace {
        let labels: BTreeMap<String, String> = labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Namespace { metadata: ObjectMeta { name: Some(name.into()), labels: Some(labels), ..Default::default() }, ..Default::default() }
    }

    #[test]
    fn maps_only_labelled_namespaces() {
        let all = vec![
            ns("a", &[(CLASS_LABEL, "web")]),
            ns("b", &[(CLASS_LABEL, "db")]),
            ns("c", &[("team", "web")]),
            ns("d", &[(CLASS_LABEL, "web")]),
        ];
        let got: Vec<String> = namespaces_for_class("web", &all).into_iter().map(|r| r.name).collect();
        assert_eq!(got, vec!["a".to_string(), "d".to_string()]);
    }

    #[test]
    fn no_namespaces_no_requests() {
        assert!(namespaces_for_class("web", &Vec::<Namespace>::new()).is_empty());
        let all = vec![ns("a", &[(CLASS_LABEL, "")])];
        assert!(namespaces_for_class("", &all).is_empty());
    }
}
