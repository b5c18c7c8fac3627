//! Namespace attachment state, derived from the class label and the
//! attached-class annotation at the start of every reconcile.

use std::collections::BTreeMap;

use crate::{ATTACHED_CLASS_ANNOTATION, CLASS_LABEL};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachment {
    /// No label and nothing recorded.
    Unattached,
    /// Labelled with a class.
    Attached(String),
    /// Label removed while a previous class is still recorded; cleanup pending.
    Detaching(String),
}

impl Attachment {
    pub fn derive(
        labels: Option<&BTreeMap<String, String>>,
        annotations: Option<&BTreeMap<String, String>>,
    ) -> Self {
        let non_empty = |m: Option<&BTreeMap<String, String>>, key: &str| {
            m.and_then(|m| m.get(key)).filter(|v| !v.is_empty()).cloned()
        };
        if let Some(class) = non_empty(labels, CLASS_LABEL) {
            return Attachment::Attached(class);
        }
        match non_empty(annotations, ATTACHED_CLASS_ANNOTATION) {
            Some(prev) => Attachment::Detaching(prev),
            None => Attachment::Unattached,
        }
    }

    pub fn of(ns: &k8s_openapi::api::core::v1::Namespace) -> Self {
        Self::derive(ns.metadata.labels.as_ref(), ns.metadata.annotations.as_ref())
    }

    /// Class name used for logging and metric labels.
    pub fn class(&self) -> &str {
        match self {
            Attachment::Unattached => "",
            Attachment::Attached(c) | Attachment::Detaching(c) => c,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn label_wins_over_annotation() {
        let l = map(&[(CLASS_LABEL, "new")]);
        let a = map(&[(ATTACHED_CLASS_ANNOTATION, "old")]);
        assert_eq!(Attachment::derive(Some(&l), Some(&a)), Attachment::Attached("new".into()));
    }

    #[test]
    fn annotation_without_label_is_detaching() {
        let a = map(&[(ATTACHED_CLASS_ANNOTATION, "old")]);
        assert_eq!(Attachment::derive(None, Some(&a)), Attachment::Detaching("old".into()));
        let l = map(&[(CLASS_LABEL, "")]);
        assert_eq!(Attachment::derive(Some(&l), Some(&a)), Attachment::Detaching("old".into()));
    }

    #[test]
    fn nothing_recorded_is_unattached() {
        assert_eq!(Attachment::derive(None, None), Attachment::Unattached);
        let a = map(&[(ATTACHED_CLASS_ANNOTATION, "")]);
        assert_eq!(Attachment::derive(Some(&map(&[("team", "x")])), Some(&a)), Attachment::Unattached);
        assert_eq!(Attachment::Unattached.class(), "");
    }
}
