//! Attribute templates for child objects
//!
//! A template is a flat key/value map. It represents either a requested child
//! (the attach request) or a child read back from its parent.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeTemplate {
    attributes: BTreeMap<String, String>,
}

impl AttributeTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) {
        self.attributes.insert(key.into(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.attributes.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parse a numeric attribute such as `DISK_ID` or `SIZE`
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    /// True when every key of `self` exists on `candidate` with an equal value.
    ///
    /// Keys only present on the candidate are ignored, since the control plane
    /// fills in defaults the request never named.
    pub fn is_satisfied_by(&self, candidate: &AttributeTemplate) -> bool {
        self.attributes
            .iter()
            .all(|(k, v)| candidate.attributes.get(k) == Some(v))
    }

    /// Keys the candidate is missing or carries a different value for
    pub fn mismatched_keys<'a>(&'a self, candidate: &AttributeTemplate) -> Vec<&'a str> {
        self.attributes
            .iter()
            .filter(|(k, v)| candidate.attributes.get(*k) != Some(*v))
            .map(|(k, _)| k.as_str())
            .collect()
    }

    /// Key-sorted rendering used for snapshot comparison
    pub fn canonical(&self) -> String {
        self.attributes
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, escape(v)))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Render as a control-plane vector attribute, e.g. `DISK=[IMAGE_ID="7"]`
    pub fn render_vector(&self, name: &str) -> String {
        format!("{}=[{}]", name, self.canonical())
    }

    /// Render as top-level attributes, one per line
    pub fn render_flat(&self) -> String {
        self.attributes
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, escape(v)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

impl fmt::Display for AttributeTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.canonical())
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for AttributeTemplate {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut template = AttributeTemplate::new();
        for (k, v) in iter {
            template.insert(k, v);
        }
        template
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_keys_must_match() {
        let request = AttributeTemplate::new()
            .with("IMAGE_ID", 7)
            .with("TARGET", "vdb");
        let candidate = AttributeTemplate::new()
            .with("DISK_ID", 2)
            .with("IMAGE_ID", 7)
            .with("TARGET", "vdb")
            .with("DRIVER", "qcow2");

        assert!(request.is_satisfied_by(&candidate));
        assert!(!candidate.is_satisfied_by(&request));
    }

    #[test]
    fn test_mismatched_keys() {
        let request = AttributeTemplate::new()
            .with("IMAGE_ID", 7)
            .with("TARGET", "vdb");
        let candidate = AttributeTemplate::new().with("IMAGE_ID", 7);

        assert_eq!(request.mismatched_keys(&candidate), vec!["TARGET"]);
    }

    #[test]
    fn test_render_vector_is_key_sorted() {
        let template = AttributeTemplate::new()
            .with("TARGET", "vdb")
            .with("IMAGE_ID", 7);

        assert_eq!(
            template.render_vector("DISK"),
            r#"DISK=[IMAGE_ID="7",TARGET="vdb"]"#
        );
    }

    #[test]
    fn test_render_escapes_quotes() {
        let template = AttributeTemplate::new().with("DESCRIPTION", r#"say "hi""#);
        assert_eq!(template.canonical(), r#"DESCRIPTION="say \"hi\"""#);
    }

    #[test]
    fn test_get_u64() {
        let template = AttributeTemplate::new().with("SIZE", "1024").with("TARGET", "vda");
        assert_eq!(template.get_u64("SIZE"), Some(1024));
        assert_eq!(template.get_u64("TARGET"), None);
        assert_eq!(template.get_u64("MISSING"), None);
    }
}
