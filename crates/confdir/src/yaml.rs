//! Typed YAML documents.
//!
//! YAML files are parsed with `serde_yaml` and converted into [`YamlValue`],
//! a closed set of variants so that the flattening and metadata merging code
//! can match exhaustively instead of probing dynamic values.

use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde_yaml::Value;

use crate::error::{ConfigError, ConfigResult};

/// A parsed YAML node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum YamlValue {
    /// An explicit null or a key without a value.
    Null,
    /// Any scalar (string, number, boolean) in its textual form.
    Scalar(String),
    /// A sequence of nodes.
    Sequence(Vec<YamlValue>),
    /// A mapping with string keys, in document order.
    Mapping(IndexMap<String, YamlValue>),
}

impl YamlValue {
    /// Returns the scalar text, if this is a scalar.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the mapping, if this is a mapping.
    pub fn as_mapping(&self) -> Option<&IndexMap<String, YamlValue>> {
        match self {
            Self::Mapping(map) => Some(map),
            _ => None,
        }
    }

    /// Looks up a slash-separated path through nested mappings.
    ///
    /// ```
    /// use confdir::yaml::parse_yaml;
    ///
    /// let doc = parse_yaml("a:\n  b:\n    c: 1\n").unwrap();
    /// assert_eq!(doc.lookup("a/b/c").and_then(|v| v.as_str()), Some("1"));
    /// ```
    pub fn lookup(&self, path: &str) -> Option<&YamlValue> {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .try_fold(self, |node, segment| node.as_mapping()?.get(segment))
    }

    /// Short name of the variant, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Scalar(_) => "scalar",
            Self::Sequence(_) => "sequence",
            Self::Mapping(_) => "mapping",
        }
    }

    /// Textual form of a leaf: scalars as-is, collections as JSON, null as `None`.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Scalar(s) => Some(s.clone()),
            Self::Sequence(_) | Self::Mapping(_) => Some(self.to_json().to_string()),
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Scalar(s) => serde_json::Value::String(s.clone()),
            Self::Sequence(items) => items.iter().map(Self::to_json).collect(),
            Self::Mapping(map) => map
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect::<serde_json::Map<_, _>>()
                .into(),
        }
    }
}

impl From<Value> for YamlValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Scalar(b.to_string()),
            Value::Number(n) => Self::Scalar(n.to_string()),
            Value::String(s) => Self::Scalar(s),
            Value::Sequence(items) => Self::Sequence(items.into_iter().map(Self::from).collect()),
            Value::Mapping(map) => Self::Mapping(
                map.into_iter()
                    .map(|(k, v)| (scalar_key(k), Self::from(v)))
                    .collect(),
            ),
            Value::Tagged(tagged) => Self::from(tagged.value),
        }
    }
}

fn scalar_key(key: Value) -> String {
    match YamlValue::from(key) {
        YamlValue::Scalar(s) => s,
        YamlValue::Null => "null".to_string(),
        other => other.to_json().to_string(),
    }
}

/// Parse YAML text into a [`YamlValue`]. An empty document is `Null`.
pub fn parse_yaml(text: &str) -> ConfigResult<YamlValue> {
    let value: Value = serde_yaml::from_str(text)?;
    Ok(YamlValue::from(value))
}

/// Read and parse a YAML file.
pub fn load_yaml_file(path: &Path) -> ConfigResult<YamlValue> {
    let text = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;
    parse_yaml(&text)
}

/// Flatten a document into slash-joined leaf keys.
///
/// Scalars keep their text, sequences are rendered as a JSON array and
/// null leaves are dropped. A document whose root is not a mapping has no
/// leaves.
///
/// ```
/// use confdir::yaml::{flatten, parse_yaml};
///
/// let doc = parse_yaml("a:\n  b:\n    c: 1\n").unwrap();
/// assert_eq!(flatten(&doc), vec![("a/b/c".to_string(), "1".to_string())]);
/// ```
pub fn flatten(doc: &YamlValue) -> Vec<(String, String)> {
    let mut out = Vec::new();
    if let YamlValue::Mapping(map) = doc {
        for (key, value) in map {
            flatten_into(key.clone(), value, &mut out);
        }
    }
    out
}

fn flatten_into(prefix: String, value: &YamlValue, out: &mut Vec<(String, String)>) {
    match value {
        YamlValue::Null | YamlValue::Scalar(_) | YamlValue::Sequence(_) => {
            if let Some(text) = value.to_text() {
                out.push((prefix, text));
            }
        }
        YamlValue::Mapping(map) => {
            for (key, child) in map {
                flatten_into(format!("{prefix}/{key}"), child, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars_become_text() {
        let doc = parse_yaml("s: text\nn: 42\nf: 1.5\nb: true\nz: ~\n").unwrap();
        let map = doc.as_mapping().unwrap();
        assert_eq!(map["s"], YamlValue::Scalar("text".into()));
        assert_eq!(map["n"], YamlValue::Scalar("42".into()));
        assert_eq!(map["f"], YamlValue::Scalar("1.5".into()));
        assert_eq!(map["b"], YamlValue::Scalar("true".into()));
        assert_eq!(map["z"], YamlValue::Null);
    }

    #[test]
    fn test_non_string_keys_are_stringified() {
        let doc = parse_yaml("1: one\ntrue: yes\n").unwrap();
        let map = doc.as_mapping().unwrap();
        assert!(map.contains_key("1"));
        assert!(map.contains_key("true"));
    }

    #[test]
    fn test_empty_document_is_null() {
        assert_eq!(parse_yaml("").unwrap(), YamlValue::Null);
    }

    #[test]
    fn test_parse_error() {
        let err = parse_yaml("key: [unclosed\n").unwrap_err();
        assert!(matches!(err, ConfigError::YamlError(_)));
    }

    #[test]
    fn test_flatten_nested_mapping() {
        let doc = parse_yaml("a:\n  b:\n    c: 1\n").unwrap();
        let flat = flatten(&doc);
        assert_eq!(flat, vec![("a/b/c".to_string(), "1".to_string())]);
    }

    #[test]
    fn test_flatten_siblings_and_sequences() {
        let doc = parse_yaml("ui:\n  theme: dark\n  langs: [en, de]\n  unset:\n").unwrap();
        let flat = flatten(&doc);
        assert_eq!(
            flat,
            vec![
                ("ui/theme".to_string(), "dark".to_string()),
                ("ui/langs".to_string(), r#"["en","de"]"#.to_string()),
            ]
        );
    }

    #[test]
    fn test_flatten_non_mapping_root() {
        let doc = parse_yaml("- a\n- b\n").unwrap();
        assert!(flatten(&doc).is_empty());
    }

    #[test]
    fn test_lookup() {
        let doc = parse_yaml("a:\n  b: x\n").unwrap();
        assert_eq!(doc.lookup("a/b").and_then(YamlValue::as_str), Some("x"));
        assert!(doc.lookup("a/missing").is_none());
        assert_eq!(doc.lookup("a").map(YamlValue::kind), Some("mapping"));
    }
}
