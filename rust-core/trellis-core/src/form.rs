//! # Form Data
//!
//! Flat key/value parsing for query strings and urlencoded bodies, and the
//! [`FormData`] container the request builder fills from the body.

use serde_json::Value;
use std::collections::HashMap;
use url::form_urlencoded;

/// Parse `a=1&b=2` into a flat map
///
/// Percent-escapes and `+` are decoded. On duplicate keys the last
/// occurrence wins; blank values are kept.
#[must_use]
pub fn parse_query(input: &[u8]) -> HashMap<String, String> {
    form_urlencoded::parse(input).into_owned().collect()
}

/// A file received in a multipart body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    /// Client-supplied file name
    pub filename: String,
    /// File contents
    pub bytes: Vec<u8>,
    /// Declared MIME type of the part (`text/plain` when absent)
    pub mime_type: String,
}

/// One parsed form field
#[derive(Debug, Clone, PartialEq)]
pub enum FormValue {
    /// Plain text value
    Text(String),
    /// Uploaded file
    File(FileUpload),
    /// Member of a JSON object body
    Json(Value),
}

impl FormValue {
    /// Text content, for `Text` fields and JSON strings
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Json(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Uploaded file, if this field is one
    #[must_use]
    pub const fn as_file(&self) -> Option<&FileUpload> {
        match self {
            Self::File(f) => Some(f),
            _ => None,
        }
    }
}

/// Parsed request body
///
/// Empty unless the body's content type is urlencoded, JSON or multipart.
/// JSON bodies are kept whole in [`FormData::json`]; when the top level is
/// an object its members are also exposed as fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormData {
    fields: HashMap<String, FormValue>,
    json: Option<Value>,
}

impl FormData {
    /// Empty form data
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// From flat text pairs
    #[must_use]
    pub fn from_text(pairs: HashMap<String, String>) -> Self {
        Self {
            fields: pairs
                .into_iter()
                .map(|(k, v)| (k, FormValue::Text(v)))
                .collect(),
            json: None,
        }
    }

    /// From a parsed JSON document
    #[must_use]
    pub fn from_json(value: Value) -> Self {
        let fields = match &value {
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| (k.clone(), FormValue::Json(v.clone())))
                .collect(),
            _ => HashMap::new(),
        };
        Self {
            fields,
            json: Some(value),
        }
    }

    /// Add or replace a field
    pub fn insert(&mut self, key: impl Into<String>, value: FormValue) {
        self.fields.insert(key.into(), value);
    }

    /// Field by name
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&FormValue> {
        self.fields.get(key)
    }

    /// Text field by name
    #[must_use]
    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(FormValue::as_text)
    }

    /// Uploaded file by name
    #[must_use]
    pub fn file(&self, key: &str) -> Option<&FileUpload> {
        self.get(key).and_then(FormValue::as_file)
    }

    /// Whole JSON body, when the body was JSON
    #[must_use]
    pub const fn json(&self) -> Option<&Value> {
        self.json.as_ref()
    }

    /// All fields
    #[must_use]
    pub const fn fields(&self) -> &HashMap<String, FormValue> {
        &self.fields
    }

    /// Number of fields
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when there are no fields and no JSON body
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.json.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_query_simple() {
        let result = parse_query(b"page=1&limit=10");
        assert_eq!(result.get("page"), Some(&"1".to_string()));
        assert_eq!(result.get("limit"), Some(&"10".to_string()));
    }

    #[test]
    fn test_parse_query_empty() {
        assert!(parse_query(b"").is_empty());
    }

    #[test]
    fn test_parse_query_url_encoded() {
        let result = parse_query(b"name=John+Doe&city=New%20York&pct=100%25");
        assert_eq!(result.get("name"), Some(&"John Doe".to_string()));
        assert_eq!(result.get("city"), Some(&"New York".to_string()));
        assert_eq!(result.get("pct"), Some(&"100%".to_string()));
    }

    #[test]
    fn test_parse_query_last_wins_and_blanks_kept() {
        let result = parse_query(b"a=1&a=2&blank=&bare");
        assert_eq!(result.get("a"), Some(&"2".to_string()));
        assert_eq!(result.get("blank"), Some(&String::new()));
        assert_eq!(result.get("bare"), Some(&String::new()));
    }

    #[test]
    fn test_form_data_from_json_object() {
        let form = FormData::from_json(json!({"name": "ada", "age": 36}));
        assert_eq!(form.text("name"), Some("ada"));
        assert_eq!(form.get("age"), Some(&FormValue::Json(json!(36))));
        assert_eq!(form.len(), 2);
    }

    #[test]
    fn test_form_data_from_json_array() {
        let form = FormData::from_json(json!([1, 2, 3]));
        assert_eq!(form.len(), 0);
        assert!(!form.is_empty());
        assert_eq!(form.json(), Some(&json!([1, 2, 3])));
    }
}
