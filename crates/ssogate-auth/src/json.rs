//! Read-only JSON documents for identity provider responses.
//!
//! Token and profile responses are parsed once into a [`JsonDocument`] and
//! queried by member name. There is no mutation API; a document
//! is built per response and dropped with it.
//!
//! # Example
//!
//! ```
//! use ssogate_auth::json::{JsonDocument, JsonType};
//!
//! let doc = JsonDocument::parse(r#"{"a":{"b":"c"}}"#).unwrap();
//! let a = doc.root().member_object("a").unwrap();
//! assert_eq!(a.member_string("b").as_deref(), Some("c"));
//! assert_eq!(doc.root().member_type("missing"), JsonType::Null);
//! ```

use std::fmt;

use serde_json::Value;

/// Error returned when a response body is not valid JSON.
#[derive(Debug, thiserror::Error)]
#[error("JSON parse error at line {line}, column {column}: {message}")]
pub struct JsonError {
    /// 1-based line of the offending input.
    pub line: usize,
    /// 1-based column of the offending input.
    pub column: usize,
    /// Parser diagnostic.
    pub message: String,
}

impl From<serde_json::Error> for JsonError {
    fn from(err: serde_json::Error) -> Self {
        Self {
            line: err.line(),
            column: err.column(),
            message: err.to_string(),
        }
    }
}

/// The type of a JSON node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JsonType {
    String,
    Number,
    Object,
    Array,
    Boolean,
    Null,
}

impl fmt::Display for JsonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Object => "object",
            Self::Array => "array",
            Self::Boolean => "boolean",
            Self::Null => "null",
        };
        f.write_str(name)
    }
}

/// An immutable parsed JSON document.
#[derive(Debug, Clone)]
pub struct JsonDocument {
    root: Value,
}

impl JsonDocument {
    /// Parses a text blob into a document.
    ///
    /// # Errors
    ///
    /// Returns [`JsonError`] if the text is not well-formed JSON.
    pub fn parse(text: &str) -> Result<Self, JsonError> {
        let root = serde_json::from_str(text)?;
        Ok(Self { root })
    }

    /// Returns the root node.
    #[must_use]
    pub fn root(&self) -> JsonNode<'_> {
        JsonNode { value: &self.root }
    }
}

/// A borrowed view of one node in a [`JsonDocument`].
#[derive(Debug, Clone, Copy)]
pub struct JsonNode<'a> {
    value: &'a Value,
}

impl<'a> JsonNode<'a> {
    /// Returns the type of this node.
    #[must_use]
    pub fn node_type(&self) -> JsonType {
        type_of(self.value)
    }

    /// Returns `true` if this node is an object with the named member.
    ///
    /// A member that is explicitly `null` still exists.
    #[must_use]
    pub fn has_member(&self, name: &str) -> bool {
        self.member(name).is_some()
    }

    /// Returns the named member if it is an object.
    #[must_use]
    pub fn member_object(&self, name: &str) -> Option<JsonNode<'a>> {
        self.member(name)
            .filter(|v| v.is_object())
            .map(|value| JsonNode { value })
    }

    /// Returns the textual value of the named member.
    ///
    /// Strings are returned as-is; numbers and booleans are rendered as
    /// text. Objects, arrays, `null` and absent members yield `None`.
    #[must_use]
    pub fn member_string(&self, name: &str) -> Option<String> {
        self.member(name).and_then(scalar_text)
    }

    /// Returns the type of the named member.
    ///
    /// Absent members report [`JsonType::Null`], exactly like an explicit
    /// `null`; use [`has_member`](Self::has_member) to tell them apart.
    #[must_use]
    pub fn member_type(&self, name: &str) -> JsonType {
        self.member(name).map_or(JsonType::Null, type_of)
    }

    /// Returns the number of elements if this node is an array.
    #[must_use]
    pub fn array_len(&self) -> Option<usize> {
        self.value.as_array().map(Vec::len)
    }

    /// Iterates the scalar members of an object as `(name, text)` pairs.
    ///
    /// Nested objects, arrays and nulls are skipped. Non-objects yield
    /// nothing.
    pub fn scalar_members(self) -> impl Iterator<Item = (&'a str, String)> + 'a {
        self.value
            .as_object()
            .into_iter()
            .flat_map(|map| map.iter())
            .filter_map(|(name, value)| scalar_text(value).map(|text| (name.as_str(), text)))
    }

    fn member(&self, name: &str) -> Option<&'a Value> {
        self.value.as_object().and_then(|map| map.get(name))
    }
}

fn type_of(value: &Value) -> JsonType {
    match value {
        Value::String(_) => JsonType::String,
        Value::Number(_) => JsonType::Number,
        Value::Object(_) => JsonType::Object,
        Value::Array(_) => JsonType::Array,
        Value::Bool(_) => JsonType::Boolean,
        Value::Null => JsonType::Null,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_member_lookup() {
        let doc = JsonDocument::parse(r#"{"a":{"b":"c"}}"#).unwrap();
        let a = doc.root().member_object("a").unwrap();
        assert_eq!(a.member_string("b").as_deref(), Some("c"));
    }

    #[test]
    fn test_missing_member_reports_null_type() {
        let doc = JsonDocument::parse(r#"{"a":1}"#).unwrap();
        assert_eq!(doc.root().member_type("missing"), JsonType::Null);
        assert!(!doc.root().has_member("missing"));
    }

    #[test]
    fn test_explicit_null_exists() {
        let doc = JsonDocument::parse(r#"{"gone":null}"#).unwrap();
        assert_eq!(doc.root().member_type("gone"), JsonType::Null);
        assert!(doc.root().has_member("gone"));
        assert!(doc.root().member_string("gone").is_none());
    }

    #[test]
    fn test_member_types() {
        let doc = JsonDocument::parse(
            r#"{"s":"x","n":4.5,"o":{},"a":[1,2],"b":true,"z":null}"#,
        )
        .unwrap();
        let root = doc.root();
        assert_eq!(root.member_type("s"), JsonType::String);
        assert_eq!(root.member_type("n"), JsonType::Number);
        assert_eq!(root.member_type("o"), JsonType::Object);
        assert_eq!(root.member_type("a"), JsonType::Array);
        assert_eq!(root.member_type("b"), JsonType::Boolean);
        assert_eq!(root.member_type("z"), JsonType::Null);
        assert_eq!(root.node_type(), JsonType::Object);
    }

    #[test]
    fn test_member_string_renders_scalars_only() {
        let doc = JsonDocument::parse(r#"{"n":42,"b":false,"a":["x"],"o":{"k":"v"}}"#).unwrap();
        let root = doc.root();
        assert_eq!(root.member_string("n").as_deref(), Some("42"));
        assert_eq!(root.member_string("b").as_deref(), Some("false"));
        assert!(root.member_string("a").is_none());
        assert!(root.member_string("o").is_none());
    }

    #[test]
    fn test_member_object_rejects_non_objects() {
        let doc = JsonDocument::parse(r#"{"a":"text","b":[{}]}"#).unwrap();
        assert!(doc.root().member_object("a").is_none());
        assert!(doc.root().member_object("b").is_none());
    }

    #[test]
    fn test_array_len() {
        let doc = JsonDocument::parse(r#"[1,2,3]"#).unwrap();
        assert_eq!(doc.root().array_len(), Some(3));
        assert_eq!(doc.root().member_type("x"), JsonType::Null);
    }

    #[test]
    fn test_scalar_members_skip_nested() {
        let doc =
            JsonDocument::parse(r#"{"uid":"alice","age":30,"org":{"x":1},"tags":[]}"#).unwrap();
        let mut members: Vec<_> = doc.root().scalar_members().collect();
        members.sort();
        assert_eq!(
            members,
            vec![("age", "30".to_string()), ("uid", "alice".to_string())]
        );
    }

    #[test]
    fn test_parse_error_reports_position() {
        let err = JsonDocument::parse("{\"a\":}").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.column > 0);
    }

    #[test]
    fn test_json_type_display() {
        assert_eq!(JsonType::Boolean.to_string(), "boolean");
        assert_eq!(JsonType::Null.to_string(), "null");
    }
}
