//! One extractor for "whatever shape the vendor put its content in".
//!
//! Replies carry text as a plain string, a list of parts (`["a", {"text": "b"}]`),
//! an object with a `text` field, or something else entirely. Every stage that
//! has to turn such a value into text goes through [`Content`].

use serde_json::Value;

/// Classified reply content.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    Text(String),
    Parts(Vec<Content>),
    /// Object without a usable `text` field; kept as JSON.
    Structured(Value),
    Missing,
}

impl Content {
    pub fn classify(value: &Value) -> Self {
        match value {
            Value::Null => Content::Missing,
            Value::String(s) => Content::Text(s.clone()),
            Value::Array(items) => Content::Parts(items.iter().map(Content::classify).collect()),
            Value::Object(map) => match map.get("text") {
                Some(Value::String(s)) => Content::Text(s.clone()),
                Some(inner @ (Value::Array(_) | Value::Object(_))) => Content::classify(inner),
                _ => Content::Structured(value.clone()),
            },
            other => Content::Text(other.to_string()),
        }
    }

    /// Flatten to a single string. Parts are joined one per line.
    pub fn into_text(self) -> String {
        match self {
            Content::Text(s) => s,
            Content::Parts(parts) => parts
                .into_iter()
                .map(Content::into_text)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("\n"),
            Content::Structured(v) => v.to_string(),
            Content::Missing => String::new(),
        }
    }
}

/// Shorthand for `Content::classify(value).into_text()`.
pub fn text_of(value: &Value) -> String {
    Content::classify(value).into_text()
}
