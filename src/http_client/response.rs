//! HTTP response wrapper.

use std::collections::HashMap;

/// Status, headers and the raw (already decompressed) body.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    /// Check if the response is successful.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Check if the response indicates rate limiting (429 or 503).
    pub fn is_rate_limited(&self) -> bool {
        self.status == 429 || self.status == 503
    }

    /// Get the Content-Type header.
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(|s| s.as_str())
    }

    /// Body as text: UTF-8, else Latin-1.
    pub fn text(&self) -> String {
        decode_body(&self.body)
    }
}

/// Latin-1 maps every byte to a char, so this never fails.
pub fn decode_body(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}
