//! Mocked response value type.

use crate::request::{header_pair, header_str};
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue};

/// A synthetic response produced by a resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockedResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl MockedResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    /// Plain text response with status 200.
    pub fn text(body: impl Into<String>) -> Self {
        Self::new(200)
            .with_content_type(HeaderValue::from_static("text/plain"))
            .with_body(body.into())
    }

    /// JSON response with status 200.
    pub fn json(value: &serde_json::Value) -> Self {
        Self::new(200)
            .with_content_type(HeaderValue::from_static("application/json"))
            .with_body(value.to_string())
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Set a header, replacing any existing values of the same name.
    pub fn with_header<K, V>(mut self, name: K, value: V) -> Result<Self, http::Error>
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
    {
        let (name, value) = header_pair(name, value)?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub fn with_content_type(mut self, value: HeaderValue) -> Self {
        self.headers.insert(CONTENT_TYPE, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        header_str(&self.headers, name)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_response() {
        let response = MockedResponse::json(&serde_json::json!({"name": "John"}));
        assert_eq!(response.status, 200);
        assert_eq!(response.content_type(), Some("application/json"));
        assert_eq!(response.body_text(), r#"{"name":"John"}"#);
    }

    #[test]
    fn test_builder_overrides_header() {
        let response = MockedResponse::text("nope")
            .with_status(404)
            .with_header("content-type", "text/html")
            .unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(response.headers.len(), 1);
        assert_eq!(response.content_type(), Some("text/html"));
    }
}
