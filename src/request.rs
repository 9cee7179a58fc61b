//! Captured request value types.

use crate::handler::ResolverOutcome;
use http::{HeaderMap, HeaderName, HeaderValue};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

/// Header name that forces a request straight through to the network.
pub const BYPASS_HEADER: &str = "x-msw-bypass";

/// Parse a name/value pair the way `http::request::Builder::header` does.
pub(crate) fn header_pair<K, V>(name: K, value: V) -> Result<(HeaderName, HeaderValue), http::Error>
where
    HeaderName: TryFrom<K>,
    <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
    HeaderValue: TryFrom<V>,
    <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
{
    let name = HeaderName::try_from(name).map_err(Into::into)?;
    let value = HeaderValue::try_from(value).map_err(Into::into)?;
    Ok((name, value))
}

/// First value of `name` as text. Non-UTF-8 values read as absent.
pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// An outgoing request captured by the interception layer.
///
/// Requests are immutable once built and travel through the pipeline as
/// `Arc<MockedRequest>`, so every lifecycle event of one dispatch carries the
/// same allocation.
#[derive(Debug, Clone, PartialEq)]
pub struct MockedRequest {
    id: String,
    method: String,
    url: Url,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
}

impl MockedRequest {
    /// Create a request. The method is normalized to upper case.
    pub fn new(method: &str, url: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            id: generate_id(),
            method: method.to_uppercase(),
            url: Url::parse(url)?,
            headers: HeaderMap::new(),
            body: None,
        })
    }

    /// Append a header, keeping earlier values of the same name.
    pub fn with_header<K, V>(mut self, name: K, value: V) -> Result<Self, http::Error>
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
    {
        let (name, value) = header_pair(name, value)?;
        self.headers.append(name, value);
        Ok(self)
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    pub fn query_string(&self) -> Option<&str> {
        self.url.query()
    }

    /// Decoded query parameters (last value wins).
    pub fn query_params(&self) -> HashMap<String, String> {
        self.url.query_pairs().into_owned().collect()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of a header, looked up case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        header_str(&self.headers, name)
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    pub fn body_text(&self) -> Option<&str> {
        self.body().and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Whether the request asked to skip interception entirely.
    ///
    /// The header name is matched case-insensitively, the value must be the
    /// literal `true`.
    pub fn is_bypassed(&self) -> bool {
        self.headers.get(BYPASS_HEADER).is_some_and(|v| v == "true")
    }

    /// Outcome a resolver returns to let this request reach the network.
    pub fn passthrough(&self) -> ResolverOutcome {
        ResolverOutcome::Passthrough
    }

    /// `METHOD /path` label used in diagnostics.
    pub fn label(&self) -> String {
        format!("{} {}", self.method, self.path())
    }
}

/// A request as seen by a resolver: the captured request plus the parameters
/// its handler extracted while matching.
#[derive(Debug, Clone)]
pub struct PublicRequest {
    pub request: Arc<MockedRequest>,
    pub params: HashMap<String, String>,
}

impl PublicRequest {
    pub fn new(request: Arc<MockedRequest>, params: HashMap<String, String>) -> Self {
        Self { request, params }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn passthrough(&self) -> ResolverOutcome {
        self.request.passthrough()
    }
}

impl std::ops::Deref for PublicRequest {
    type Target = MockedRequest;

    fn deref(&self) -> &Self::Target {
        &self.request
    }
}

/// Random v4-shaped identifier.
pub(crate) fn generate_id() -> String {
    let mut rng = rand::thread_rng();
    format!(
        "{:08x}-{:04x}-4{:03x}-{:04x}-{:012x}",
        rng.gen::<u32>(),
        rng.gen::<u16>(),
        rng.gen::<u16>() & 0x0fff,
        (rng.gen::<u16>() & 0x3fff) | 0x8000,
        rng.gen::<u64>() & 0xffff_ffff_ffff,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_case_insensitive() {
        let request = MockedRequest::new("GET", "http://localhost/")
            .unwrap()
            .with_header("Content-Type", "application/json")
            .unwrap()
            .with_header("Accept", "text/html")
            .unwrap()
            .with_header("accept", "application/json")
            .unwrap();

        assert_eq!(request.header("content-type"), Some("application/json"));
        assert_eq!(request.header("ACCEPT"), Some("text/html"));
        assert_eq!(request.headers().get_all("accept").iter().count(), 2);
        assert_eq!(request.header("x-missing"), None);

        let mut replacement = HeaderMap::new();
        replacement.insert("x-only", HeaderValue::from_static("1"));
        let request = request.with_headers(replacement);
        assert_eq!(request.header("X-Only"), Some("1"));
        assert_eq!(request.header("accept"), None);
    }

    #[test]
    fn test_invalid_header_is_rejected() {
        let base = MockedRequest::new("GET", "http://localhost/").unwrap();
        assert!(base.clone().with_header("bad header", "x").is_err());
        assert!(base.with_header("x-ok", "line\nbreak").is_err());
    }

    #[test]
    fn test_request_accessors() {
        let request = MockedRequest::new("get", "https://api.example.com/users/1?page=2&sort=asc")
            .unwrap()
            .with_body("hello");

        assert_eq!(request.method(), "GET");
        assert_eq!(request.path(), "/users/1");
        assert_eq!(request.query_string(), Some("page=2&sort=asc"));
        assert_eq!(request.query_params().get("page"), Some(&"2".to_string()));
        assert_eq!(request.body_text(), Some("hello"));
        assert_eq!(request.label(), "GET /users/1");
        assert_eq!(request.id().len(), 36);
    }

    #[test]
    fn test_bypass_header() {
        let base = MockedRequest::new("GET", "http://localhost/user").unwrap();
        assert!(!base.is_bypassed());

        assert!(base.clone().with_header("X-MSW-Bypass", "true").unwrap().is_bypassed());
        assert!(base.clone().with_header("x-msw-bypass", "true").unwrap().is_bypassed());

        for value in ["TRUE", "1", "yes", "false", "", " true"] {
            assert!(
                !base.clone().with_header("x-msw-bypass", value).unwrap().is_bypassed(),
                "value {value:?} must not bypass"
            );
        }
    }

    #[test]
    fn test_invalid_url() {
        assert!(MockedRequest::new("GET", "/relative").is_err());
    }

    #[test]
    fn test_public_request_params() {
        let request = Arc::new(MockedRequest::new("GET", "http://localhost/users/7").unwrap());
        let mut params = HashMap::new();
        params.insert("id".to_string(), "7".to_string());

        let public = PublicRequest::new(request.clone(), params);
        assert_eq!(public.param("id"), Some("7"));
        assert_eq!(public.path(), "/users/7");
        assert!(Arc::ptr_eq(&public.request, &request));
        assert!(matches!(public.passthrough(), ResolverOutcome::Passthrough));
    }
}
