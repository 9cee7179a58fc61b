//! Request handlers.
//!
//! A handler pairs a predicate (`parse`) with a resolver (`resolve`). The
//! pipeline only sees the [`RequestHandler`] trait; [`HttpHandler`] is the
//! closure-backed implementation used from code, and
//! [`StubHandler`](crate::stub::StubHandler) the one built from configuration.

use crate::config::{PathMatcher, RequestMatcher};
use crate::matcher::{CompiledMatcher, MatcherError};
use crate::request::{MockedRequest, PublicRequest};
use crate::response::MockedResponse;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::Location;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Outcome of a handler predicate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchResult {
    pub matches: bool,
    /// Parameters extracted while matching. Always empty when `matches` is false.
    pub params: HashMap<String, String>,
}

impl MatchResult {
    pub fn matched(params: HashMap<String, String>) -> Self {
        Self {
            matches: true,
            params,
        }
    }

    pub fn no_match() -> Self {
        Self::default()
    }
}

/// What a resolver decided for a matched request.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolverOutcome {
    /// Answer with this synthetic response.
    Response(MockedResponse),
    /// Explicitly let the request reach the network.
    Passthrough,
    /// The resolver produced nothing.
    Empty,
}

impl From<MockedResponse> for ResolverOutcome {
    fn from(response: MockedResponse) -> Self {
        ResolverOutcome::Response(response)
    }
}

/// Errors raised by resolvers. These abort the pipeline run.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("network error: {0}")]
    Network(String),

    #[error("failed to render response template: {0}")]
    Template(#[from] handlebars::RenderError),

    #[error("invalid response body: {0}")]
    Body(String),

    #[error("invalid response header: {0}")]
    Header(#[from] http::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Where a handler was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: &'static str,
    pub line: u32,
    pub column: u32,
}

impl From<&'static Location<'static>> for SourceLocation {
    fn from(location: &'static Location<'static>) -> Self {
        Self {
            file: location.file(),
            line: location.line(),
            column: location.column(),
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Descriptive information about a handler, used in logs and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerInfo {
    /// Short human-readable label, e.g. `GET /user/{id}`.
    pub header: String,
    /// Declaration site of the resolver, when known.
    pub location: Option<SourceLocation>,
}

impl HandlerInfo {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            location: None,
        }
    }

    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }
}

/// A (predicate, resolver) pair tried against captured requests.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    fn info(&self) -> &HandlerInfo;

    /// Decide whether this handler applies to `request`.
    fn parse(&self, request: &MockedRequest) -> MatchResult;

    /// Produce the outcome for a request this handler matched.
    async fn resolve(
        &self,
        request: &PublicRequest,
        parsed: &MatchResult,
    ) -> Result<ResolverOutcome, HandlerError>;

    /// Exhausted handlers are skipped during lookup.
    fn is_exhausted(&self) -> bool {
        false
    }

    /// Reserve one use of this handler for a request its predicate matched.
    ///
    /// Called by lookup right before `resolve`. Returns `false` when the
    /// handler ran out of uses, possibly to a concurrent dispatch, in which
    /// case lookup moves on as if the predicate had not matched.
    fn claim(&self) -> bool {
        true
    }

    /// Re-arm a handler that limits how often it can be used.
    fn restore(&self) {}
}

pub type ResolverFuture = Pin<Box<dyn Future<Output = Result<ResolverOutcome, HandlerError>> + Send>>;
type Resolver = Arc<dyn Fn(PublicRequest) -> ResolverFuture + Send + Sync>;

/// Closure-backed handler matching on method and path.
///
/// ```ignore
/// let handler = HttpHandler::get("/user/{id}", |req| async move {
///     Ok(MockedResponse::json(&json!({ "id": req.param("id") })).into())
/// });
/// ```
pub struct HttpHandler {
    info: HandlerInfo,
    matcher: CompiledMatcher,
    resolver: Resolver,
    once: bool,
    used: AtomicBool,
}

impl HttpHandler {
    /// Handler for `method` and a path template (`/users/{id}` or `/users/:id`).
    /// Use `*` as the method to accept any method.
    #[track_caller]
    pub fn new<F, Fut>(method: &str, path: &str, resolver: F) -> Self
    where
        F: Fn(PublicRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ResolverOutcome, HandlerError>> + Send + 'static,
    {
        let location = SourceLocation::from(Location::caller());
        let methods = if method == "*" {
            vec![]
        } else {
            vec![method.to_uppercase()]
        };
        let matcher = CompiledMatcher::template(methods, path);
        let info = HandlerInfo::new(format!("{} {}", method.to_uppercase(), path)).with_location(location);

        Self::from_parts(info, matcher, resolver)
    }

    /// Handler backed by a full request matcher definition.
    #[track_caller]
    pub fn with_matcher<F, Fut>(matcher: &RequestMatcher, resolver: F) -> Result<Self, MatcherError>
    where
        F: Fn(PublicRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ResolverOutcome, HandlerError>> + Send + 'static,
    {
        let location = SourceLocation::from(Location::caller());
        let info = HandlerInfo::new(describe_matcher(matcher)).with_location(location);
        let compiled = CompiledMatcher::compile(matcher)?;
        Ok(Self::from_parts(info, compiled, resolver))
    }

    #[track_caller]
    pub fn get<F, Fut>(path: &str, resolver: F) -> Self
    where
        F: Fn(PublicRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ResolverOutcome, HandlerError>> + Send + 'static,
    {
        Self::new("GET", path, resolver)
    }

    #[track_caller]
    pub fn post<F, Fut>(path: &str, resolver: F) -> Self
    where
        F: Fn(PublicRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ResolverOutcome, HandlerError>> + Send + 'static,
    {
        Self::new("POST", path, resolver)
    }

    #[track_caller]
    pub fn any<F, Fut>(path: &str, resolver: F) -> Self
    where
        F: Fn(PublicRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ResolverOutcome, HandlerError>> + Send + 'static,
    {
        Self::new("*", path, resolver)
    }

    /// Use this handler for a single matching request only.
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    fn from_parts<F, Fut>(info: HandlerInfo, matcher: CompiledMatcher, resolver: F) -> Self
    where
        F: Fn(PublicRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ResolverOutcome, HandlerError>> + Send + 'static,
    {
        let resolver: Resolver = Arc::new(move |req| -> ResolverFuture { Box::pin(resolver(req)) });
        Self {
            info,
            matcher,
            resolver,
            once: false,
            used: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl RequestHandler for HttpHandler {
    fn info(&self) -> &HandlerInfo {
        &self.info
    }

    fn parse(&self, request: &MockedRequest) -> MatchResult {
        self.matcher.matches(request)
    }

    async fn resolve(
        &self,
        request: &PublicRequest,
        _parsed: &MatchResult,
    ) -> Result<ResolverOutcome, HandlerError> {
        (self.resolver)(request.clone()).await
    }

    fn is_exhausted(&self) -> bool {
        self.once && self.used.load(Ordering::SeqCst)
    }

    fn claim(&self) -> bool {
        !self.once
            || self
                .used
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
    }

    fn restore(&self) {
        self.used.store(false, Ordering::SeqCst);
    }
}

impl fmt::Debug for HttpHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpHandler")
            .field("info", &self.info)
            .field("once", &self.once)
            .finish_non_exhaustive()
    }
}

/// `METHOD path` label for a request matcher definition.
pub(crate) fn describe_matcher(matcher: &RequestMatcher) -> String {
    let method = if matcher.method.is_empty() {
        "*".to_string()
    } else {
        matcher.method.join("|").to_uppercase()
    };
    let path = match &matcher.path {
        Some(PathMatcher::Exact { value }) => value.clone(),
        Some(PathMatcher::Prefix { value }) => format!("{value}*"),
        Some(PathMatcher::Regex { pattern }) => format!("~{pattern}"),
        Some(PathMatcher::Glob { pattern }) => pattern.clone(),
        Some(PathMatcher::Template { template }) => template.clone(),
        None => "*".to_string(),
    };
    format!("{method} {path}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: &str, url: &str) -> Arc<MockedRequest> {
        Arc::new(MockedRequest::new(method, url).unwrap())
    }

    #[test]
    fn test_parse_extracts_params() {
        let handler = HttpHandler::get("/users/{id}", |_| async { Ok(ResolverOutcome::Empty) });

        let parsed = handler.parse(&request("GET", "http://localhost/users/42"));
        assert!(parsed.matches);
        assert_eq!(parsed.params.get("id"), Some(&"42".to_string()));

        let parsed = handler.parse(&request("POST", "http://localhost/users/42"));
        assert!(!parsed.matches);
        assert!(parsed.params.is_empty());
    }

    #[test]
    fn test_records_declaration_site() {
        let line = line!() + 1;
        let handler = HttpHandler::get("/user", |_| async { Ok(ResolverOutcome::Empty) });

        let location = handler.info().location.expect("location recorded");
        assert!(location.file.ends_with("handler.rs"));
        assert_eq!(location.line, line);
        assert_eq!(handler.info().header, "GET /user");
    }

    #[tokio::test]
    async fn test_resolver_receives_params() {
        let handler = HttpHandler::any("/users/:id", |req| async move {
            let id = req.param("id").unwrap_or_default().to_string();
            Ok(MockedResponse::text(id).into())
        });

        let req = request("DELETE", "http://localhost/users/9");
        let parsed = handler.parse(&req);
        let public = PublicRequest::new(req, parsed.params.clone());

        let outcome = handler.resolve(&public, &parsed).await.unwrap();
        assert_eq!(outcome, ResolverOutcome::Response(MockedResponse::text("9")));
    }

    #[test]
    fn test_once_handler_exhausts_and_restores() {
        let handler = HttpHandler::get("/once", |_| async { Ok(MockedResponse::new(204).into()) }).once();
        assert!(!handler.is_exhausted());

        assert!(handler.claim());
        assert!(handler.is_exhausted());
        assert!(!handler.claim());

        handler.restore();
        assert!(!handler.is_exhausted());
        assert!(handler.claim());
    }

    #[test]
    fn test_unlimited_handler_always_claims() {
        let handler = HttpHandler::get("/many", |_| async { Ok(ResolverOutcome::Empty) });
        for _ in 0..3 {
            assert!(handler.claim());
        }
        assert!(!handler.is_exhausted());
    }

    #[test]
    fn test_with_matcher_rejects_bad_regex() {
        let matcher = RequestMatcher {
            method: vec![],
            path: Some(PathMatcher::Regex {
                pattern: "(unclosed".to_string(),
            }),
            query: HashMap::new(),
            headers: HashMap::new(),
            body: None,
        };
        let result = HttpHandler::with_matcher(&matcher, |_| async { Ok(ResolverOutcome::Empty) });
        assert!(result.is_err());
    }

    #[test]
    fn test_describe_matcher() {
        let matcher = RequestMatcher {
            method: vec!["get".to_string(), "head".to_string()],
            path: Some(PathMatcher::Prefix {
                value: "/api/".to_string(),
            }),
            query: HashMap::new(),
            headers: HashMap::new(),
            body: None,
        };
        assert_eq!(describe_matcher(&matcher), "GET|HEAD /api/*");
    }
}
