//! Request matching logic.
//!
//! Compiles [`RequestMatcher`] definitions once and evaluates them against
//! captured requests, producing a [`MatchResult`] with any extracted params.

use crate::config::{BodyMatcher, HeaderMatcher, PathMatcher, QueryMatcher, RequestMatcher};
use crate::handler::MatchResult;
use crate::request::MockedRequest;
use regex::Regex;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MatcherError {
    #[error("invalid regex {pattern:?}: {source}")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid glob {pattern:?}: {source}")]
    Glob {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("invalid JSON path {expression:?}: {message}")]
    JsonPath { expression: String, message: String },
}

fn compile_regex(pattern: &str) -> Result<Regex, MatcherError> {
    Regex::new(pattern).map_err(|source| MatcherError::Regex {
        pattern: pattern.to_string(),
        source,
    })
}

/// A request matcher ready for evaluation.
#[derive(Debug)]
pub struct CompiledMatcher {
    methods: Vec<String>,
    path: Option<CompiledPath>,
    query: Vec<(String, CompiledValue)>,
    headers: Vec<(String, CompiledHeader)>,
    body: Option<CompiledBody>,
}

#[derive(Debug)]
enum CompiledPath {
    Exact(String),
    Prefix(String),
    Regex(Regex),
    Glob(globset::GlobMatcher),
    Template(PathTemplate),
}

#[derive(Debug)]
enum CompiledValue {
    Exact(String),
    Regex(Regex),
    Present,
    Absent,
}

#[derive(Debug)]
enum CompiledHeader {
    Value(CompiledValue),
    Contains(String),
}

#[derive(Debug)]
enum CompiledBody {
    Exact(String),
    Regex(Regex),
    JsonPath(HashMap<String, serde_json::Value>),
    Contains(String),
    Json,
    Empty,
}

impl CompiledMatcher {
    pub fn compile(matcher: &RequestMatcher) -> Result<Self, MatcherError> {
        let path = match &matcher.path {
            None => None,
            Some(PathMatcher::Exact { value }) => Some(CompiledPath::Exact(value.clone())),
            Some(PathMatcher::Prefix { value }) => Some(CompiledPath::Prefix(value.clone())),
            Some(PathMatcher::Regex { pattern }) => Some(CompiledPath::Regex(compile_regex(pattern)?)),
            Some(PathMatcher::Glob { pattern }) => {
                let glob = globset::Glob::new(pattern).map_err(|source| MatcherError::Glob {
                    pattern: pattern.clone(),
                    source,
                })?;
                Some(CompiledPath::Glob(glob.compile_matcher()))
            }
            Some(PathMatcher::Template { template }) => {
                Some(CompiledPath::Template(PathTemplate::parse(template)))
            }
        };

        let mut query = Vec::with_capacity(matcher.query.len());
        for (name, qm) in &matcher.query {
            let compiled = match qm {
                QueryMatcher::Exact { value } => CompiledValue::Exact(value.clone()),
                QueryMatcher::Regex { pattern } => CompiledValue::Regex(compile_regex(pattern)?),
                QueryMatcher::Present => CompiledValue::Present,
                QueryMatcher::Absent => CompiledValue::Absent,
            };
            query.push((name.clone(), compiled));
        }

        let mut headers = Vec::with_capacity(matcher.headers.len());
        for (name, hm) in &matcher.headers {
            let compiled = match hm {
                HeaderMatcher::Exact { value } => CompiledHeader::Value(CompiledValue::Exact(value.clone())),
                HeaderMatcher::Regex { pattern } => {
                    CompiledHeader::Value(CompiledValue::Regex(compile_regex(pattern)?))
                }
                HeaderMatcher::Present => CompiledHeader::Value(CompiledValue::Present),
                HeaderMatcher::Absent => CompiledHeader::Value(CompiledValue::Absent),
                HeaderMatcher::Contains { value } => CompiledHeader::Contains(value.clone()),
            };
            headers.push((name.clone(), compiled));
        }

        let body = match &matcher.body {
            None => None,
            Some(BodyMatcher::Exact { value }) => Some(CompiledBody::Exact(value.clone())),
            Some(BodyMatcher::Regex { pattern }) => Some(CompiledBody::Regex(compile_regex(pattern)?)),
            Some(BodyMatcher::JsonPath { expressions }) => {
                for expression in expressions.keys() {
                    validate_json_path(expression)?;
                }
                Some(CompiledBody::JsonPath(expressions.clone()))
            }
            Some(BodyMatcher::Contains { value }) => Some(CompiledBody::Contains(value.clone())),
            Some(BodyMatcher::Json) => Some(CompiledBody::Json),
            Some(BodyMatcher::Empty) => Some(CompiledBody::Empty),
        };

        Ok(Self {
            methods: matcher.method.iter().map(|m| m.to_uppercase()).collect(),
            path,
            query,
            headers,
            body,
        })
    }

    /// Method list plus path template, the shape used by code-defined handlers.
    pub fn template(methods: Vec<String>, template: &str) -> Self {
        Self {
            methods,
            path: Some(CompiledPath::Template(PathTemplate::parse(template))),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Evaluate against a request.
    pub fn matches(&self, request: &MockedRequest) -> MatchResult {
        match self.try_match(request) {
            Some(params) => MatchResult::matched(params),
            None => MatchResult::no_match(),
        }
    }

    fn try_match(&self, request: &MockedRequest) -> Option<HashMap<String, String>> {
        let mut params = HashMap::new();

        if !self.methods.is_empty() && !self.methods.iter().any(|m| m == request.method()) {
            return None;
        }

        if let Some(path) = &self.path {
            if !matches_path(path, request, &mut params) {
                return None;
            }
        }

        if !self.query.is_empty() {
            let query_params = request.query_params();
            for (name, matcher) in &self.query {
                if !matches_value(matcher, query_params.get(name).map(String::as_str)) {
                    return None;
                }
            }
        }

        for (name, matcher) in &self.headers {
            let value = request.header(name);
            let ok = match matcher {
                CompiledHeader::Value(v) => matches_value(v, value),
                CompiledHeader::Contains(needle) => value.map(|v| v.contains(needle.as_str())).unwrap_or(false),
            };
            if !ok {
                return None;
            }
        }

        if let Some(body) = &self.body {
            if !matches_body(body, request.body()) {
                return None;
            }
        }

        Some(params)
    }
}

fn matches_path(matcher: &CompiledPath, request: &MockedRequest, params: &mut HashMap<String, String>) -> bool {
    let path = request.path();
    match matcher {
        CompiledPath::Exact(value) => path == value,
        CompiledPath::Prefix(value) => path.starts_with(value.as_str()),
        CompiledPath::Regex(regex) => {
            let Some(captures) = regex.captures(path) else {
                return false;
            };
            for (i, cap) in captures.iter().enumerate().skip(1) {
                if let Some(m) = cap {
                    params.insert(i.to_string(), m.as_str().to_string());
                }
            }
            for name in regex.capture_names().flatten() {
                if let Some(m) = captures.name(name) {
                    params.insert(name.to_string(), m.as_str().to_string());
                }
            }
            true
        }
        CompiledPath::Glob(glob) => glob.is_match(path),
        CompiledPath::Template(template) => {
            let target = if template.absolute {
                format!("{}{}", request.url().origin().ascii_serialization(), path)
            } else {
                path.to_string()
            };
            match template.matches(&target) {
                Some(extracted) => {
                    params.extend(extracted);
                    true
                }
                None => false,
            }
        }
    }
}

fn matches_value(matcher: &CompiledValue, value: Option<&str>) -> bool {
    match matcher {
        CompiledValue::Exact(expected) => value == Some(expected.as_str()),
        CompiledValue::Regex(regex) => value.map(|v| regex.is_match(v)).unwrap_or(false),
        CompiledValue::Present => value.is_some(),
        CompiledValue::Absent => value.is_none(),
    }
}

fn matches_body(matcher: &CompiledBody, body: Option<&[u8]>) -> bool {
    let body_str = body.and_then(|b| std::str::from_utf8(b).ok());

    match matcher {
        CompiledBody::Exact(value) => body_str == Some(value.as_str()),
        CompiledBody::Regex(regex) => body_str.map(|bs| regex.is_match(bs)).unwrap_or(false),
        CompiledBody::JsonPath(expressions) => body_str
            .and_then(|bs| serde_json::from_str::<serde_json::Value>(bs).ok())
            .map(|json| matches_json_paths(&json, expressions))
            .unwrap_or(false),
        CompiledBody::Contains(value) => body_str.map(|bs| bs.contains(value.as_str())).unwrap_or(false),
        CompiledBody::Json => body_str
            .map(|bs| serde_json::from_str::<serde_json::Value>(bs).is_ok())
            .unwrap_or(false),
        CompiledBody::Empty => body.map(|b| b.is_empty()).unwrap_or(true),
    }
}

fn validate_json_path(expression: &str) -> Result<(), MatcherError> {
    use jsonpath_rust::JsonPath;

    let parsed: Result<JsonPath, _> = JsonPath::try_from(expression);
    parsed.map(|_| ()).map_err(|e| MatcherError::JsonPath {
        expression: expression.to_string(),
        message: e.to_string(),
    })
}

fn matches_json_paths(json: &serde_json::Value, expressions: &HashMap<String, serde_json::Value>) -> bool {
    use jsonpath_rust::JsonPath;

    expressions.iter().all(|(expression, expected)| {
        let Ok(path) = JsonPath::try_from(expression.as_str()) else {
            return false;
        };
        let found = match path.find(json) {
            serde_json::Value::Array(values) => values,
            serde_json::Value::Null => Vec::new(),
            single => vec![single],
        };
        // A null expectation only asserts that the path resolves.
        if expected.is_null() {
            !found.is_empty()
        } else {
            found.iter().any(|value| value == expected)
                || matches!(expected, serde_json::Value::Array(items) if *items == found)
        }
    })
}

/// Path pattern with named segments: `/users/{id}`, `/users/:id`, and a
/// trailing `*` that swallows the rest of the path.
#[derive(Debug)]
struct PathTemplate {
    segments: Vec<TemplateSegment>,
    absolute: bool,
}

#[derive(Debug)]
enum TemplateSegment {
    Literal(String),
    Param(String),
    Wildcard,
}

impl PathTemplate {
    fn parse(template: &str) -> Self {
        let absolute = template.starts_with("http://") || template.starts_with("https://");
        let segments = split_segments(template)
            .map(|segment| {
                if segment == "*" {
                    TemplateSegment::Wildcard
                } else if let Some(name) = segment.strip_prefix(':') {
                    TemplateSegment::Param(name.to_string())
                } else if let Some(name) = segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                    TemplateSegment::Param(name.to_string())
                } else {
                    TemplateSegment::Literal(segment.to_string())
                }
            })
            .collect();

        Self { segments, absolute }
    }

    fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let mut params = HashMap::new();
        let mut parts = split_segments(path);

        for segment in &self.segments {
            match segment {
                TemplateSegment::Wildcard => return Some(params),
                TemplateSegment::Literal(lit) => {
                    if parts.next()? != lit.as_str() {
                        return None;
                    }
                }
                TemplateSegment::Param(name) => {
                    let value = parts.next()?;
                    if value.is_empty() {
                        return None;
                    }
                    params.insert(name.clone(), value.to_string());
                }
            }
        }

        // Must consume entire path
        if parts.next().is_none() {
            Some(params)
        } else {
            None
        }
    }
}

/// Split on `/`, ignoring a single trailing slash.
fn split_segments(path: &str) -> std::str::Split<'_, char> {
    let trimmed = path.strip_suffix('/').filter(|p| !p.is_empty()).unwrap_or(path);
    trimmed.split('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_matcher() -> RequestMatcher {
        RequestMatcher {
            method: vec![],
            path: None,
            query: HashMap::new(),
            headers: HashMap::new(),
            body: None,
        }
    }

    fn with_path(path: PathMatcher) -> RequestMatcher {
        RequestMatcher {
            path: Some(path),
            ..empty_matcher()
        }
    }

    fn get(url: &str) -> MockedRequest {
        MockedRequest::new("GET", url).unwrap()
    }

    #[test]
    fn test_exact_path_matching() {
        let matcher = CompiledMatcher::compile(&with_path(PathMatcher::Exact {
            value: "/api/users".to_string(),
        }))
        .unwrap();

        assert!(matcher.matches(&get("http://localhost/api/users")).matches);
        assert!(!matcher.matches(&get("http://localhost/api/posts")).matches);
    }

    #[test]
    fn test_prefix_path_matching() {
        let matcher = CompiledMatcher::compile(&with_path(PathMatcher::Prefix {
            value: "/api/".to_string(),
        }))
        .unwrap();

        assert!(matcher.matches(&get("http://localhost/api/users")).matches);
        assert!(matcher.matches(&get("http://localhost/api/posts/123")).matches);
        assert!(!matcher.matches(&get("http://localhost/other")).matches);
    }

    #[test]
    fn test_template_path_matching() {
        let matcher = CompiledMatcher::template(vec![], "/users/{id}/posts/:post");

        let result = matcher.matches(&get("http://localhost/users/123/posts/abc"));
        assert!(result.matches);
        assert_eq!(result.params.get("id"), Some(&"123".to_string()));
        assert_eq!(result.params.get("post"), Some(&"abc".to_string()));

        assert!(matcher.matches(&get("http://localhost/users/123/posts/abc/")).matches);
        assert!(!matcher.matches(&get("http://localhost/users/123/posts")).matches);
        assert!(!matcher.matches(&get("http://localhost/users//posts/abc")).matches);
    }

    #[test]
    fn test_wildcard_and_absolute_templates() {
        let matcher = CompiledMatcher::template(vec![], "/static/*");
        assert!(matcher.matches(&get("http://localhost/static/js/app.js")).matches);
        assert!(!matcher.matches(&get("http://localhost/assets/app.js")).matches);

        let matcher = CompiledMatcher::template(vec![], "https://api.example.com/user");
        assert!(matcher.matches(&get("https://api.example.com/user")).matches);
        assert!(!matcher.matches(&get("https://other.example.com/user")).matches);
    }

    #[test]
    fn test_no_match_has_no_params() {
        let matcher = CompiledMatcher::template(vec!["POST".to_string()], "/users/{id}");
        let result = matcher.matches(&get("http://localhost/users/1"));
        assert!(!result.matches);
        assert!(result.params.is_empty());
    }

    #[test]
    fn test_regex_captures() {
        let matcher = CompiledMatcher::compile(&with_path(PathMatcher::Regex {
            pattern: r"^/orders/(?P<order>\d+)$".to_string(),
        }))
        .unwrap();

        let result = matcher.matches(&get("http://localhost/orders/77"));
        assert!(result.matches);
        assert_eq!(result.params.get("order"), Some(&"77".to_string()));
        assert_eq!(result.params.get("1"), Some(&"77".to_string()));
    }

    #[test]
    fn test_glob_matching() {
        let matcher = CompiledMatcher::compile(&with_path(PathMatcher::Glob {
            pattern: "/files/**/*.png".to_string(),
        }))
        .unwrap();
        assert!(matcher.matches(&get("http://localhost/files/a/b/c.png")).matches);
        assert!(!matcher.matches(&get("http://localhost/files/a/b/c.jpg")).matches);
    }

    #[test]
    fn test_method_matching() {
        let mut def = with_path(PathMatcher::Exact {
            value: "/api/users".to_string(),
        });
        def.method = vec!["get".to_string(), "POST".to_string()];
        let matcher = CompiledMatcher::compile(&def).unwrap();

        assert!(matcher.matches(&get("http://localhost/api/users")).matches);
        let delete = MockedRequest::new("DELETE", "http://localhost/api/users").unwrap();
        assert!(!matcher.matches(&delete).matches);
    }

    #[test]
    fn test_query_matching() {
        let mut def = empty_matcher();
        def.query.insert(
            "page".to_string(),
            QueryMatcher::Exact {
                value: "1".to_string(),
            },
        );
        def.query.insert("debug".to_string(), QueryMatcher::Absent);
        let matcher = CompiledMatcher::compile(&def).unwrap();

        assert!(matcher.matches(&get("http://localhost/api?page=1")).matches);
        assert!(!matcher.matches(&get("http://localhost/api?page=2")).matches);
        assert!(!matcher.matches(&get("http://localhost/api?page=1&debug")).matches);
    }

    #[test]
    fn test_header_matching() {
        let mut def = empty_matcher();
        def.headers.insert("authorization".to_string(), HeaderMatcher::Present);
        def.headers.insert(
            "accept".to_string(),
            HeaderMatcher::Contains {
                value: "json".to_string(),
            },
        );
        let matcher = CompiledMatcher::compile(&def).unwrap();

        let request = get("http://localhost/")
            .with_header("Authorization", "Bearer token")
            .unwrap()
            .with_header("Accept", "application/json")
            .unwrap();
        assert!(matcher.matches(&request).matches);
        assert!(!matcher.matches(&get("http://localhost/")).matches);
    }

    #[test]
    fn test_body_matching() {
        let mut def = empty_matcher();
        def.body = Some(BodyMatcher::Json);
        let matcher = CompiledMatcher::compile(&def).unwrap();

        let json = MockedRequest::new("POST", "http://localhost/").unwrap().with_body(r#"{"name": "John"}"#);
        let text = MockedRequest::new("POST", "http://localhost/").unwrap().with_body("not json");
        assert!(matcher.matches(&json).matches);
        assert!(!matcher.matches(&text).matches);

        def.body = Some(BodyMatcher::Empty);
        let matcher = CompiledMatcher::compile(&def).unwrap();
        assert!(matcher.matches(&get("http://localhost/")).matches);
        assert!(!matcher.matches(&text).matches);
    }

    #[test]
    fn test_json_path_body_matching() {
        let mut def = empty_matcher();
        def.body = Some(BodyMatcher::JsonPath {
            expressions: HashMap::from([
                ("$.user.name".to_string(), serde_json::json!("John")),
                ("$.token".to_string(), serde_json::Value::Null),
            ]),
        });
        let matcher = CompiledMatcher::compile(&def).unwrap();

        let post = |body: &str| MockedRequest::new("POST", "http://localhost/").unwrap().with_body(body.to_string());
        assert!(matcher.matches(&post(r#"{"user": {"name": "John"}, "token": "t"}"#)).matches);
        assert!(!matcher.matches(&post(r#"{"user": {"name": "Jane"}, "token": "t"}"#)).matches);
        assert!(!matcher.matches(&post(r#"{"user": {"name": "John"}}"#)).matches);
        assert!(!matcher.matches(&post("not json")).matches);
    }

    #[test]
    fn test_invalid_patterns_are_rejected() {
        assert!(matches!(
            CompiledMatcher::compile(&with_path(PathMatcher::Regex {
                pattern: "[".to_string()
            })),
            Err(MatcherError::Regex { .. })
        ));
        assert!(matches!(
            CompiledMatcher::compile(&with_path(PathMatcher::Glob {
                pattern: "a[".to_string()
            })),
            Err(MatcherError::Glob { .. })
        ));
    }
}
