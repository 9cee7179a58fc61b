//! Configuration for the interceptor.
//!
//! Defines stub handlers (request matchers plus the response or passthrough
//! they resolve to) and dispatch settings.

use crate::unhandled::UnhandledRequestStrategy;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Top-level YAML document.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct InterceptorConfig {
    /// Stub handlers, tried highest priority first
    #[serde(default)]
    pub stubs: Vec<StubDefinition>,

    #[serde(default)]
    pub settings: GlobalSettings,
}

impl InterceptorConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every stub and reject duplicate ids.
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut seen = std::collections::HashSet::new();
        for (i, stub) in self.stubs.iter().enumerate() {
            stub.validate()
                .map_err(|e| anyhow::anyhow!("Stub {} ({}): {}", i, stub.id, e))?;
            if !seen.insert(stub.id.as_str()) {
                anyhow::bail!("Stub {}: duplicate id {:?}", i, stub.id);
            }
        }
        Ok(())
    }

    /// Enabled stubs in dispatch order: descending priority, declaration
    /// order among equal priorities.
    pub fn ordered_stubs(&self) -> Vec<&StubDefinition> {
        let mut stubs: Vec<_> = self.stubs.iter().filter(|s| s.enabled).collect();
        stubs.sort_by(|a, b| b.priority.cmp(&a.priority));
        stubs
    }
}

/// One configured handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StubDefinition {
    pub id: String,

    /// Shown in logs instead of the id
    #[serde(default)]
    pub name: Option<String>,

    pub request: RequestMatcher,

    /// Response to return. A stub without a response and without
    /// `passthrough` resolves to nothing.
    #[serde(default)]
    pub response: Option<ResponseDefinition>,

    /// Let matched requests through to the network
    #[serde(default)]
    pub passthrough: bool,

    /// Higher priorities are tried first
    #[serde(default)]
    pub priority: i32,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Resolve at most this many requests, then stop matching. 0 means no limit.
    #[serde(default)]
    pub max_matches: u32,

    /// Wait before resolving
    #[serde(default)]
    pub delay: Option<DelayConfig>,

    /// Replace the response with a failure
    #[serde(default)]
    pub fault: Option<FaultConfig>,
}

fn default_true() -> bool {
    true
}

impl StubDefinition {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.id.is_empty() {
            anyhow::bail!("stub id must not be empty");
        }
        if self.passthrough && self.response.is_some() {
            anyhow::bail!("passthrough stubs cannot define a response");
        }
        if self.passthrough && self.fault.is_some() {
            anyhow::bail!("passthrough stubs cannot define a fault");
        }
        self.request.validate()?;
        if let Some(response) = &self.response {
            response.validate()?;
        }
        if let Some(FaultConfig::Error { status, .. }) = &self.fault {
            validate_status(*status)?;
        }
        Ok(())
    }
}

/// Predicate definition shared by stubs and `HttpHandler::with_matcher`.
///
/// Every present criterion must hold; an empty matcher accepts any request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestMatcher {
    /// Accepted methods, any when empty
    #[serde(default)]
    pub method: Vec<String>,

    #[serde(default)]
    pub path: Option<PathMatcher>,

    #[serde(default)]
    pub query: HashMap<String, QueryMatcher>,

    /// Keyed by header name, compared case-insensitively
    #[serde(default)]
    pub headers: HashMap<String, HeaderMatcher>,

    #[serde(default)]
    pub body: Option<BodyMatcher>,
}

impl RequestMatcher {
    /// Compile once to surface bad patterns at load time.
    pub fn validate(&self) -> anyhow::Result<()> {
        crate::matcher::CompiledMatcher::compile(self)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PathMatcher {
    Exact { value: String },
    Prefix { value: String },
    /// Numbered and named captures become params
    Regex { pattern: String },
    Glob { pattern: String },
    /// `/users/{id}`, `/users/:id`, optionally ending in `*`
    Template { template: String },
}

/// Criterion for one decoded query parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryMatcher {
    Exact { value: String },
    Regex { pattern: String },
    Present,
    Absent,
}

/// Criterion for one header value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HeaderMatcher {
    Exact { value: String },
    Regex { pattern: String },
    Present,
    Absent,
    Contains { value: String },
}

/// Criterion for the request body, read as UTF-8.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BodyMatcher {
    Exact { value: String },
    Regex { pattern: String },
    /// Expected value per JSON path; `null` only requires the path to resolve
    JsonPath {
        expressions: HashMap<String, serde_json::Value>,
    },
    Contains { value: String },
    Json,
    Empty,
}

/// Mocked response produced by a stub.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseDefinition {
    #[serde(default = "default_status")]
    pub status: u16,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(default)]
    pub body: Option<ResponseBody>,

    /// Render text/JSON bodies as Handlebars templates
    #[serde(default)]
    pub template: bool,
}

fn default_status() -> u16 {
    200
}

fn validate_status(status: u16) -> anyhow::Result<()> {
    if !(100..=599).contains(&status) {
        anyhow::bail!("Invalid status code: {}", status);
    }
    Ok(())
}

impl ResponseDefinition {
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_status(self.status)?;
        for (name, value) in &self.headers {
            crate::request::header_pair(name.as_str(), value.as_str())
                .with_context(|| format!("header {name:?}"))?;
        }
        Ok(())
    }
}

/// Body source. Each kind implies a default content type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBody {
    Text { content: String },
    Json { content: serde_json::Value },
    /// Binary content, base64 encoded
    Base64 { content: String },
    /// Read from disk on every resolve
    File { path: String },
}

impl ResponseBody {
    /// Resolve to bytes. `file` bodies are read again on every call.
    pub async fn load(&self) -> anyhow::Result<Vec<u8>> {
        use base64::Engine;

        let bytes = match self {
            ResponseBody::Text { content } => content.clone().into_bytes(),
            ResponseBody::Json { content } => serde_json::to_vec(content)?,
            ResponseBody::Base64 { content } => base64::engine::general_purpose::STANDARD
                .decode(content)
                .context("body is not valid base64")?,
            ResponseBody::File { path } => {
                tokio::fs::read(path).await.with_context(|| format!("reading body file {path}"))?
            }
        };
        Ok(bytes)
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ResponseBody::Text { .. } => "text/plain",
            ResponseBody::Json { .. } => "application/json",
            ResponseBody::Base64 { .. } | ResponseBody::File { .. } => "application/octet-stream",
        }
    }
}

/// Fixed delay, or a uniformly random one in `min_ms..=max_ms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DelayConfig {
    #[serde(default)]
    pub fixed_ms: u64,

    #[serde(default)]
    pub min_ms: u64,

    #[serde(default)]
    pub max_ms: u64,
}

impl DelayConfig {
    /// Pick the delay for one resolve. `fixed_ms` wins over the range.
    pub fn sample(&self) -> Duration {
        use rand::Rng;

        let ms = match (self.fixed_ms, self.min_ms, self.max_ms) {
            (fixed, _, _) if fixed > 0 => fixed,
            (_, min, max) if max > min => rand::thread_rng().gen_range(min..=max),
            (_, min, _) => min,
        };
        Duration::from_millis(ms)
    }
}

/// Failure a stub resolves to instead of its response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FaultConfig {
    /// Respond with an error status instead of the configured response
    Error {
        status: u16,
        #[serde(default)]
        message: Option<String>,
    },
    /// Fail the resolver as if the connection broke
    NetworkError {
        #[serde(default)]
        message: Option<String>,
    },
}

/// Dispatch-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalSettings {
    /// What to do with requests no stub matches
    #[serde(default)]
    pub on_unhandled_request: UnhandledRequestStrategy,

    /// Log mocked responses at info level
    #[serde(default = "default_true")]
    pub log_matches: bool,

    /// Content type for bodies that do not imply one
    #[serde(default = "default_content_type")]
    pub default_content_type: String,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            on_unhandled_request: UnhandledRequestStrategy::default(),
            log_matches: true,
            default_content_type: default_content_type(),
        }
    }
}

fn default_content_type() -> String {
    "application/json".to_string()
}
