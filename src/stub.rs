//! Handlers built from configured stub definitions.

use crate::config::{FaultConfig, ResponseBody, ResponseDefinition, StubDefinition};
use crate::handler::{describe_matcher, HandlerError, HandlerInfo, MatchResult, RequestHandler, ResolverOutcome};
use crate::matcher::{CompiledMatcher, MatcherError};
use crate::request::{MockedRequest, PublicRequest};
use crate::response::MockedResponse;
use crate::template::{TemplateContext, TemplateEngine};
use async_trait::async_trait;
use http::HeaderValue;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::debug;

/// A [`RequestHandler`] backed by a [`StubDefinition`].
pub struct StubHandler {
    definition: StubDefinition,
    info: HandlerInfo,
    matcher: CompiledMatcher,
    templates: Arc<TemplateEngine>,
    default_content_type: String,
    match_count: AtomicU32,
}

impl StubHandler {
    pub fn new(
        definition: StubDefinition,
        templates: Arc<TemplateEngine>,
        default_content_type: &str,
    ) -> Result<Self, MatcherError> {
        let matcher = CompiledMatcher::compile(&definition.request)?;
        let label = definition.name.as_deref().unwrap_or(&definition.id);
        let info = HandlerInfo::new(format!("{} ({})", describe_matcher(&definition.request), label));

        Ok(Self {
            definition,
            info,
            matcher,
            templates,
            default_content_type: default_content_type.to_string(),
            match_count: AtomicU32::new(0),
        })
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }

    /// How many requests this stub has claimed.
    pub fn match_count(&self) -> u32 {
        self.match_count.load(Ordering::SeqCst)
    }

    async fn build_response(
        &self,
        response: &ResponseDefinition,
        request: &PublicRequest,
    ) -> Result<MockedResponse, HandlerError> {
        let body = match &response.body {
            None => Vec::new(),
            Some(body) if response.template => self.render_body(body, request).await?,
            Some(body) => load_body(body).await?,
        };

        let content_type = response
            .headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.clone())
            .unwrap_or_else(|| {
                response
                    .body
                    .as_ref()
                    .map(|b| b.content_type().to_string())
                    .unwrap_or_else(|| self.default_content_type.clone())
            });

        let mut mocked = MockedResponse::new(response.status).with_header("content-type", content_type)?;
        for (name, value) in &response.headers {
            if !name.eq_ignore_ascii_case("content-type") {
                mocked = mocked.with_header(name.as_str(), value.as_str())?;
            }
        }
        Ok(mocked.with_body(body))
    }

    async fn render_body(&self, body: &ResponseBody, request: &PublicRequest) -> Result<Vec<u8>, HandlerError> {
        let ctx = TemplateContext::from_request(request);
        match body {
            ResponseBody::Text { content } => Ok(self.templates.render(content, &ctx)?.into_bytes()),
            ResponseBody::Json { content } => {
                let rendered = self.templates.render_json(content, &ctx)?;
                serde_json::to_vec(&rendered).map_err(|e| HandlerError::Body(e.to_string()))
            }
            other => load_body(other).await,
        }
    }
}

async fn load_body(body: &ResponseBody) -> Result<Vec<u8>, HandlerError> {
    body.load().await.map_err(|e| HandlerError::Body(format!("{e:#}")))
}

#[async_trait]
impl RequestHandler for StubHandler {
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
        if let Some(delay) = &self.definition.delay {
            let delay = delay.sample();
            if !delay.is_zero() {
                debug!(stub_id = %self.definition.id, delay_ms = delay.as_millis() as u64, "Delaying response");
                tokio::time::sleep(delay).await;
            }
        }

        if self.definition.passthrough {
            return Ok(request.passthrough());
        }

        match &self.definition.fault {
            Some(FaultConfig::NetworkError { message }) => {
                let message = message.clone().unwrap_or_else(|| "connection reset".to_string());
                return Err(HandlerError::Network(message));
            }
            Some(FaultConfig::Error { status, message }) => {
                let body = message.clone().unwrap_or_else(|| "Error".to_string());
                return Ok(MockedResponse::new(*status)
                    .with_content_type(HeaderValue::from_static("text/plain"))
                    .with_body(body)
                    .into());
            }
            None => {}
        }

        match &self.definition.response {
            Some(response) => Ok(self.build_response(response, request).await?.into()),
            None => Ok(ResolverOutcome::Empty),
        }
    }

    fn is_exhausted(&self) -> bool {
        let max = self.definition.max_matches;
        max > 0 && self.match_count() >= max
    }

    fn claim(&self) -> bool {
        let max = self.definition.max_matches;
        self.match_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                (max == 0 || count < max).then_some(count + 1)
            })
            .is_ok()
    }

    fn restore(&self) {
        self.match_count.store(0, Ordering::SeqCst);
    }
}
