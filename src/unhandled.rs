//! Policies for requests no handler matched.

use crate::pipeline::PipelineError;
use crate::request::MockedRequest;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{error, warn};

type CustomStrategy = Arc<dyn Fn(&MockedRequest, &UnhandledReporter<'_>) -> anyhow::Result<()> + Send + Sync>;

/// What to do when a request reaches the network without a matching handler.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnhandledRequestStrategy {
    /// Pass through silently.
    Bypass,
    /// Pass through and log a warning.
    #[default]
    Warn,
    /// Log an error and fail the dispatch.
    Error,
    /// User-supplied policy. Returning an error fails the dispatch.
    #[serde(skip)]
    Custom(CustomStrategy),
}

impl UnhandledRequestStrategy {
    pub fn custom<F>(strategy: F) -> Self
    where
        F: Fn(&MockedRequest, &UnhandledReporter<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        UnhandledRequestStrategy::Custom(Arc::new(strategy))
    }

    /// Run the policy for `request`.
    pub fn apply(&self, request: &MockedRequest) -> Result<(), PipelineError> {
        let reporter = UnhandledReporter::new(request);
        match self {
            UnhandledRequestStrategy::Bypass => Ok(()),
            UnhandledRequestStrategy::Warn => {
                reporter.warning(&unhandled_message(request));
                Ok(())
            }
            UnhandledRequestStrategy::Error => {
                reporter.error(&unhandled_message(request));
                Err(PipelineError::UnhandledRequest {
                    request: request.label(),
                })
            }
            UnhandledRequestStrategy::Custom(strategy) => {
                strategy(request, &reporter).map_err(PipelineError::Strategy)
            }
        }
    }
}

impl fmt::Debug for UnhandledRequestStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnhandledRequestStrategy::Bypass => f.write_str("Bypass"),
            UnhandledRequestStrategy::Warn => f.write_str("Warn"),
            UnhandledRequestStrategy::Error => f.write_str("Error"),
            UnhandledRequestStrategy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Diagnostic sink handed to unhandled-request strategies.
///
/// Both methods log and return; neither aborts the dispatch.
pub struct UnhandledReporter<'a> {
    request: &'a MockedRequest,
}

impl<'a> UnhandledReporter<'a> {
    fn new(request: &'a MockedRequest) -> Self {
        Self { request }
    }

    pub fn warning(&self, message: &str) {
        warn!(
            request_id = %self.request.id(),
            method = %self.request.method(),
            url = %self.request.url(),
            "Warning: {}",
            message
        );
    }

    pub fn error(&self, message: &str) {
        error!(
            request_id = %self.request.id(),
            method = %self.request.method(),
            url = %self.request.url(),
            "Error: {}",
            message
        );
    }
}

fn unhandled_message(request: &MockedRequest) -> String {
    let mut url = request.url().clone();
    url.set_fragment(None);
    format!(
        "intercepted a request without a matching request handler:\n\n  \u{2022} {} {}\n\n\
         If you still wish to intercept this unhandled request, please create a request handler for it.",
        request.method(),
        url
    )
}
