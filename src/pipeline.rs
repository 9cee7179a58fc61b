//! Request resolution pipeline.
//!
//! [`handle_request`] takes one captured request through bypass detection,
//! handler lookup, outcome classification and the optional response
//! transform, emitting lifecycle events and invoking callbacks along the way.
//!
//! Event order per path:
//!
//! ```text
//! bypass header   start, on_passthrough, end
//! passthrough     start, end, on_passthrough
//! empty resolver  start, (warning), on_passthrough, end
//! no match        start, (strategy), unhandled, on_passthrough, end
//! mocked          start, match, (transform), on_mocked, end
//! ```

use crate::events::{EventEmitter, LifecycleEvent};
use crate::handler::{HandlerError, RequestHandler, ResolverOutcome};
use crate::lookup::{get_response, LookupOutcome, LookupResult};
use crate::request::MockedRequest;
use crate::response::MockedResponse;
use crate::unhandled::UnhandledRequestStrategy;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Failures that abort a dispatch. Every other outcome is a disposition.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("handler {handler:?} failed to resolve the request: {source}")]
    Handler {
        handler: String,
        #[source]
        source: HandlerError,
    },

    #[error("cannot bypass request {request} under the \"error\" unhandled-request strategy")]
    UnhandledRequest { request: String },

    #[error("unhandled request strategy failed: {0}")]
    Strategy(anyhow::Error),
}

/// Per-dispatch options.
#[derive(Debug, Clone, Default)]
pub struct HandleRequestOptions {
    pub on_unhandled_request: UnhandledRequestStrategy,
}

type PassthroughCallback = Arc<dyn Fn(&Arc<MockedRequest>) + Send + Sync>;
type MockedCallback = Arc<dyn Fn(&MockedResponse, &LookupResult) + Send + Sync>;
type TransformFn = Arc<dyn Fn(MockedResponse) -> MockedResponse + Send + Sync>;

/// Optional hooks invoked by the pipeline.
#[derive(Clone, Default)]
pub struct RequestCallbacks {
    on_passthrough_response: Option<PassthroughCallback>,
    on_mocked_response: Option<MockedCallback>,
    transform_response: Option<TransformFn>,
}

impl RequestCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called when the request is left to the network.
    pub fn on_passthrough_response<F>(mut self, f: F) -> Self
    where
        F: Fn(&Arc<MockedRequest>) + Send + Sync + 'static,
    {
        self.on_passthrough_response = Some(Arc::new(f));
        self
    }

    /// Called with the final response and the untransformed lookup result.
    pub fn on_mocked_response<F>(mut self, f: F) -> Self
    where
        F: Fn(&MockedResponse, &LookupResult) + Send + Sync + 'static,
    {
        self.on_mocked_response = Some(Arc::new(f));
        self
    }

    /// Rewrites a mocked response before it is returned.
    pub fn transform_response<F>(mut self, f: F) -> Self
    where
        F: Fn(MockedResponse) -> MockedResponse + Send + Sync + 'static,
    {
        self.transform_response = Some(Arc::new(f));
        self
    }

    fn passthrough(&self, request: &Arc<MockedRequest>) {
        if let Some(callback) = &self.on_passthrough_response {
            callback(request);
        }
    }

    fn mocked(&self, response: &MockedResponse, lookup: &LookupResult) {
        if let Some(callback) = &self.on_mocked_response {
            callback(response, lookup);
        }
    }

    fn transform(&self, response: MockedResponse) -> MockedResponse {
        match &self.transform_response {
            Some(transform) => transform(response),
            None => response,
        }
    }
}

impl fmt::Debug for RequestCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestCallbacks")
            .field("on_passthrough_response", &self.on_passthrough_response.is_some())
            .field("on_mocked_response", &self.on_mocked_response.is_some())
            .field("transform_response", &self.transform_response.is_some())
            .finish()
    }
}

/// Decide between a mocked response and passthrough for `request`.
///
/// Returns `Ok(None)` when the request should reach the network. Errors from
/// resolvers or from the unhandled-request strategy abort the run before
/// `request:end` is emitted.
pub async fn handle_request(
    request: Arc<MockedRequest>,
    handlers: &[Arc<dyn RequestHandler>],
    options: &HandleRequestOptions,
    emitter: &EventEmitter,
    callbacks: &RequestCallbacks,
) -> Result<Option<MockedResponse>, PipelineError> {
    emitter.emit(LifecycleEvent::RequestStart {
        request: request.clone(),
    });

    if request.is_bypassed() {
        debug!(request_id = %request.id(), "Bypass header present, skipping handlers");
        callbacks.passthrough(&request);
        emitter.emit(LifecycleEvent::RequestEnd { request });
        return Ok(None);
    }

    let lookup = match get_response(&request, handlers).await {
        Ok(lookup) => lookup,
        Err(err) => {
            emitter.emit(LifecycleEvent::UnhandledException {
                request: request.clone(),
                error: err.to_string(),
            });
            return Err(err);
        }
    };

    let (handler, parsed_request, public_request, outcome) = match lookup {
        LookupOutcome::NoMatch => {
            debug!(request_id = %request.id(), "No handler matched request");
            options.on_unhandled_request.apply(&request)?;
            emitter.emit(LifecycleEvent::RequestUnhandled {
                request: request.clone(),
            });
            callbacks.passthrough(&request);
            emitter.emit(LifecycleEvent::RequestEnd { request });
            return Ok(None);
        }
        LookupOutcome::Matched {
            handler,
            parsed_request,
            public_request,
            outcome,
        } => (handler, parsed_request, public_request, outcome),
    };

    let response = match outcome {
        ResolverOutcome::Response(response) => response,
        ResolverOutcome::Passthrough => {
            debug!(
                request_id = %request.id(),
                handler = %handler.info().header,
                "Resolver requested passthrough"
            );
            emitter.emit(LifecycleEvent::RequestEnd {
                request: request.clone(),
            });
            callbacks.passthrough(&request);
            return Ok(None);
        }
        ResolverOutcome::Empty => {
            warn_empty_resolver(&request, handler.as_ref());
            callbacks.passthrough(&request);
            emitter.emit(LifecycleEvent::RequestEnd { request });
            return Ok(None);
        }
    };

    emitter.emit(LifecycleEvent::RequestMatch {
        request: request.clone(),
    });

    let final_response = callbacks.transform(response.clone());
    let lookup_result = LookupResult {
        handler,
        response,
        public_request,
        parsed_request,
    };
    callbacks.mocked(&final_response, &lookup_result);

    emitter.emit(LifecycleEvent::RequestEnd { request });
    Ok(Some(final_response))
}

fn warn_empty_resolver(request: &MockedRequest, handler: &dyn RequestHandler) {
    let info = handler.info();
    let location = info
        .location
        .map(|location| format!("\n    {location}"))
        .unwrap_or_default();

    warn!(
        request_id = %request.id(),
        handler = %info.header,
        "Warning: Expected response resolver to return a mocked response, but got nothing. \
         The original response is going to be used instead.\n\n  \u{2022} {}{}",
        request.label(),
        location
    );
}
