//! Interceptor service: owns the handler list and dispatches captured requests.

use crate::config::InterceptorConfig;
use crate::events::{EventEmitter, LifecycleEvent};
use crate::handler::RequestHandler;
use crate::pipeline::{handle_request, HandleRequestOptions, PipelineError, RequestCallbacks};
use crate::request::MockedRequest;
use crate::response::MockedResponse;
use crate::stub::StubHandler;
use crate::template::TemplateEngine;
use crate::unhandled::UnhandledRequestStrategy;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

type TransformFn = Arc<dyn Fn(MockedResponse) -> MockedResponse + Send + Sync>;

/// Counters shared with the pipeline callbacks.
#[derive(Debug, Default)]
struct Stats {
    requests_total: AtomicU64,
    requests_mocked: AtomicU64,
    requests_passthrough: AtomicU64,
}

/// Dispatches captured requests against a mutable handler list.
///
/// The list starts from the handlers given at construction. Runtime overrides
/// added with [`use_handlers`](Self::use_handlers) take precedence until
/// [`reset_handlers`](Self::reset_handlers). Every dispatch works on a snapshot
/// of the list, so changes never affect a request already in flight.
pub struct MockInterceptor {
    initial_handlers: Vec<Arc<dyn RequestHandler>>,
    handlers: RwLock<Vec<Arc<dyn RequestHandler>>>,
    options: HandleRequestOptions,
    emitter: EventEmitter,
    transform: Option<TransformFn>,
    log_matches: bool,
    stats: Arc<Stats>,
    /// Once closed, requests go straight to the network.
    closed: AtomicBool,
}

impl MockInterceptor {
    pub fn new(handlers: Vec<Arc<dyn RequestHandler>>) -> Self {
        Self {
            handlers: RwLock::new(handlers.clone()),
            initial_handlers: handlers,
            options: HandleRequestOptions::default(),
            emitter: EventEmitter::new(),
            transform: None,
            log_matches: true,
            stats: Arc::new(Stats::default()),
            closed: AtomicBool::new(false),
        }
    }

    /// Build stub handlers from configuration, in priority order.
    pub fn from_config(config: &InterceptorConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let templates = Arc::new(TemplateEngine::new());
        let mut handlers: Vec<Arc<dyn RequestHandler>> = Vec::new();
        for stub in config.ordered_stubs() {
            let handler = StubHandler::new(
                stub.clone(),
                templates.clone(),
                &config.settings.default_content_type,
            )?;
            handlers.push(Arc::new(handler));
        }

        info!(
            stubs = config.stubs.len(),
            enabled = handlers.len(),
            on_unhandled_request = ?config.settings.on_unhandled_request,
            "Interceptor initialized"
        );

        let mut interceptor = Self::new(handlers).with_unhandled_strategy(config.settings.on_unhandled_request.clone());
        interceptor.log_matches = config.settings.log_matches;
        Ok(interceptor)
    }

    pub fn with_unhandled_strategy(mut self, strategy: UnhandledRequestStrategy) -> Self {
        self.options.on_unhandled_request = strategy;
        self
    }

    /// Rewrite every mocked response before it is returned.
    pub fn with_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(MockedResponse) -> MockedResponse + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }

    pub fn events(&self) -> &EventEmitter {
        &self.emitter
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.emitter.subscribe()
    }

    /// Prepend runtime handlers; they win over everything registered before.
    pub async fn use_handlers(&self, handlers: Vec<Arc<dyn RequestHandler>>) {
        let mut current = self.handlers.write().await;
        let mut next = handlers;
        next.extend(current.drain(..));
        *current = next;
    }

    /// Drop runtime handlers. With `Some`, replace the initial list as well.
    pub async fn reset_handlers(&self, handlers: Option<Vec<Arc<dyn RequestHandler>>>) {
        let mut current = self.handlers.write().await;
        *current = handlers.unwrap_or_else(|| self.initial_handlers.clone());
    }

    /// Re-arm used `once` handlers and exhausted stubs.
    pub async fn restore_handlers(&self) {
        for handler in self.handlers.read().await.iter() {
            handler.restore();
        }
    }

    pub async fn list_handlers(&self) -> Vec<Arc<dyn RequestHandler>> {
        self.handlers.read().await.clone()
    }

    /// Stop intercepting. Subsequent requests pass through untouched.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.emitter.remove_all_listeners();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn total_requests(&self) -> u64 {
        self.stats.requests_total.load(Ordering::Relaxed)
    }

    pub fn total_mocked(&self) -> u64 {
        self.stats.requests_mocked.load(Ordering::Relaxed)
    }

    pub fn total_passthrough(&self) -> u64 {
        self.stats.requests_passthrough.load(Ordering::Relaxed)
    }

    /// Dispatch one captured request.
    ///
    /// `Ok(None)` means the caller should perform the real network request.
    pub async fn dispatch(&self, request: MockedRequest) -> Result<Option<MockedResponse>, PipelineError> {
        self.stats.requests_total.fetch_add(1, Ordering::Relaxed);

        if self.is_closed() {
            debug!(request_id = %request.id(), "Interceptor closed, passing request through");
            self.stats.requests_passthrough.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        let handlers = self.handlers.read().await.clone();
        let callbacks = self.callbacks();
        handle_request(Arc::new(request), &handlers, &self.options, &self.emitter, &callbacks).await
    }

    fn callbacks(&self) -> RequestCallbacks {
        let bypass_emitter = self.emitter.clone();
        let bypass_stats = self.stats.clone();
        let mocked_emitter = self.emitter.clone();
        let mocked_stats = self.stats.clone();
        let log_matches = self.log_matches;

        let callbacks = RequestCallbacks::new()
            .on_passthrough_response(move |request| {
                bypass_stats.requests_passthrough.fetch_add(1, Ordering::Relaxed);
                bypass_emitter.emit(LifecycleEvent::ResponseBypass {
                    request: request.clone(),
                });
            })
            .on_mocked_response(move |response, lookup| {
                mocked_stats.requests_mocked.fetch_add(1, Ordering::Relaxed);
                let request = &lookup.public_request.request;
                if log_matches {
                    info!(
                        request_id = %request.id(),
                        method = %request.method(),
                        path = %request.path(),
                        handler = %lookup.handler.info().header,
                        status = response.status,
                        "Request mocked"
                    );
                }
                mocked_emitter.emit(LifecycleEvent::ResponseMocked {
                    request: request.clone(),
                    response: response.clone(),
                    handler: lookup.handler.info().header.clone(),
                });
            });

        match &self.transform {
            Some(transform) => {
                let transform = transform.clone();
                callbacks.transform_response(move |response| transform(response))
            }
            None => callbacks,
        }
    }
}
