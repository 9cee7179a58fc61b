//! Lifecycle events published while requests are dispatched.
//!
//! Every event carries the `Arc<MockedRequest>` it belongs to, so listeners can
//! tell interleaved dispatches apart by identity or by [`MockedRequest::id`].

use crate::request::MockedRequest;
use crate::response::MockedResponse;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::trace;

/// Default buffer for broadcast subscribers.
const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    RequestStart {
        request: Arc<MockedRequest>,
    },
    RequestMatch {
        request: Arc<MockedRequest>,
    },
    RequestUnhandled {
        request: Arc<MockedRequest>,
    },
    RequestEnd {
        request: Arc<MockedRequest>,
    },
    ResponseMocked {
        request: Arc<MockedRequest>,
        response: MockedResponse,
        /// Header of the handler that produced the response
        handler: String,
    },
    ResponseBypass {
        request: Arc<MockedRequest>,
    },
    /// A resolver failed; the dispatch is aborted.
    UnhandledException {
        request: Arc<MockedRequest>,
        error: String,
    },
}

impl LifecycleEvent {
    /// Wire name of the event, e.g. `request:start`.
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::RequestStart { .. } => "request:start",
            LifecycleEvent::RequestMatch { .. } => "request:match",
            LifecycleEvent::RequestUnhandled { .. } => "request:unhandled",
            LifecycleEvent::RequestEnd { .. } => "request:end",
            LifecycleEvent::ResponseMocked { .. } => "response:mocked",
            LifecycleEvent::ResponseBypass { .. } => "response:bypass",
            LifecycleEvent::UnhandledException { .. } => "unhandled:exception",
        }
    }

    pub fn request(&self) -> &Arc<MockedRequest> {
        match self {
            LifecycleEvent::RequestStart { request }
            | LifecycleEvent::RequestMatch { request }
            | LifecycleEvent::RequestUnhandled { request }
            | LifecycleEvent::RequestEnd { request }
            | LifecycleEvent::ResponseMocked { request, .. }
            | LifecycleEvent::ResponseBypass { request }
            | LifecycleEvent::UnhandledException { request, .. } => request,
        }
    }
}

type Listener = Arc<dyn Fn(&LifecycleEvent) + Send + Sync>;

/// Publish side of the lifecycle channel.
///
/// `emit` never blocks and never fails: inline listeners run synchronously,
/// broadcast subscribers get a clone, and an event nobody listens to is
/// dropped.
#[derive(Clone)]
pub struct EventEmitter {
    sender: broadcast::Sender<LifecycleEvent>,
    listeners: Arc<RwLock<Vec<Listener>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            listeners: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Register a listener invoked inline for every event.
    pub fn on<F>(&self, listener: F)
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        listeners.push(Arc::new(listener));
    }

    /// Receive events asynchronously. Slow receivers may observe `Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    pub fn remove_all_listeners(&self) {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        listeners.clear();
    }

    pub fn emit(&self, event: LifecycleEvent) {
        trace!(event = event.name(), request_id = %event.request().id(), "emit");

        // Snapshot so listeners may register further listeners.
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for listener in &listeners {
            listener(&event);
        }

        // No receivers is not an error.
        let _ = self.sender.send(event);
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn request() -> Arc<MockedRequest> {
        Arc::new(MockedRequest::new("GET", "http://localhost/").unwrap())
    }

    #[test]
    fn test_emit_without_subscribers() {
        let emitter = EventEmitter::new();
        emitter.emit(LifecycleEvent::RequestStart { request: request() });
    }

    #[test]
    fn test_listeners_run_inline_in_order() {
        let emitter = EventEmitter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        emitter.on(move |event| sink.lock().unwrap().push(event.name()));

        let req = request();
        emitter.emit(LifecycleEvent::RequestStart { request: req.clone() });
        emitter.emit(LifecycleEvent::RequestEnd { request: req });

        assert_eq!(*seen.lock().unwrap(), vec!["request:start", "request:end"]);

        emitter.remove_all_listeners();
        emitter.emit(LifecycleEvent::RequestStart { request: request() });
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_broadcast_subscriber_receives_same_request() {
        let emitter = EventEmitter::new();
        let mut rx = emitter.subscribe();

        let req = request();
        emitter.emit(LifecycleEvent::RequestUnhandled { request: req.clone() });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "request:unhandled");
        assert!(Arc::ptr_eq(event.request(), &req));
    }

    #[test]
    fn test_event_names() {
        let req = request();
        let mocked = LifecycleEvent::ResponseMocked {
            request: req.clone(),
            response: MockedResponse::new(200),
            handler: "GET /".to_string(),
        };
        assert_eq!(mocked.name(), "response:mocked");
        assert_eq!(LifecycleEvent::ResponseBypass { request: req.clone() }.name(), "response:bypass");
        assert_eq!(
            LifecycleEvent::UnhandledException {
                request: req,
                error: "boom".to_string()
            }
            .name(),
            "unhandled:exception"
        );
    }
}
