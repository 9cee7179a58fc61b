//! First-match handler lookup.

use crate::handler::{MatchResult, RequestHandler, ResolverOutcome};
use crate::pipeline::PipelineError;
use crate::request::{MockedRequest, PublicRequest};
use crate::response::MockedResponse;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Result of scanning the handler list for one request.
pub enum LookupOutcome {
    /// No handler predicate matched.
    NoMatch,
    /// The first matching handler and what its resolver returned.
    Matched {
        handler: Arc<dyn RequestHandler>,
        parsed_request: MatchResult,
        public_request: PublicRequest,
        outcome: ResolverOutcome,
    },
}

/// Record of a request answered with a mocked response.
#[derive(Clone)]
pub struct LookupResult {
    pub handler: Arc<dyn RequestHandler>,
    /// The resolver's response, before any transform was applied
    pub response: MockedResponse,
    pub public_request: PublicRequest,
    pub parsed_request: MatchResult,
}

impl fmt::Debug for LookupResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LookupResult")
            .field("handler", &self.handler.info().header)
            .field("response", &self.response)
            .field("public_request", &self.public_request)
            .field("parsed_request", &self.parsed_request)
            .finish()
    }
}

/// Find the first handler whose predicate matches `request` and run its
/// resolver.
///
/// Handlers are consulted in slice order. Once a predicate matches the scan
/// stops, whatever the resolver returns. Exhausted handlers are skipped.
pub async fn get_response(
    request: &Arc<MockedRequest>,
    handlers: &[Arc<dyn RequestHandler>],
) -> Result<LookupOutcome, PipelineError> {
    for handler in handlers {
        if handler.is_exhausted() {
            continue;
        }

        let parsed_request = handler.parse(request);
        if !parsed_request.matches {
            continue;
        }

        if !handler.claim() {
            debug!(
                request_id = %request.id(),
                handler = %handler.info().header,
                "Handler exhausted by a concurrent request"
            );
            continue;
        }

        debug!(
            request_id = %request.id(),
            handler = %handler.info().header,
            "Handler matched request"
        );

        let public_request = PublicRequest::new(request.clone(), parsed_request.params.clone());
        let outcome = handler
            .resolve(&public_request, &parsed_request)
            .await
            .map_err(|source| PipelineError::Handler {
                handler: handler.info().header.clone(),
                source,
            })?;

        return Ok(LookupOutcome::Matched {
            handler: handler.clone(),
            parsed_request,
            public_request,
            outcome,
        });
    }

    Ok(LookupOutcome::NoMatch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{HandlerError, HttpHandler};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request(url: &str) -> Arc<MockedRequest> {
        Arc::new(MockedRequest::new("GET", url).unwrap())
    }

    fn counting(path: &str, calls: Arc<AtomicUsize>, outcome: ResolverOutcome) -> Arc<dyn RequestHandler> {
        Arc::new(HttpHandler::get(path, move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            let outcome = outcome.clone();
            async move { Ok(outcome) }
        }))
    }

    #[tokio::test]
    async fn test_empty_handler_list() {
        let outcome = get_response(&request("http://localhost/user"), &[]).await.unwrap();
        assert!(matches!(outcome, LookupOutcome::NoMatch));
    }

    #[tokio::test]
    async fn test_first_match_wins() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let handlers = vec![
            counting("/other", Arc::new(AtomicUsize::new(0)), ResolverOutcome::Empty),
            counting("/user", first.clone(), MockedResponse::text("first").into()),
            counting("/user", second.clone(), MockedResponse::text("second").into()),
        ];

        let outcome = get_response(&request("http://localhost/user"), &handlers).await.unwrap();
        match outcome {
            LookupOutcome::Matched { outcome, handler, .. } => {
                assert_eq!(outcome, ResolverOutcome::Response(MockedResponse::text("first")));
                assert!(Arc::ptr_eq(&handler, &handlers[1]));
            }
            LookupOutcome::NoMatch => panic!("expected a match"),
        }
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_resolver_stops_scan() {
        let later = Arc::new(AtomicUsize::new(0));
        let handlers = vec![
            counting("/user", Arc::new(AtomicUsize::new(0)), ResolverOutcome::Empty),
            counting("/user", later.clone(), MockedResponse::text("later").into()),
        ];

        let outcome = get_response(&request("http://localhost/user"), &handlers).await.unwrap();
        assert!(matches!(
            outcome,
            LookupOutcome::Matched {
                outcome: ResolverOutcome::Empty,
                ..
            }
        ));
        assert_eq!(later.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_exhausted_handlers_are_skipped() {
        let handlers: Vec<Arc<dyn RequestHandler>> = vec![
            Arc::new(HttpHandler::get("/user", |_| async { Ok(MockedResponse::text("once").into()) }).once()),
            Arc::new(HttpHandler::get("/user", |_| async { Ok(MockedResponse::text("always").into()) })),
        ];
        let req = request("http://localhost/user");

        for expected in ["once", "always", "always"] {
            match get_response(&req, &handlers).await.unwrap() {
                LookupOutcome::Matched {
                    outcome: ResolverOutcome::Response(response),
                    ..
                } => assert_eq!(response.body_text(), expected),
                _ => panic!("expected a response"),
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_once_handler_serves_one_of_many_concurrent_requests() {
        let handlers: Arc<Vec<Arc<dyn RequestHandler>>> = Arc::new(vec![
            Arc::new(
                HttpHandler::get("/user", |_| async {
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                    Ok(MockedResponse::text("once").into())
                })
                .once(),
            ),
            Arc::new(HttpHandler::get("/user", |_| async { Ok(MockedResponse::text("always").into()) })),
        ]);

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let handlers = handlers.clone();
                tokio::spawn(async move {
                    match get_response(&request("http://localhost/user"), &handlers).await.unwrap() {
                        LookupOutcome::Matched {
                            outcome: ResolverOutcome::Response(response),
                            ..
                        } => response.body_text(),
                        _ => String::new(),
                    }
                })
            })
            .collect();

        let mut bodies = Vec::new();
        for task in tasks {
            bodies.push(task.await.unwrap());
        }
        assert_eq!(bodies.iter().filter(|b| *b == "once").count(), 1);
        assert_eq!(bodies.iter().filter(|b| *b == "always").count(), 15);
    }

    #[tokio::test]
    async fn test_params_reach_public_request() {
        let handlers: Vec<Arc<dyn RequestHandler>> = vec![Arc::new(HttpHandler::get("/users/{id}", |_| async {
            Ok(ResolverOutcome::Passthrough)
        }))];

        match get_response(&request("http://localhost/users/5"), &handlers).await.unwrap() {
            LookupOutcome::Matched {
                public_request,
                parsed_request,
                ..
            } => {
                assert_eq!(public_request.param("id"), Some("5"));
                assert_eq!(parsed_request.params, public_request.params);
            }
            LookupOutcome::NoMatch => panic!("expected a match"),
        }
    }

    #[tokio::test]
    async fn test_resolver_error_names_handler() {
        let handlers: Vec<Arc<dyn RequestHandler>> = vec![Arc::new(HttpHandler::get("/user", |_| async {
            Err(HandlerError::Network("reset".to_string()))
        }))];

        let err = get_response(&request("http://localhost/user"), &handlers)
            .await
            .err()
            .expect("resolver error propagates");
        assert!(matches!(err, PipelineError::Handler { ref handler, .. } if handler == "GET /user"));
    }
}
