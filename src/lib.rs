//! Mock Interceptor
//!
//! Decides, for every captured outgoing request, whether to answer it with a
//! mocked response or let it through to the real network, and reports each
//! step as lifecycle events.
//!
//! # Features
//!
//! - **Resolution pipeline**: bypass header, first-match lookup, passthrough,
//!   empty-resolver warnings, response transforms
//! - **Lifecycle events**: `request:start`, `request:match`,
//!   `request:unhandled`, `request:end`, `response:mocked`, `response:bypass`
//! - **Unhandled-request strategies**: bypass, warn, error, or custom
//! - **Handlers from code**: closure resolvers with path params and `once`
//! - **Handlers from config**: YAML stubs with templated bodies, delays,
//!   faults and match limits
//!
//! # Example
//!
//! ```ignore
//! use mock_interceptor::{HttpHandler, MockInterceptor, MockedRequest, MockedResponse};
//! use std::sync::Arc;
//!
//! let interceptor = MockInterceptor::new(vec![Arc::new(HttpHandler::get("/user/{id}", |req| async move {
//!     Ok(MockedResponse::json(&serde_json::json!({ "id": req.param("id") })).into())
//! }))]);
//!
//! let request = MockedRequest::new("GET", "https://api.example.com/user/1")?;
//! match interceptor.dispatch(request).await? {
//!     Some(response) => println!("mocked: {}", response.status),
//!     None => println!("perform the real request"),
//! }
//! ```
//!
//! # Example Configuration
//!
//! ```yaml
//! stubs:
//!   - id: user-by-id
//!     request:
//!       method: [GET]
//!       path:
//!         type: template
//!         template: /users/{id}
//!     response:
//!       status: 200
//!       template: true
//!       body:
//!         type: json
//!         content:
//!           id: "{{params.id}}"
//! settings:
//!   on_unhandled_request: warn
//! ```

pub mod config;
pub mod events;
pub mod handler;
pub mod lookup;
pub mod matcher;
pub mod pipeline;
pub mod replay;
pub mod request;
pub mod response;
pub mod service;
pub mod stub;
pub mod template;
pub mod unhandled;

pub use config::InterceptorConfig;
pub use events::{EventEmitter, LifecycleEvent};
pub use handler::{HandlerError, HandlerInfo, HttpHandler, MatchResult, RequestHandler, ResolverOutcome};
pub use lookup::LookupResult;
pub use pipeline::{handle_request, HandleRequestOptions, PipelineError, RequestCallbacks};
pub use request::{MockedRequest, PublicRequest, BYPASS_HEADER};
pub use response::MockedResponse;
pub use service::MockInterceptor;
pub use unhandled::{UnhandledReporter, UnhandledRequestStrategy};
