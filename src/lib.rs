use axum::{extract::Request, http::HeaderName};

use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Configuration, identity and error types shared by every component.
pub mod auth;
pub mod config;
pub mod error;

// The dispatch pipeline: route table, handlers, views and the router itself.
pub mod handlers;
pub mod router;
pub mod routes;
pub mod views;

// Upload validation and persistence.
pub mod upload;

// --- Public Re-exports ---

pub use auth::{Anonymous, Identity, IdentityProvider, IdentityState, JwtIdentityProvider, StaticIdentity};
pub use config::{AppConfig, Env};
pub use error::{ConfigError, DispatchError, HttpFailure, UrlError, ViewError};
pub use handlers::{Handler, HandlerOutput, HandlerResult, Page, RouteContext};
pub use router::{DispatchOutcome, RequestInfo, Router};
pub use routes::{AccessPolicy, RouteParams, Target};
pub use upload::{UploadDescriptor, UploadError, UploadPolicy, UploadStatus, UploadedFile};

/// create_app
///
/// Wraps a configured [`Router`] in an axum service. Every request, whatever
/// its method or path, goes through [`Router::dispatch`]; the outcome becomes
/// the HTTP response.
///
/// The observability layers mirror a production stack: a request id is
/// generated for every request, the whole lifecycle runs in a tracing span
/// carrying that id, and the id is echoed back to the client.
pub fn create_app(router: Router) -> axum::Router {
    let x_request_id = HeaderName::from_static("x-request-id");

    axum::Router::new()
        .fallback(move |request: Request| {
            let router = router.clone();
            async move { router.dispatch(request).await }
        })
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
}

/// trace_span_logger
///
/// Builds the per-request span with the method, URI and `x-request-id`, so
/// every log line of one request can be correlated.
fn trace_span_logger(request: &Request) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
