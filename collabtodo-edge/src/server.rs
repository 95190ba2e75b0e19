//! HTTP surface of the edge validator: `POST /validate-task`.
//!
//! Every response is JSON and carries CORS headers that allow any origin.
//! `OPTIONS` preflights are answered without touching the validator.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use collabtodo_proto::audit::ClientMeta;
use collabtodo_proto::edge::ErrorBody;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::validator::{AccessValidator, Backend, ValidationError};

/// Path the validator is mounted at.
pub const VALIDATE_PATH: &str = "/validate-task";

// ---------------------------------------------------------------------------
// Error responses
// ---------------------------------------------------------------------------

impl ValidationError {
    /// HTTP status for this failure.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingFields
            | Self::MalformedBody
            | Self::InvalidAction(_)
            | Self::DeleteTooOld { .. } => StatusCode::BAD_REQUEST,
            Self::MissingAuthorization | Self::InvalidToken => StatusCode::UNAUTHORIZED,
            Self::AccessDenied => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text for the `error` field of the response body.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ValidationError {
    fn into_response(self) -> Response {
        if let Self::Internal(detail) = &self {
            tracing::error!(error = %detail, "validation failed internally");
        }
        let body = ErrorBody {
            error: self.public_message(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Builds the router with CORS and request tracing.
pub fn router<B: Backend + 'static>(validator: Arc<AccessValidator<B>>) -> axum::Router {
    axum::Router::new()
        .route(
            VALIDATE_PATH,
            axum::routing::post(validate_task::<B>).options(preflight),
        )
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(validator)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            HeaderName::from_static("x-client-info"),
            HeaderName::from_static("apikey"),
            header::CONTENT_TYPE,
        ])
}

/// Answers an `OPTIONS` request that is not a full CORS preflight.
async fn preflight() -> &'static str {
    "ok"
}

async fn validate_task<B: Backend + 'static>(
    State(validator): State<Arc<AccessValidator<B>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let authorization = header_str(&headers, header::AUTHORIZATION.as_str());
    let meta = ClientMeta::new(
        header_str(&headers, "x-forwarded-for"),
        header_str(&headers, header::USER_AGENT.as_str()),
    );

    match validator
        .handle(authorization, &body, &meta, Utc::now())
        .await
    {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => err.into_response(),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

// ---------------------------------------------------------------------------
// Server startup
// ---------------------------------------------------------------------------

/// Starts the edge server and returns the bound address and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state<B: Backend + 'static>(
    addr: &str,
    validator: Arc<AccessValidator<B>>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(validator);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "edge server error");
        }
    });

    Ok((bound_addr, handle))
}
