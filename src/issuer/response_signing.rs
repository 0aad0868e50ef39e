//! Middleware that signs JSON resource responses as compact JWS.
//!
//! Business services mount this on their routers so consumers can check
//! payload integrity with the issuer's published signing key:
//!
//! ```rust,ignore
//! let app = Router::new()
//!     .route("/investments", get(list_investments))
//!     .layer(axum::middleware::from_fn_with_state(keys.signing.clone(), sign_responses));
//! ```
//!
//! Only `200 OK` responses with a JSON body are signed; everything else
//! passes through untouched. Signed responses carry
//! `Content-Type: application/jose`.

use std::sync::Arc;

use axum::{
    body::{Body, to_bytes},
    extract::{Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::error;

use crate::keys::SigningKeyManager;

/// Media type of a signed response body.
pub const APPLICATION_JOSE: &str = "application/jose";

/// Largest body that will be buffered for signing.
const MAX_SIGNED_BODY: usize = 16 * 1024 * 1024;

fn is_json(response: &Response) -> bool {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"))
}

/// Sign successful JSON responses with `signer`.
pub async fn sign_responses(
    State(signer): State<Arc<SigningKeyManager>>,
    request: Request,
    next: Next,
) -> Response {
    let response = next.run(request).await;
    if response.status() != StatusCode::OK || !is_json(&response) {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, MAX_SIGNED_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(error = %e, "Failed to buffer response for signing");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match signer.sign(&bytes) {
        Ok(jws) => {
            parts.headers.remove(header::CONTENT_LENGTH);
            parts.headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static(APPLICATION_JOSE),
            );
            Response::from_parts(parts, Body::from(jws))
        }
        Err(e) => {
            error!(error = %e, "Failed to sign response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
