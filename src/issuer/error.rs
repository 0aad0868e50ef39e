//! OAuth2 protocol errors returned to clients.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;

/// An OAuth2 error response (RFC 6749 §5.2, RFC 9126 §2.3).
///
/// Descriptions are fixed strings so no internal identifiers reach clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum OAuthError {
    /// A required parameter is missing or malformed.
    #[error("invalid_request: {0}")]
    InvalidRequest(&'static str),

    /// The `request_uri` is unknown or expired.
    #[error("invalid_request_uri")]
    InvalidRequestUri,

    /// The client is unknown or does not match the pushed request.
    #[error("invalid_client")]
    InvalidClient,

    /// Client authentication (HTTP Basic) failed on a protected endpoint.
    #[error("invalid_client: authentication failed")]
    ClientAuthenticationFailed,

    /// The authorization code is invalid, expired or already used.
    #[error("invalid_grant")]
    InvalidGrant,

    /// `grant_type` is not `authorization_code`.
    #[error("unsupported_grant_type")]
    UnsupportedGrantType,

    /// `response_type` is not `code`.
    #[error("unsupported_response_type")]
    UnsupportedResponseType,

    /// Token minting failed on the server side.
    #[error("server_error")]
    ServerError,
}

impl OAuthError {
    /// RFC 6749 error code.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidRequestUri => "invalid_request_uri",
            Self::InvalidClient | Self::ClientAuthenticationFailed => "invalid_client",
            Self::InvalidGrant => "invalid_grant",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::UnsupportedResponseType => "unsupported_response_type",
            Self::ServerError => "server_error",
        }
    }

    /// Human-readable description.
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::InvalidRequest(detail) => detail,
            Self::InvalidRequestUri => "The request_uri is invalid or has expired",
            Self::InvalidClient => "Client is unknown or does not match the authorization request",
            Self::ClientAuthenticationFailed => "Client authentication failed",
            Self::InvalidGrant => "The authorization code is invalid, expired, or already used",
            Self::UnsupportedGrantType => "Only authorization_code is supported",
            Self::UnsupportedResponseType => "Only response_type=code is supported",
            Self::ServerError => "The server could not complete the request",
        }
    }

    /// HTTP status for this error.
    #[must_use]
    pub fn status(self) -> StatusCode {
        match self {
            Self::ClientAuthenticationFailed => StatusCode::UNAUTHORIZED,
            Self::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.code(),
            "error_description": self.description(),
        }));
        let mut response = (self.status(), body).into_response();
        let headers = response.headers_mut();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        if self == Self::ClientAuthenticationFailed {
            headers.insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Basic realm=\"fapi-auth\""),
            );
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_error_is_500_and_the_rest_400() {
        assert_eq!(OAuthError::ServerError.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(OAuthError::InvalidGrant.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            OAuthError::InvalidRequest("client_id is required").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            OAuthError::ClientAuthenticationFailed.status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn client_auth_failure_shares_the_invalid_client_code() {
        assert_eq!(OAuthError::ClientAuthenticationFailed.code(), "invalid_client");
        assert_eq!(OAuthError::InvalidClient.code(), "invalid_client");
    }

    #[tokio::test]
    async fn response_body_has_error_and_description() {
        // GIVEN: an invalid_request error
        let response = OAuthError::InvalidRequest("scope is required").into_response();

        // THEN: 400 with the OAuth2 error body and no-store
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "invalid_request");
        assert_eq!(body["error_description"], "scope is required");
    }
}
