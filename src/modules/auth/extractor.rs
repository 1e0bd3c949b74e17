use std::future::Future;
use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::Json;

use crate::services::jwt::AccessClaims;
use crate::AppState;

use super::schema::ErrorResponse;

/// Validated claims of the bearer token on the request. Extraction fails
/// with 401 unless the token parses, verifies, and its session has not
/// been blacklisted by a logout.
#[derive(Debug)]
pub struct AuthClaims(pub AccessClaims);

fn bearer_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

fn unauthorized() -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse::new("Invalid or missing access token")),
    )
}

impl FromRequestParts<Arc<AppState>> for AuthClaims {
    type Rejection = (StatusCode, Json<ErrorResponse>);

    // axum-core 0.5 declares this as `fn -> impl Future + Send`; an `async fn`
    // impl trips E0195 over captured lifetimes. Capture what we need up front
    // and return a 'static block.
    fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        let token = bearer_token(parts);
        let state = state.clone();

        async move {
            let token = token.ok_or_else(unauthorized)?;

            let claims = state.tokens.validate_access_token(&token).map_err(|e| {
                tracing::debug!(error = %e, "access token rejected");
                unauthorized()
            })?;

            // One access token per session, so the session id stands in for
            // the token in the logout blacklist.
            let blacklisted = state
                .auth
                .is_access_token_blacklisted(&claims.sid)
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "blacklist lookup failed");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(ErrorResponse::new("Internal server error")),
                    )
                })?;
            if blacklisted {
                return Err(unauthorized());
            }

            Ok(AuthClaims(claims))
        }
    }
}
