// ABOUTME: Authentication extractor resolving the caller's session token to a user id
// ABOUTME: Accepts a Bearer header or a `token` query parameter for WebSocket upgrades

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use sandpit_sandbox::SandboxError;

use crate::response::ApiError;
use crate::AppState;

/// Current authenticated user
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: String,
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = session_token(parts).ok_or(SandboxError::Unauthenticated)?;
        let id = state.identity.resolve_user(&token).await?;
        Ok(Self { id })
    }
}

/// Browsers cannot set headers on a WebSocket handshake, so the query string
/// is checked after the header.
fn session_token(parts: &Parts) -> Option<String> {
    let from_header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string());

    from_header
        .or_else(|| {
            parts.uri.query().and_then(|query| {
                url::form_urlencoded::parse(query.as_bytes())
                    .find(|(key, _)| key == "token")
                    .map(|(_, value)| value.into_owned())
            })
        })
        .filter(|token| !token.is_empty())
}
