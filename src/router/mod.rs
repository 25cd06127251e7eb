//! HTTP API.
pub mod auth_configs;
pub mod status;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, header};
use axum::middleware::Next;
use axum::response::Response;

use crate::session::Caller;
use crate::{AppState, ServerError};

const BEARER: &str = "Bearer ";

/// Resolve the [`Caller`] from a bearer token or the session cookie.
pub async fn auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let Some(token) = session_token(req.headers(), &state.config.session.cookie) else {
        return Err(ServerError::Unauthorized);
    };

    let caller = state
        .accounts
        .find_caller(&token)
        .await
        .map_err(|err| ServerError::internal("failed to look up session", err))?
        .ok_or(ServerError::Unauthorized)?;

    req.extensions_mut().insert::<Caller>(caller);
    Ok(next.run(req).await)
}

/// `Authorization: Bearer` first, then the named cookie.
fn session_token(headers: &HeaderMap, cookie: &str) -> Option<String> {
    if let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix(BEARER))
    {
        return Some(token.trim().to_owned()).filter(|token| !token.is_empty());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|header| header.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == cookie)
        .map(|(_, value)| value.to_owned())
        .filter(|token| !token.is_empty())
}
