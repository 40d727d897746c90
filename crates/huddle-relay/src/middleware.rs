//! Middleware: bearer-token authentication for the REST routes.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use huddle_common::auth::{self, Identity};
use huddle_common::error::HuddleError;
use std::sync::Arc;

use crate::RelayState;

/// Extract and validate the JWT from the `Authorization: Bearer <token>` header.
///
/// On success the caller's [`Identity`] is inserted into the request extensions, so
/// handlers can take `Extension<Identity>`.
pub async fn auth_middleware(
    State(state): State<Arc<RelayState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, HuddleError> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(HuddleError::Unauthorized)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(HuddleError::Unauthorized)?;

    let identity: Identity = auth::identify(token, &state.config.auth.jwt_secret)?;

    request.extensions_mut().insert(identity);

    Ok(next.run(request).await)
}
