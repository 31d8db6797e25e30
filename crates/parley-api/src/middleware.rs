use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::token::TOKEN_HEADER;

/// The auth gate in front of every protected route: validates the `Token`
/// header and stores the resulting `Claims` in request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = req
        .headers()
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok());

    let claims = state.tokens.validate(header).await?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
