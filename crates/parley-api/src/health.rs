use axum::Json;

use parley_types::api::Ack;

pub async fn healthcheck() -> Json<Ack> {
    Json(Ack::new("ok"))
}

/// Same as [`healthcheck`] but behind the auth gate, so clients can check a
/// credential cheaply.
pub async fn healthcheck_auth() -> Json<Ack> {
    Json(Ack::new("Authenticated"))
}
