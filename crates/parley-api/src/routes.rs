use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::auth::{self, AppState};
use crate::chat;
use crate::health;
use crate::middleware::require_auth;

/// Every route the server exposes. Protected routes sit behind
/// [`require_auth`]; transport layers (CORS, tracing) are added by the binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/healthcheck", get(health::healthcheck))
        .route("/auth/register", post(auth::register))
        .route("/auth/signin", post(auth::signin));

    let protected_routes = Router::new()
        .route("/healthcheck/auth", get(health::healthcheck_auth))
        .route("/auth/signout", post(auth::signout))
        .route("/chat/send", post(chat::send_chat))
        .route("/chat/read", get(chat::read_chat))
        .route("/chat/ws", get(chat::live_connect))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::test_support::{NullSink, harness};
    use parley_gateway::LiveConnection;

    async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn post(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::post(uri).header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("Token", format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get_with(uri: &str, token: &str) -> Request<Body> {
        Request::get(uri)
            .header("Token", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    }

    /// Register and sign in; returns (user id, token).
    async fn signup(app: &Router, name: &str, email: &str) -> (String, String) {
        let (status, body) = call(
            app,
            post("/auth/register", None, json!({"name": name, "email": email, "password": "hunter22"})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let id = body["id"].as_str().unwrap().to_string();

        let (status, body) = call(
            app,
            post("/auth/signin", None, json!({"email": email, "password": "hunter22"})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        (id, body["token"].as_str().unwrap().to_string())
    }

    #[tokio::test]
    async fn healthcheck_is_public() {
        let h = harness().await;
        let app = router(h.state);

        let req = Request::get("/healthcheck").body(Body::empty()).unwrap();
        let (status, body) = call(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "ok");
    }

    #[tokio::test]
    async fn protected_routes_need_a_token() {
        let h = harness().await;
        let app = router(h.state);

        let req = Request::get("/chat/read").body(Body::empty()).unwrap();
        let (status, body) = call(&app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Unauthorized");

        let (status, _) = call(&app, get_with("/healthcheck/auth", "not.a.jwt")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let h = harness().await;
        let app = router(h.state);
        signup(&app, "Alice", "a@x.io").await;

        let (status, body) = call(
            &app,
            post("/auth/register", None, json!({"name": "Al", "email": "a@x.io", "password": "pw"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "User with email a@x.io already exists");
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let h = harness().await;
        let app = router(h.state);
        signup(&app, "Alice", "a@x.io").await;

        let (status, body) = call(
            &app,
            post("/auth/signin", None, json!({"email": "a@x.io", "password": "nope"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid credentials");

        let (status, _) = call(
            &app,
            post("/auth/signin", None, json!({"email": "who@x.io", "password": "nope"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn send_then_read_history() {
        let h = harness().await;
        let app = router(h.state);
        let (alice_id, alice) = signup(&app, "Alice", "a@x.io").await;
        let (bob_id, bob) = signup(&app, "Bob", "b@x.io").await;

        let (status, body) = call(
            &app,
            post("/chat/send", Some(&alice), json!({"receiver_id": bob_id, "message": "hi"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Chat sent");

        let (status, body) = call(&app, get_with("/chat/read", &bob)).await;
        assert_eq!(status, StatusCode::OK);
        let history = body.as_array().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0]["sender_id"], alice_id.as_str());
        assert_eq!(history[0]["message"], "hi");
    }

    #[tokio::test]
    async fn malformed_send_is_bad_request() {
        let h = harness().await;
        let app = router(h.state);
        let (_, alice) = signup(&app, "Alice", "a@x.io").await;

        let (status, body) = call(
            &app,
            post("/chat/send", Some(&alice), json!({"receiver_id": "not-a-uuid", "message": 3})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Error reading payload");
    }

    #[tokio::test]
    async fn signout_revokes_token() {
        let h = harness().await;
        let app = router(h.state);
        let (_, alice) = signup(&app, "Alice", "a@x.io").await;

        let (status, _) = call(&app, get_with("/healthcheck/auth", &alice)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(&app, post("/auth/signout", Some(&alice), json!({}))).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (status, _) = call(&app, get_with("/chat/read", &alice)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn second_live_connection_conflicts() {
        let h = harness().await;
        let state = h.state.clone();
        let app = router(h.state);
        let (alice_id, alice) = signup(&app, "Alice", "a@x.io").await;

        let conn = LiveConnection::new(alice_id.clone(), NullSink);
        assert!(state.registry.claim(&alice_id, conn).await.is_ok());

        let req = Request::get("/chat/ws")
            .header("Token", format!("Bearer {alice}"))
            .header("connection", "upgrade")
            .header("upgrade", "websocket")
            .header("sec-websocket-version", "13")
            .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
            .body(Body::empty())
            .unwrap();
        let (status, body) = call(&app, req).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "Live connection already active");
    }
}
