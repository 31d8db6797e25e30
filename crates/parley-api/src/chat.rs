use axum::{
    Extension, Json,
    extract::{
        State, WebSocketUpgrade,
        rejection::JsonRejection,
        ws::rejection::WebSocketUpgradeRejection,
    },
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use chrono::{SubsecRound, Utc};
use tracing::{debug, error, info, warn};

use parley_gateway::connection;
use parley_types::api::{Ack, Claims, SendChatRequest};
use parley_types::models::{ChatMessage, Identity};

use crate::auth::{AppState, resolve_identity, with_db};
use crate::error::ApiError;

/// POST /chat/send
///
/// Resolves the sender, parses the payload, then hands off to
/// [`persist_and_publish`]. The caller only ever sees a failure if the
/// payload is bad or the message could not be saved.
pub async fn send_chat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<SendChatRequest>, JsonRejection>,
) -> Result<Json<Ack>, ApiError> {
    let sender = resolve_identity(&state, &claims.email).await?;

    let Json(req) = payload.map_err(|e| {
        info!(sender = %sender.id, "rejecting chat payload: {}", e);
        ApiError::BadRequest("Error reading payload".into())
    })?;

    persist_and_publish(&state, &sender, req).await?;
    Ok(Json(Ack::new("Chat sent")))
}

/// Save the message, then offer it to the receiver's live connection.
///
/// The publish only runs once the insert has succeeded, and its outcome never
/// changes the result: the stored row is the delivery guarantee, the live
/// copy is best effort. Identical requests produce distinct rows.
pub async fn persist_and_publish(
    state: &AppState,
    sender: &Identity,
    req: SendChatRequest,
) -> Result<ChatMessage, ApiError> {
    let chat = ChatMessage {
        sender_id: sender.id,
        receiver_id: req.receiver_id,
        message: req.message,
        // Stored with microsecond precision; stamp at that precision so the
        // live copy and the stored row agree.
        created_at: Utc::now().trunc_subsecs(6),
    };

    let row = chat.clone();
    let chat_id = with_db(state, move |db| db.insert_chat(&row)).await.map_err(|e| {
        error!(sender = %chat.sender_id, receiver = %chat.receiver_id, "Error saving chat: {:#}", e);
        ApiError::Persistence("Error saving chat".into())
    })?;
    debug!(chat_id, sender = %chat.sender_id, receiver = %chat.receiver_id, "chat saved");

    publish(state, &chat).await;
    Ok(chat)
}

/// Hand a saved message to the fanout exchange. Failures are logged and
/// absorbed.
async fn publish(state: &AppState, chat: &ChatMessage) {
    let body = match serde_json::to_vec(chat) {
        Ok(body) => Bytes::from(body),
        Err(e) => {
            error!("Error marshalling chat: {}", e);
            return;
        }
    };

    let routing_key = chat.routing_key();
    if let Err(e) = state.fanout.publish(&routing_key, body).await {
        warn!(%routing_key, "live fanout failed, message remains in history: {}", e);
    }
}

/// GET /chat/read: the caller's full history, both directions, oldest first.
pub async fn read_chat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    let user = resolve_identity(&state, &claims.email).await?;

    let messages = with_db(&state, move |db| db.chat_history(user.id))
        .await
        .map_err(|e| {
            error!("Error reading chat: {:#}", e);
            ApiError::Internal("Error reading chat".into())
        })?;

    Ok(Json(messages))
}

/// GET /chat/ws: upgrade to the caller's live connection.
///
/// A caller who already has an active live connection keeps it; the second
/// attempt is refused before the upgrade handshake is even looked at. The
/// private queue is bound before the upgrade completes, so a message sent
/// after the client sees the handshake finish reaches the new connection.
pub async fn live_connect(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let user = resolve_identity(&state, &claims.email).await?;
    let owner_id = user.id.to_string();

    if state.registry.is_connected(&owner_id).await {
        info!(owner = %owner_id, "live connection already active");
        return Err(ApiError::Conflict("Live connection already active".into()));
    }

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    let subscription = state.fanout.bind(&owner_id).await.map_err(|e| {
        error!(owner = %owner_id, "failed to bind live queue: {}", e);
        ApiError::Internal("Error opening live connection".into())
    })?;

    let registry = state.registry.clone();
    Ok(ws
        .on_upgrade(move |socket| connection::handle_connection(socket, owner_id, registry, subscription))
        .into_response())
}
