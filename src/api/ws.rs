use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};

use crate::api::state::AppState;
use crate::db::{Message, MessageRepository, SessionRepository, UserRepository};
use crate::error::AppError;
use crate::realtime::{ConversationEvent, Delivery, SubscriptionHandle};

#[derive(Debug, Deserialize)]
pub struct SubscribeQuery {
    pub with: String,
    /// Browser websockets cannot set an Authorization header, so the
    /// session token arrives as a query parameter.
    pub token: String,
}

/// What goes down the wire to a subscriber.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Push {
    /// The full ordered conversation, replayed from the store.
    Snapshot { messages: Vec<Message> },
    Presence {
        user_id: String,
        is_online: bool,
        last_seen: i64,
    },
}

/// GET /api/chat/subscribe?with=<user_id>&token=<session token>
///
/// Upgrades to a websocket that first delivers the current
/// conversation, then a fresh snapshot after every mutation of the
/// pair. Closing the socket is the unsubscribe.
pub async fn subscribe(
    State(state): State<AppState>,
    Query(query): Query<SubscribeQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let session = SessionRepository::get_by_token(&state.db, &query.token)
        .await?
        .ok_or_else(|| AppError::Unauthenticated("Invalid or expired session".to_string()))?;
    let user_id = session.user_id;

    if query.with == user_id {
        return Err(AppError::InvalidContent(
            "Cannot subscribe to a conversation with yourself".to_string(),
        ));
    }
    if UserRepository::get_by_id(&state.db, &query.with).await?.is_none() {
        return Err(AppError::NotFound(format!(
            "User {} does not exist",
            query.with
        )));
    }

    // Register before the upgrade completes so nothing published in
    // between is missed; buffered events just trigger extra snapshots.
    let handle = state.subscriptions.subscribe(&user_id, &query.with);

    Ok(ws.on_upgrade(move |socket| run_subscription(socket, state, user_id, query.with, handle)))
}

async fn run_subscription(
    socket: WebSocket,
    state: AppState,
    user_id: String,
    peer_id: String,
    mut handle: SubscriptionHandle,
) {
    let (mut sink, mut stream) = socket.split();

    // First push: the conversation as it stands.
    if let Err(err) = push_snapshot(&mut sink, &state.db, &user_id, &peer_id).await {
        tracing::debug!("📴 Subscription for {} closed before first push: {}", user_id, err);
        handle.unsubscribe();
        return;
    }

    loop {
        tokio::select! {
            delivery = handle.recv() => {
                let result = match delivery {
                    Some(Delivery::Event(ConversationEvent::Presence { user_id, is_online, last_seen })) => {
                        push(&mut sink, &Push::Presence { user_id, is_online, last_seen }).await
                    }
                    // Appends, read flips and lag all resolve the same
                    // way: replay current state from the store.
                    Some(Delivery::Event(_)) | Some(Delivery::Lagged) => {
                        push_snapshot(&mut sink, &state.db, &user_id, &peer_id).await
                    }
                    None => break,
                };
                if let Err(err) = result {
                    tracing::debug!("📴 Subscriber {} lost: {}", user_id, err);
                    break;
                }
            }
            incoming = next_client_frame(&mut stream) => {
                match incoming {
                    ClientFrame::Ignored => {}
                    ClientFrame::Gone => break,
                }
            }
        }
    }

    handle.unsubscribe();
    tracing::debug!("🔌 Subscription closed: {} with {}", user_id, peer_id);
}

enum ClientFrame {
    Ignored,
    Gone,
}

async fn next_client_frame(stream: &mut SplitStream<WebSocket>) -> ClientFrame {
    match stream.next().await {
        Some(Ok(WsMessage::Close(_))) | None => ClientFrame::Gone,
        Some(Ok(_)) => ClientFrame::Ignored,
        Some(Err(_)) => ClientFrame::Gone,
    }
}

async fn push_snapshot(
    sink: &mut SplitSink<WebSocket, WsMessage>,
    db: &Pool<Sqlite>,
    user_id: &str,
    peer_id: &str,
) -> Result<(), AppError> {
    let messages = MessageRepository::conversation(db, user_id, peer_id, None, None).await?;
    push(sink, &Push::Snapshot { messages }).await
}

async fn push(sink: &mut SplitSink<WebSocket, WsMessage>, payload: &Push) -> Result<(), AppError> {
    let text = serde_json::to_string(payload)?;
    sink.send(WsMessage::Text(text))
        .await
        .map_err(|e| AppError::TransportLost(e.to_string()))
}
