use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use serde_json::{json, Value};

use crate::{
    app::AppState,
    error::ChatError,
    identity::{caller_from_headers, Caller},
    messages,
    policy::{self, Action},
    realtime::{session_channel, EVENT_TYPING, QUEUE_CHANNEL},
    sessions,
    types::{EventEnvelopeIn, SenderRole},
};

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let caller = match caller_from_headers(&headers) {
        Ok(caller) => caller,
        Err(err) => return err.into_response(),
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, caller))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, caller: Caller) {
    let (client_id, mut rx) = state.realtime.connect().await;
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let send_task = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if ws_sender.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    tracing::debug!(client_id, caller = %caller.id, "websocket connected");

    while let Some(Ok(message)) = ws_receiver.next().await {
        let text = match message {
            Message::Text(text) => text.to_string(),
            Message::Close(_) => break,
            _ => continue,
        };

        let Ok(envelope) = serde_json::from_str::<EventEnvelopeIn>(&text) else {
            continue;
        };

        if let Err(err) = handle_event(&state, client_id, &caller, envelope).await {
            state
                .realtime
                .send_to(client_id, "error", json!({ "message": err.public_message() }))
                .await;
        }
    }

    state.realtime.disconnect(client_id).await;
    send_task.abort();
    tracing::debug!(client_id, "websocket closed");
}

fn session_id_of(data: &Value) -> Result<&str, ChatError> {
    data.get("sessionId")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ChatError::invalid("sessionId is required"))
}

async fn handle_event(
    state: &AppState,
    client_id: usize,
    caller: &Caller,
    envelope: EventEnvelopeIn,
) -> Result<(), ChatError> {
    match envelope.event.as_str() {
        "chat:join" => {
            policy::check(caller, Action::JoinChannel)?;
            let session_id = session_id_of(&envelope.data)?;
            let session = sessions::load_session(state, session_id).await?;
            policy::ensure_can_view(caller, &session)?;

            state
                .realtime
                .join(client_id, &session_channel(session_id))
                .await;
            let history = messages::history(state, session_id).await?;
            state
                .realtime
                .send_to(client_id, "session:history", history)
                .await;
        }
        "chat:leave" => {
            let session_id = session_id_of(&envelope.data)?;
            state
                .realtime
                .leave(client_id, &session_channel(session_id))
                .await;
        }
        "chat:typing" => {
            let session_id = session_id_of(&envelope.data)?;
            let channel = session_channel(session_id);
            // only members of the conversation may signal typing
            if !state.realtime.is_joined(client_id, &channel).await {
                return Ok(());
            }
            let is_typing = envelope
                .data
                .get("isTyping")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            state
                .realtime
                .publish_except(
                    &channel,
                    EVENT_TYPING,
                    json!({
                        "sessionId": session_id,
                        "senderName": caller.display_name,
                        "isTyping": is_typing,
                    }),
                    client_id,
                )
                .await;
        }
        "chat:message" => {
            let action = match caller.sender_role() {
                SenderRole::Agent => Action::SendAgentMessage,
                SenderRole::Customer | SenderRole::System => Action::SendCustomerMessage,
            };
            policy::check(caller, action)?;
            let session_id = session_id_of(&envelope.data)?;
            let text = envelope
                .data
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or("");
            messages::post_message(
                state,
                session_id,
                &caller.as_participant(),
                caller.sender_role(),
                text,
                Vec::new(),
            )
            .await?;
        }
        "queue:join" => {
            policy::check(caller, Action::ViewQueue)?;
            state.realtime.join(client_id, QUEUE_CHANNEL).await;
        }
        other => {
            tracing::debug!(client_id, event = other, "ignoring unknown websocket event");
        }
    }
    Ok(())
}
