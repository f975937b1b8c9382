//! Message routing: persist first, then fan out on the session channel.

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::{
    app::AppState,
    error::{ChatError, CONVERSATION_ENDED},
    notices, policy,
    realtime::{session_channel, EVENT_AGENT_MESSAGE, EVENT_MESSAGES_READ, EVENT_MESSAGE_NEW},
    sessions,
    types::{
        Attachment, ChatMessage, ChatSession, ConversationView, CustomerIdentity, Participant,
        SenderRole, SessionStatus, UploadResult,
    },
};

fn ensure_writable(
    session: &ChatSession,
    sender: &Participant,
    role: SenderRole,
) -> Result<(), ChatError> {
    if session.status == SessionStatus::Closed {
        return Err(ChatError::conflict(CONVERSATION_ENDED));
    }
    if !policy::can_post_to_session(&sender.id, role, session) {
        return Err(ChatError::forbidden("you don't have access to this chat"));
    }
    Ok(())
}

async fn persist_and_broadcast(
    state: &AppState,
    message: ChatMessage,
) -> Result<ChatMessage, ChatError> {
    state.store.insert_message(&message).await?;
    state
        .store
        .touch_session(&message.session_id, message.created_at)
        .await?;

    // Broadcast only after the write; a missed push is recovered by re-fetching history.
    let channel = session_channel(&message.session_id);
    state
        .realtime
        .publish(&channel, EVENT_MESSAGE_NEW, &message)
        .await;
    if message.sender_role == SenderRole::Agent {
        state
            .realtime
            .publish(
                &channel,
                EVENT_AGENT_MESSAGE,
                json!({ "sessionId": message.session_id }),
            )
            .await;
    }
    Ok(message)
}

fn new_message(
    session_id: &str,
    sender: &Participant,
    role: SenderRole,
    text: &str,
    attachments: Vec<Attachment>,
) -> ChatMessage {
    ChatMessage {
        id: Uuid::new_v4().to_string(),
        session_id: session_id.to_string(),
        sender_id: sender.id.clone(),
        sender_display_name: sender.display_name.clone(),
        sender_role: role,
        text_content: text.to_string(),
        attachments,
        created_at: Utc::now(),
        is_read: false,
    }
}

pub async fn post_message(
    state: &AppState,
    session_id: &str,
    sender: &Participant,
    role: SenderRole,
    text: &str,
    attachments: Vec<Attachment>,
) -> Result<ChatMessage, ChatError> {
    let session = sessions::load_session(state, session_id).await?;
    let text = text.trim();
    if text.is_empty() {
        return Err(ChatError::invalid("Message content is required"));
    }
    ensure_writable(&session, sender, role)?;

    let message = new_message(session_id, sender, role, text, attachments);
    let message = persist_and_broadcast(state, message).await?;
    tracing::debug!(
        session_id,
        message_id = %message.id,
        role = role.as_str(),
        "message posted"
    );
    Ok(message)
}

/// Lifecycle notices. Skips the closed-session guard so the close notice
/// itself can be recorded.
pub(crate) async fn append_system_message(
    state: &AppState,
    session: &ChatSession,
    text: &str,
) -> Result<ChatMessage, ChatError> {
    let message = new_message(
        &session.id,
        &Participant::system(),
        SenderRole::System,
        text,
        Vec::new(),
    );
    persist_and_broadcast(state, message).await
}

/// Stores an upload and posts it as a message from `sender`.
///
/// Rights are checked before anything is written to disk.
pub async fn send_attachment(
    state: &AppState,
    session_id: &str,
    sender: &Participant,
    role: SenderRole,
    file_name: &str,
    bytes: &[u8],
) -> Result<UploadResult, ChatError> {
    let session = sessions::load_session(state, session_id).await?;
    ensure_writable(&session, sender, role)?;

    let attachment = state.attachments.store(session_id, file_name, bytes).await?;
    let message = post_message(
        state,
        session_id,
        sender,
        role,
        &notices::attachment_sent(file_name),
        vec![attachment.clone()],
    )
    .await?;
    Ok(UploadResult {
        message,
        attachment,
    })
}

/// Marks the agent's messages as seen by the customer. Repeat calls
/// return 0.
pub async fn mark_agent_messages_read(
    state: &AppState,
    session_id: &str,
) -> Result<u64, ChatError> {
    sessions::load_session(state, session_id).await?;
    let count = state.store.mark_agent_messages_read(session_id).await?;
    if count > 0 {
        state
            .realtime
            .publish(
                &session_channel(session_id),
                EVENT_MESSAGES_READ,
                json!({ "sessionId": session_id, "count": count }),
            )
            .await;
    }
    Ok(count)
}

pub async fn unread_agent_message_count(
    state: &AppState,
    customer_key: &str,
) -> Result<u64, ChatError> {
    match state.store.find_open_session(customer_key).await? {
        Some(session) => state.store.count_unread_agent_messages(&session.id).await,
        None => Ok(0),
    }
}

pub async fn history(state: &AppState, session_id: &str) -> Result<Vec<ChatMessage>, ChatError> {
    sessions::load_session(state, session_id).await?;
    state.store.list_messages(session_id).await
}

/// The customer opening (or reopening) the chat widget.
pub async fn open_conversation(
    state: &AppState,
    customer: &CustomerIdentity,
) -> Result<ConversationView, ChatError> {
    let session = sessions::get_or_create_session(state, customer).await?;
    let marked_read = mark_agent_messages_read(state, &session.id).await?;
    let messages = state.store.list_messages(&session.id).await?;
    Ok(ConversationView {
        channel: session_channel(&session.id),
        session,
        messages,
        marked_read,
        unread_poll_seconds: state.config.unread_poll_seconds,
    })
}
