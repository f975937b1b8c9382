//! Session lifecycle: Waiting -> Active (claim) -> Closed (close).

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::{
    app::AppState,
    error::{ChatError, ALREADY_TAKEN, CONVERSATION_ENDED},
    identity::Caller,
    messages, notices, policy,
    realtime::{session_channel, EVENT_QUEUE_UPDATED, QUEUE_CHANNEL},
    types::{
        AgentConversationView, AgentQueueView, ChatSession, CustomerIdentity, Participant,
        SessionStatus,
    },
};

pub async fn load_session(state: &AppState, session_id: &str) -> Result<ChatSession, ChatError> {
    state
        .store
        .find_session(session_id)
        .await?
        .ok_or_else(ChatError::session_not_found)
}

async fn announce_queue_change(state: &AppState, session: &ChatSession) {
    state
        .realtime
        .publish(
            QUEUE_CHANNEL,
            EVENT_QUEUE_UPDATED,
            json!({ "sessionId": session.id, "status": session.status }),
        )
        .await;
}

/// The status change is already committed, so a failed notice is logged
/// rather than returned.
async fn record_notice(state: &AppState, session: &ChatSession, text: &str) {
    if let Err(err) = messages::append_system_message(state, session, text).await {
        tracing::warn!(session_id = %session.id, error = %err, "failed to record system notice");
    }
}

/// Reuses the customer's newest non-Closed session or opens a Waiting one.
///
/// Two first contacts racing for the same key can both miss the lookup and
/// open two Waiting sessions. That is tolerated: the agent who claims one
/// sees the duplicate in the queue.
pub async fn get_or_create_session(
    state: &AppState,
    customer: &CustomerIdentity,
) -> Result<ChatSession, ChatError> {
    if let Some(existing) = state.store.find_open_session(&customer.key).await? {
        return Ok(existing);
    }

    let now = Utc::now();
    let session = ChatSession {
        id: Uuid::new_v4().to_string(),
        customer_key: customer.key.clone(),
        customer_id: customer.customer_id.clone(),
        customer_display_name: customer.display_name.clone(),
        customer_email: customer.email.clone(),
        assigned_agent_id: None,
        status: SessionStatus::Waiting,
        created_at: now,
        updated_at: now,
        last_message_at: None,
    };
    state.store.insert_session(&session).await?;
    tracing::info!(session_id = %session.id, customer_key = %customer.key, "chat session opened");

    announce_queue_change(state, &session).await;
    Ok(session)
}

pub async fn claim(
    state: &AppState,
    session_id: &str,
    agent: &Participant,
) -> Result<ChatSession, ChatError> {
    let claimed = state
        .store
        .claim_session(session_id, &agent.id, Utc::now())
        .await?;

    let Some(session) = claimed else {
        let current = load_session(state, session_id).await?;
        tracing::info!(
            session_id,
            agent_id = %agent.id,
            status = %current.status,
            "claim lost"
        );
        return Err(match current.status {
            SessionStatus::Closed => ChatError::conflict(CONVERSATION_ENDED),
            _ => ChatError::conflict(ALREADY_TAKEN),
        });
    };

    tracing::info!(session_id, agent_id = %agent.id, "agent claimed chat");
    let notice = notices::agent_joined(&agent.display_name);
    record_notice(state, &session, &notice).await;
    announce_queue_change(state, &session).await;
    Ok(session)
}

pub async fn close(
    state: &AppState,
    session_id: &str,
    agent: &Participant,
) -> Result<ChatSession, ChatError> {
    let closed = state
        .store
        .close_session(session_id, &agent.id, Utc::now())
        .await?;

    let Some(session) = closed else {
        let current = load_session(state, session_id).await?;
        if current.assigned_agent_id.as_deref() != Some(agent.id.as_str()) {
            return Err(ChatError::forbidden("you don't have access to this chat"));
        }
        return Err(ChatError::conflict(CONVERSATION_ENDED));
    };

    tracing::info!(session_id, agent_id = %agent.id, "agent closed chat");
    record_notice(state, &session, &notices::conversation_closed()).await;
    announce_queue_change(state, &session).await;
    Ok(session)
}

/// Waiting queue (oldest first) and the agent's own active chats (most
/// recent activity first).
pub async fn agent_queue(state: &AppState, agent: &Caller) -> Result<AgentQueueView, ChatError> {
    let waiting = state
        .store
        .list_sessions_by_status(SessionStatus::Waiting)
        .await?;
    let mut active = state
        .store
        .list_active_sessions_for_agent(&agent.id)
        .await?;
    active.sort_by(|a, b| b.activity_at().cmp(&a.activity_at()));
    Ok(AgentQueueView { waiting, active })
}

pub async fn agent_conversation(
    state: &AppState,
    session_id: &str,
    agent: &Caller,
) -> Result<AgentConversationView, ChatError> {
    let session = load_session(state, session_id).await?;
    policy::ensure_can_view(agent, &session)?;
    let messages = state.store.list_messages(session_id).await?;
    Ok(AgentConversationView {
        channel: session_channel(&session.id),
        session,
        messages,
    })
}
