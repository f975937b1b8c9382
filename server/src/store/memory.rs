use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::ChatStore;
use crate::{
    error::ChatError,
    types::{ChatMessage, ChatSession, SenderRole, SessionStatus},
};

#[derive(Default)]
struct Tables {
    sessions: HashMap<String, ChatSession>,
    // creation order, used to break created_at ties
    session_order: Vec<String>,
    messages: HashMap<String, Vec<ChatMessage>>,
}

/// Process-local store used for development and tests.
///
/// Every write goes through a single lock, so the conditional updates are
/// check-and-set inside one critical section.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_by_creation<'a>(
    tables: &'a Tables,
    filter: impl Fn(&ChatSession) -> bool,
) -> Vec<&'a ChatSession> {
    tables
        .session_order
        .iter()
        .filter_map(|id| tables.sessions.get(id))
        .filter(|session| filter(session))
        .collect()
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn insert_session(&self, session: &ChatSession) -> Result<(), ChatError> {
        let mut tables = self.tables.write().await;
        if tables.sessions.contains_key(&session.id) {
            return Err(ChatError::conflict("chat session already exists"));
        }
        tables.session_order.push(session.id.clone());
        tables.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn find_session(&self, session_id: &str) -> Result<Option<ChatSession>, ChatError> {
        let tables = self.tables.read().await;
        Ok(tables.sessions.get(session_id).cloned())
    }

    async fn find_open_session(
        &self,
        customer_key: &str,
    ) -> Result<Option<ChatSession>, ChatError> {
        let tables = self.tables.read().await;
        let open = sorted_by_creation(&tables, |s| {
            s.customer_key == customer_key && s.status != SessionStatus::Closed
        });
        // later entries win ties, so max_by_key keeps the newest
        Ok(open.into_iter().max_by_key(|s| s.created_at).cloned())
    }

    async fn list_sessions_by_status(
        &self,
        status: SessionStatus,
    ) -> Result<Vec<ChatSession>, ChatError> {
        let tables = self.tables.read().await;
        let mut sessions = sorted_by_creation(&tables, |s| s.status == status)
            .into_iter()
            .cloned()
            .collect::<Vec<_>>();
        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }

    async fn list_active_sessions_for_agent(
        &self,
        agent_id: &str,
    ) -> Result<Vec<ChatSession>, ChatError> {
        let tables = self.tables.read().await;
        Ok(sorted_by_creation(&tables, |s| {
            s.status == SessionStatus::Active && s.assigned_agent_id.as_deref() == Some(agent_id)
        })
        .into_iter()
        .cloned()
        .collect())
    }

    async fn claim_session(
        &self,
        session_id: &str,
        agent_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<ChatSession>, ChatError> {
        let mut tables = self.tables.write().await;
        let Some(session) = tables.sessions.get_mut(session_id) else {
            return Ok(None);
        };
        if session.status != SessionStatus::Waiting {
            return Ok(None);
        }
        session.status = SessionStatus::Active;
        session.assigned_agent_id = Some(agent_id.to_string());
        session.updated_at = at;
        Ok(Some(session.clone()))
    }

    async fn close_session(
        &self,
        session_id: &str,
        agent_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<ChatSession>, ChatError> {
        let mut tables = self.tables.write().await;
        let Some(session) = tables.sessions.get_mut(session_id) else {
            return Ok(None);
        };
        if session.status != SessionStatus::Active
            || session.assigned_agent_id.as_deref() != Some(agent_id)
        {
            return Ok(None);
        }
        session.status = SessionStatus::Closed;
        session.updated_at = at;
        Ok(Some(session.clone()))
    }

    async fn touch_session(&self, session_id: &str, at: DateTime<Utc>) -> Result<(), ChatError> {
        let mut tables = self.tables.write().await;
        if let Some(session) = tables.sessions.get_mut(session_id) {
            session.last_message_at = Some(at);
            session.updated_at = at;
        }
        Ok(())
    }

    async fn insert_message(&self, message: &ChatMessage) -> Result<(), ChatError> {
        let mut tables = self.tables.write().await;
        if !tables.sessions.contains_key(&message.session_id) {
            return Err(ChatError::session_not_found());
        }
        tables
            .messages
            .entry(message.session_id.clone())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>, ChatError> {
        let tables = self.tables.read().await;
        Ok(tables.messages.get(session_id).cloned().unwrap_or_default())
    }

    async fn mark_agent_messages_read(&self, session_id: &str) -> Result<u64, ChatError> {
        let mut tables = self.tables.write().await;
        let Some(messages) = tables.messages.get_mut(session_id) else {
            return Ok(0);
        };
        let mut count = 0;
        for message in messages
            .iter_mut()
            .filter(|m| m.sender_role == SenderRole::Agent && !m.is_read)
        {
            message.is_read = true;
            count += 1;
        }
        Ok(count)
    }

    async fn count_unread_agent_messages(&self, session_id: &str) -> Result<u64, ChatError> {
        let tables = self.tables.read().await;
        Ok(tables
            .messages
            .get(session_id)
            .map(|messages| {
                messages
                    .iter()
                    .filter(|m| m.sender_role == SenderRole::Agent && !m.is_read)
                    .count() as u64
            })
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(
        id: &str,
        key: &str,
        status: SessionStatus,
        created_at: DateTime<Utc>,
    ) -> ChatSession {
        ChatSession {
            id: id.to_string(),
            customer_key: key.to_string(),
            customer_id: None,
            customer_display_name: "Guest".to_string(),
            customer_email: None,
            assigned_agent_id: None,
            status,
            created_at,
            updated_at: created_at,
            last_message_at: None,
        }
    }

    #[tokio::test]
    async fn open_session_lookup_skips_closed_and_prefers_newest() {
        let store = MemoryStore::new();
        let t0 = Utc::now();
        store
            .insert_session(&session("old", "guest-1", SessionStatus::Waiting, t0))
            .await
            .unwrap();
        store
            .insert_session(&session(
                "new",
                "guest-1",
                SessionStatus::Active,
                t0 + Duration::seconds(5),
            ))
            .await
            .unwrap();
        store
            .insert_session(&session(
                "gone",
                "guest-1",
                SessionStatus::Closed,
                t0 + Duration::seconds(9),
            ))
            .await
            .unwrap();

        let found = store.find_open_session("guest-1").await.unwrap().unwrap();
        assert_eq!(found.id, "new");
        assert!(store.find_open_session("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_is_conditional_on_waiting() {
        let store = MemoryStore::new();
        store
            .insert_session(&session("s1", "k", SessionStatus::Waiting, Utc::now()))
            .await
            .unwrap();

        let claimed = store.claim_session("s1", "agent-1", Utc::now()).await.unwrap();
        assert_eq!(claimed.unwrap().assigned_agent_id.as_deref(), Some("agent-1"));

        let second = store.claim_session("s1", "agent-2", Utc::now()).await.unwrap();
        assert!(second.is_none());
        let stored = store.find_session("s1").await.unwrap().unwrap();
        assert_eq!(stored.assigned_agent_id.as_deref(), Some("agent-1"));
    }

    #[tokio::test]
    async fn close_requires_assigned_agent() {
        let store = MemoryStore::new();
        store
            .insert_session(&session("s1", "k", SessionStatus::Waiting, Utc::now()))
            .await
            .unwrap();
        store.claim_session("s1", "agent-1", Utc::now()).await.unwrap();

        assert!(store.close_session("s1", "agent-2", Utc::now()).await.unwrap().is_none());
        let closed = store.close_session("s1", "agent-1", Utc::now()).await.unwrap().unwrap();
        assert_eq!(closed.status, SessionStatus::Closed);
        assert!(store.close_session("s1", "agent-1", Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn messages_need_an_existing_session() {
        let store = MemoryStore::new();
        let message = ChatMessage {
            id: "m1".into(),
            session_id: "missing".into(),
            sender_id: "x".into(),
            sender_display_name: "X".into(),
            sender_role: SenderRole::Customer,
            text_content: "hello".into(),
            attachments: vec![],
            created_at: Utc::now(),
            is_read: false,
        };
        assert!(matches!(
            store.insert_message(&message).await,
            Err(ChatError::NotFound(_))
        ));
    }
}
