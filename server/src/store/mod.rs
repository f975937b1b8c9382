//! Persistence seam for chat sessions and messages.
//!
//! Session mutations are targeted field updates. `claim_session` and
//! `close_session` are conditional: they only write when the row still
//! holds the expected status, and report `None` otherwise so the caller
//! can classify the failure.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::ChatError,
    types::{ChatMessage, ChatSession, SessionStatus},
};

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn insert_session(&self, session: &ChatSession) -> Result<(), ChatError>;

    async fn find_session(&self, session_id: &str) -> Result<Option<ChatSession>, ChatError>;

    /// Most recently created session for `customer_key` whose status is not Closed.
    async fn find_open_session(&self, customer_key: &str)
        -> Result<Option<ChatSession>, ChatError>;

    /// Sessions with `status`, oldest first.
    async fn list_sessions_by_status(
        &self,
        status: SessionStatus,
    ) -> Result<Vec<ChatSession>, ChatError>;

    async fn list_active_sessions_for_agent(
        &self,
        agent_id: &str,
    ) -> Result<Vec<ChatSession>, ChatError>;

    /// Waiting -> Active, assigning `agent_id`. `None` when the session is
    /// missing or no longer Waiting.
    async fn claim_session(
        &self,
        session_id: &str,
        agent_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<ChatSession>, ChatError>;

    /// Active -> Closed, only for the assigned agent. `None` when nothing matched.
    async fn close_session(
        &self,
        session_id: &str,
        agent_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<ChatSession>, ChatError>;

    /// Sets `last_message_at` and `updated_at`.
    async fn touch_session(&self, session_id: &str, at: DateTime<Utc>) -> Result<(), ChatError>;

    async fn insert_message(&self, message: &ChatMessage) -> Result<(), ChatError>;

    /// Messages of one session, oldest first.
    async fn list_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>, ChatError>;

    /// Flags unread Agent messages as read and returns how many changed.
    async fn mark_agent_messages_read(&self, session_id: &str) -> Result<u64, ChatError>;

    async fn count_unread_agent_messages(&self, session_id: &str) -> Result<u64, ChatError>;
}
