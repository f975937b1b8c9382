use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, types::Json, PgPool, Row};

use super::ChatStore;
use crate::{
    error::ChatError,
    types::{Attachment, ChatMessage, ChatSession, SenderRole, SessionStatus},
};

const SESSION_COLUMNS: &str = "id, customer_key, customer_id, customer_display_name, \
     customer_email, assigned_agent_id, status, created_at, updated_at, last_message_at";

const MESSAGE_COLUMNS: &str = "id, session_id, sender_id, sender_display_name, sender_role, \
     text_content, attachments, created_at, is_read";

pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.db).await
    }
}

fn decode_error(message: String) -> sqlx::Error {
    sqlx::Error::Decode(message.into())
}

fn parse_session_row(row: PgRow) -> Result<ChatSession, ChatError> {
    let status = row
        .try_get::<String, _>("status")?
        .parse::<SessionStatus>()
        .map_err(decode_error)?;
    Ok(ChatSession {
        id: row.try_get("id")?,
        customer_key: row.try_get("customer_key")?,
        customer_id: row.try_get("customer_id")?,
        customer_display_name: row.try_get("customer_display_name")?,
        customer_email: row.try_get("customer_email")?,
        assigned_agent_id: row.try_get("assigned_agent_id")?,
        status,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        last_message_at: row.try_get("last_message_at")?,
    })
}

fn parse_message_row(row: PgRow) -> Result<ChatMessage, ChatError> {
    let sender_role = row
        .try_get::<String, _>("sender_role")?
        .parse::<SenderRole>()
        .map_err(decode_error)?;
    let Json(attachments) = row.try_get::<Json<Vec<Attachment>>, _>("attachments")?;
    Ok(ChatMessage {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        sender_id: row.try_get("sender_id")?,
        sender_display_name: row.try_get("sender_display_name")?,
        sender_role,
        text_content: row.try_get("text_content")?,
        attachments,
        created_at: row.try_get("created_at")?,
        is_read: row.try_get("is_read")?,
    })
}

#[async_trait]
impl ChatStore for PgStore {
    async fn insert_session(&self, session: &ChatSession) -> Result<(), ChatError> {
        sqlx::query(
            r#"
            INSERT INTO chat_sessions (
                id, customer_key, customer_id, customer_display_name, customer_email,
                assigned_agent_id, status, created_at, updated_at, last_message_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)
            "#,
        )
        .bind(&session.id)
        .bind(&session.customer_key)
        .bind(&session.customer_id)
        .bind(&session.customer_display_name)
        .bind(&session.customer_email)
        .bind(&session.assigned_agent_id)
        .bind(session.status.as_str())
        .bind(session.created_at)
        .bind(session.updated_at)
        .bind(session.last_message_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn find_session(&self, session_id: &str) -> Result<Option<ChatSession>, ChatError> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM chat_sessions WHERE id = $1"
        ))
        .bind(session_id)
        .fetch_optional(&self.db)
        .await?;
        row.map(parse_session_row).transpose()
    }

    async fn find_open_session(
        &self,
        customer_key: &str,
    ) -> Result<Option<ChatSession>, ChatError> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM chat_sessions \
             WHERE customer_key = $1 AND status <> $2 \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(customer_key)
        .bind(SessionStatus::Closed.as_str())
        .fetch_optional(&self.db)
        .await?;
        row.map(parse_session_row).transpose()
    }

    async fn list_sessions_by_status(
        &self,
        status: SessionStatus,
    ) -> Result<Vec<ChatSession>, ChatError> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM chat_sessions WHERE status = $1 ORDER BY created_at ASC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(parse_session_row).collect()
    }

    async fn list_active_sessions_for_agent(
        &self,
        agent_id: &str,
    ) -> Result<Vec<ChatSession>, ChatError> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM chat_sessions \
             WHERE assigned_agent_id = $1 AND status = $2"
        ))
        .bind(agent_id)
        .bind(SessionStatus::Active.as_str())
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(parse_session_row).collect()
    }

    async fn claim_session(
        &self,
        session_id: &str,
        agent_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<ChatSession>, ChatError> {
        let row = sqlx::query(&format!(
            "UPDATE chat_sessions SET status = $1, assigned_agent_id = $2, updated_at = $3 \
             WHERE id = $4 AND status = $5 \
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(SessionStatus::Active.as_str())
        .bind(agent_id)
        .bind(at)
        .bind(session_id)
        .bind(SessionStatus::Waiting.as_str())
        .fetch_optional(&self.db)
        .await?;
        row.map(parse_session_row).transpose()
    }

    async fn close_session(
        &self,
        session_id: &str,
        agent_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<ChatSession>, ChatError> {
        let row = sqlx::query(&format!(
            "UPDATE chat_sessions SET status = $1, updated_at = $2 \
             WHERE id = $3 AND assigned_agent_id = $4 AND status = $5 \
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(SessionStatus::Closed.as_str())
        .bind(at)
        .bind(session_id)
        .bind(agent_id)
        .bind(SessionStatus::Active.as_str())
        .fetch_optional(&self.db)
        .await?;
        row.map(parse_session_row).transpose()
    }

    async fn touch_session(&self, session_id: &str, at: DateTime<Utc>) -> Result<(), ChatError> {
        sqlx::query("UPDATE chat_sessions SET last_message_at = $1, updated_at = $1 WHERE id = $2")
            .bind(at)
            .bind(session_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn insert_message(&self, message: &ChatMessage) -> Result<(), ChatError> {
        sqlx::query(
            r#"
            INSERT INTO chat_messages (
                id, session_id, sender_id, sender_display_name, sender_role,
                text_content, attachments, created_at, is_read
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
            "#,
        )
        .bind(&message.id)
        .bind(&message.session_id)
        .bind(&message.sender_id)
        .bind(&message.sender_display_name)
        .bind(message.sender_role.as_str())
        .bind(&message.text_content)
        .bind(Json(&message.attachments))
        .bind(message.created_at)
        .bind(message.is_read)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>, ChatError> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM chat_messages \
             WHERE session_id = $1 ORDER BY created_at ASC"
        ))
        .bind(session_id)
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(parse_message_row).collect()
    }

    async fn mark_agent_messages_read(&self, session_id: &str) -> Result<u64, ChatError> {
        let result = sqlx::query(
            "UPDATE chat_messages SET is_read = TRUE \
             WHERE session_id = $1 AND sender_role = $2 AND is_read = FALSE",
        )
        .bind(session_id)
        .bind(SenderRole::Agent.as_str())
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected())
    }

    async fn count_unread_agent_messages(&self, session_id: &str) -> Result<u64, ChatError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(1) FROM chat_messages \
             WHERE session_id = $1 AND sender_role = $2 AND is_read = FALSE",
        )
        .bind(session_id)
        .bind(SenderRole::Agent.as_str())
        .fetch_one(&self.db)
        .await?;
        Ok(count.max(0) as u64)
    }
}

// These need a live PostgreSQL: `DATABASE_URL=... cargo test -- --ignored`.
#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn waiting_session(id: &str) -> ChatSession {
        let now = Utc::now();
        ChatSession {
            id: id.to_string(),
            customer_key: format!("guest:{id}"),
            customer_id: None,
            customer_display_name: "Guest".to_string(),
            customer_email: None,
            assigned_agent_id: None,
            status: SessionStatus::Waiting,
            created_at: now,
            updated_at: now,
            last_message_at: None,
        }
    }

    fn agent_message(id: &str, session_id: &str) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            session_id: session_id.to_string(),
            sender_id: "agent-1".to_string(),
            sender_display_name: "Ada".to_string(),
            sender_role: SenderRole::Agent,
            text_content: "Hi".to_string(),
            attachments: Vec::new(),
            created_at: Utc::now(),
            is_read: false,
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore]
    async fn claim_only_moves_waiting_sessions(db: PgPool) {
        let store = PgStore::new(db);
        store.insert_session(&waiting_session("s1")).await.unwrap();

        let claimed = store
            .claim_session("s1", "agent-1", Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.status, SessionStatus::Active);
        assert_eq!(claimed.assigned_agent_id.as_deref(), Some("agent-1"));

        let again = store.claim_session("s1", "agent-2", Utc::now()).await.unwrap();
        assert!(again.is_none());
        let stored = store.find_session("s1").await.unwrap().unwrap();
        assert_eq!(stored.assigned_agent_id.as_deref(), Some("agent-1"));

        assert!(store
            .claim_session("missing", "agent-1", Utc::now())
            .await
            .unwrap()
            .is_none());
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore]
    async fn concurrent_claims_have_one_winner(db: PgPool) {
        let store = Arc::new(PgStore::new(db));
        store.insert_session(&waiting_session("s1")).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .claim_session("s1", &format!("agent-{i}"), Utc::now())
                    .await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore]
    async fn close_requires_assigned_agent_and_active_status(db: PgPool) {
        let store = PgStore::new(db);
        store.insert_session(&waiting_session("s1")).await.unwrap();

        // waiting sessions have nobody to close them
        assert!(store
            .close_session("s1", "agent-1", Utc::now())
            .await
            .unwrap()
            .is_none());

        store
            .claim_session("s1", "agent-1", Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert!(store
            .close_session("s1", "agent-2", Utc::now())
            .await
            .unwrap()
            .is_none());

        let closed = store
            .close_session("s1", "agent-1", Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(closed.status, SessionStatus::Closed);

        assert!(store
            .close_session("s1", "agent-1", Utc::now())
            .await
            .unwrap()
            .is_none());
        assert!(store.find_open_session("guest:s1").await.unwrap().is_none());
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore]
    async fn marking_read_is_idempotent(db: PgPool) {
        let store = PgStore::new(db);
        store.insert_session(&waiting_session("s1")).await.unwrap();
        store.insert_message(&agent_message("m1", "s1")).await.unwrap();
        store.insert_message(&agent_message("m2", "s1")).await.unwrap();

        assert_eq!(store.count_unread_agent_messages("s1").await.unwrap(), 2);
        assert_eq!(store.mark_agent_messages_read("s1").await.unwrap(), 2);
        assert_eq!(store.mark_agent_messages_read("s1").await.unwrap(), 0);
        assert_eq!(store.count_unread_agent_messages("s1").await.unwrap(), 0);

        let messages = store.list_messages("s1").await.unwrap();
        assert!(messages.iter().all(|m| m.is_read));
    }
}
