use std::{path::PathBuf, sync::Arc};

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::CorsLayer;

use crate::{
    attachments::{AttachmentStore, MAX_ATTACHMENT_BYTES},
    config::Config,
    handlers,
    realtime::RealtimeHub,
    store::{ChatStore, MemoryStore, PgStore},
    ws,
};

// multipart framing on top of the largest accepted file
const UPLOAD_BODY_LIMIT: usize = MAX_ATTACHMENT_BYTES as usize + 1024 * 1024;

pub struct AppState {
    pub store: Arc<dyn ChatStore>,
    pub realtime: RealtimeHub,
    pub attachments: AttachmentStore,
    pub config: Config,
}

impl AppState {
    pub fn new(store: Arc<dyn ChatStore>, config: Config) -> Self {
        Self {
            store,
            realtime: RealtimeHub::new(),
            attachments: AttachmentStore::new(config.attachment_dir.clone()),
            config,
        }
    }

    pub fn in_memory(attachment_dir: impl Into<PathBuf>) -> Self {
        let config = Config {
            attachment_dir: attachment_dir.into(),
            ..Config::default()
        };
        Self::new(Arc::new(MemoryStore::new()), config)
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/chat", get(handlers::open_conversation))
        .route("/api/chat/messages", post(handlers::post_customer_message))
        .route(
            "/api/chat/attachments",
            post(handlers::upload_customer_attachment)
                .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/api/chat/read", post(handlers::mark_read))
        .route("/api/chat/unread-count", get(handlers::unread_count))
        .route(
            "/api/chat/sessions/{session_id}/messages",
            get(handlers::session_history),
        )
        .route("/api/support/queue", get(handlers::agent_queue))
        .route(
            "/api/support/sessions/{session_id}",
            get(handlers::agent_conversation),
        )
        .route(
            "/api/support/sessions/{session_id}/claim",
            post(handlers::claim_session),
        )
        .route(
            "/api/support/sessions/{session_id}/close",
            post(handlers::close_session),
        )
        .route(
            "/api/support/sessions/{session_id}/messages",
            post(handlers::post_agent_message),
        )
        .route(
            "/api/support/sessions/{session_id}/attachments",
            post(handlers::upload_agent_attachment)
                .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/attachments/{file_name}", get(handlers::serve_attachment))
        .route("/ws", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn build_store(config: &Config) -> Result<Arc<dyn ChatStore>, Box<dyn std::error::Error>> {
    let Some(options) = config.database.clone() else {
        tracing::warn!("no database configured, chat sessions are kept in memory only");
        return Ok(Arc::new(MemoryStore::new()));
    };

    tracing::info!("connecting to postgres");
    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await?;
    let store = PgStore::new(db);
    store.migrate().await?;
    tracing::info!("database migrations applied");
    Ok(Arc::new(store))
}

pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let store = build_store(&config).await?;
    let port = config.port;
    let state = Arc::new(AppState::new(store, config));
    state.attachments.ensure_root().await?;
    tracing::info!(
        dir = %state.attachments.root().display(),
        "attachment storage ready"
    );

    let app = router(state);
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("support chat server running at http://localhost:{port}");
    axum::serve(listener, app).await?;
    Ok(())
}
