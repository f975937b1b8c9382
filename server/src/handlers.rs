use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Multipart, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;

use crate::{
    app::AppState,
    attachments::content_type_for,
    error::ChatError,
    identity::{caller_from_headers, Caller},
    messages,
    policy::{self, Action},
    sessions,
    types::{
        AgentConversationView, AgentQueueView, ChatMessage, ChatSession, ConversationView,
        MarkedRead, SendMessageBody, UnreadCount, UploadResult,
    },
};

fn authorize(headers: &HeaderMap, action: Action) -> Result<Caller, ChatError> {
    let caller = caller_from_headers(headers)?;
    policy::check(&caller, action)?;
    Ok(caller)
}

/// Pulls the `file` field out of a multipart form.
async fn read_file_field(multipart: &mut Multipart) -> Result<(String, Bytes), ChatError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ChatError::invalid(format!("malformed upload: {err}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|err| ChatError::invalid(format!("malformed upload: {err}")))?;
        return Ok((file_name, bytes));
    }
    Err(ChatError::invalid("No file uploaded"))
}

pub async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true, "time": Utc::now() }))
}

pub async fn open_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ConversationView>, ChatError> {
    let caller = authorize(&headers, Action::OpenConversation)?;
    let view = messages::open_conversation(&state, &caller.as_customer()).await?;
    Ok(Json(view))
}

pub async fn post_customer_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<SendMessageBody>,
) -> Result<(StatusCode, Json<ChatMessage>), ChatError> {
    let caller = authorize(&headers, Action::SendCustomerMessage)?;
    let session = sessions::get_or_create_session(&state, &caller.as_customer()).await?;
    let message = messages::post_message(
        &state,
        &session.id,
        &caller.as_participant(),
        caller.sender_role(),
        &body.text,
        Vec::new(),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn upload_customer_attachment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResult>), ChatError> {
    let caller = authorize(&headers, Action::UploadCustomerAttachment)?;
    let (file_name, bytes) = read_file_field(&mut multipart).await?;
    let session = sessions::get_or_create_session(&state, &caller.as_customer()).await?;
    let upload = messages::send_attachment(
        &state,
        &session.id,
        &caller.as_participant(),
        caller.sender_role(),
        &file_name,
        &bytes,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(upload)))
}

pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<MarkedRead>, ChatError> {
    let caller = authorize(&headers, Action::MarkRead)?;
    let count = match state.store.find_open_session(&caller.customer_key()).await? {
        Some(session) => messages::mark_agent_messages_read(&state, &session.id).await?,
        None => 0,
    };
    Ok(Json(MarkedRead { count }))
}

pub async fn unread_count(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<UnreadCount>, ChatError> {
    let caller = authorize(&headers, Action::PollUnread)?;
    let unread_count = messages::unread_agent_message_count(&state, &caller.customer_key()).await?;
    Ok(Json(UnreadCount { unread_count }))
}

pub async fn session_history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Json<Vec<ChatMessage>>, ChatError> {
    let caller = authorize(&headers, Action::ViewHistory)?;
    let session = sessions::load_session(&state, &session_id).await?;
    policy::ensure_can_view(&caller, &session)?;
    let history = messages::history(&state, &session_id).await?;
    Ok(Json(history))
}

pub async fn agent_queue(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<AgentQueueView>, ChatError> {
    let caller = authorize(&headers, Action::ViewQueue)?;
    Ok(Json(sessions::agent_queue(&state, &caller).await?))
}

pub async fn agent_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Json<AgentConversationView>, ChatError> {
    // the support desk is agents-only even though history itself is not
    let caller = authorize(&headers, Action::ViewQueue)?;
    Ok(Json(
        sessions::agent_conversation(&state, &session_id, &caller).await?,
    ))
}

pub async fn claim_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Json<ChatSession>, ChatError> {
    let caller = authorize(&headers, Action::ClaimSession)?;
    let session = sessions::claim(&state, &session_id, &caller.as_participant()).await?;
    Ok(Json(session))
}

pub async fn close_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Json<ChatSession>, ChatError> {
    let caller = authorize(&headers, Action::CloseSession)?;
    let session = sessions::close(&state, &session_id, &caller.as_participant()).await?;
    Ok(Json(session))
}

pub async fn post_agent_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Json(body): Json<SendMessageBody>,
) -> Result<(StatusCode, Json<ChatMessage>), ChatError> {
    let caller = authorize(&headers, Action::SendAgentMessage)?;
    let message = messages::post_message(
        &state,
        &session_id,
        &caller.as_participant(),
        caller.sender_role(),
        &body.text,
        Vec::new(),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn upload_agent_attachment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResult>), ChatError> {
    let caller = authorize(&headers, Action::UploadAgentAttachment)?;
    let (file_name, bytes) = read_file_field(&mut multipart).await?;
    let upload = messages::send_attachment(
        &state,
        &session_id,
        &caller.as_participant(),
        caller.sender_role(),
        &file_name,
        &bytes,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(upload)))
}

pub async fn serve_attachment(
    State(state): State<Arc<AppState>>,
    Path(file_name): Path<String>,
) -> Result<Response, ChatError> {
    let bytes = state.attachments.read(&file_name).await?;

    let mut response = Response::new(Body::from(bytes));
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000, immutable"),
    );
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for(&file_name)),
    );
    Ok(response.into_response())
}
