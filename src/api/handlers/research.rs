use crate::{
    AppState,
    api::extract::CallerId,
    types::{
        CreateResearchRequest, CreateResearchResponse, ResearchMessagesResponse,
        ResearchStatusResponse, Result, SendMessageRequest, SendMessageResponse,
    },
};
use axum::{
    Json,
    extract::{Path, State},
};

/// Reserve research session ids
///
/// Returns the caller's unused sessions first and creates new ones for the rest.
#[utoipa::path(
    post,
    path = "/api/research",
    request_body = CreateResearchRequest,
    responses(
        (status = 200, description = "Session ids reserved", body = CreateResearchResponse),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Missing X-User-Id")
    ),
    tag = "research"
)]
pub async fn create_research(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Json(payload): Json<CreateResearchRequest>,
) -> Result<Json<CreateResearchResponse>> {
    let response = state.service.create_research(&user_id, payload.num).await?;
    Ok(Json(response))
}

/// Get research status
#[utoipa::path(
    get,
    path = "/api/research/{research_id}",
    responses(
        (status = 200, description = "Current status", body = ResearchStatusResponse),
        (status = 401, description = "Missing X-User-Id"),
        (status = 404, description = "Research not found")
    ),
    params(("research_id" = String, Path, description = "Research session id")),
    tag = "research"
)]
pub async fn get_research(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(research_id): Path<String>,
) -> Result<Json<ResearchStatusResponse>> {
    Ok(Json(state.service.status(&user_id, &research_id).await?))
}

/// Get the full timeline of a research session
#[utoipa::path(
    get,
    path = "/api/research/{research_id}/messages",
    responses(
        (status = 200, description = "Messages and events in sequence order", body = ResearchMessagesResponse),
        (status = 401, description = "Missing X-User-Id"),
        (status = 404, description = "Research not found")
    ),
    params(("research_id" = String, Path, description = "Research session id")),
    tag = "research"
)]
pub async fn list_messages(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(research_id): Path<String>,
) -> Result<Json<ResearchMessagesResponse>> {
    Ok(Json(state.service.messages(&user_id, &research_id).await?))
}

/// Submit a message and start a research run
///
/// Accepted from `NEW`, or from `NEED_CLARIFICATION` with the user's answer.
#[utoipa::path(
    post,
    path = "/api/research/{research_id}/messages",
    request_body = SendMessageRequest,
    responses(
        (status = 200, description = "Run admitted", body = SendMessageResponse),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Missing X-User-Id"),
        (status = 404, description = "Research not found"),
        (status = 409, description = "Research already running or finished"),
        (status = 503, description = "System busy, retry later")
    ),
    params(("research_id" = String, Path, description = "Research session id")),
    tag = "research"
)]
pub async fn send_message(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(research_id): Path<String>,
    Json(payload): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>> {
    let response = state
        .service
        .send_message(&user_id, &research_id, payload)
        .await?;
    Ok(Json(response))
}
