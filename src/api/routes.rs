use crate::AppState;
use crate::api::handlers::{health, research, stream};
use axum::{
    Json, Router,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        research::create_research,
        research::get_research,
        research::list_messages,
        research::send_message,
        stream::stream_research,
    ),
    components(schemas(
        crate::types::CreateResearchRequest,
        crate::types::CreateResearchResponse,
        crate::types::SendMessageRequest,
        crate::types::SendMessageResponse,
        crate::types::ResearchStatusResponse,
        crate::types::ResearchMessagesResponse,
        crate::types::WorkflowStatus,
        health::HealthResponse,
    )),
    tags(
        (name = "research", description = "Deep research sessions"),
        (name = "health", description = "Liveness")
    )
)]
pub struct ApiDoc;

pub fn create_router() -> Router<AppState> {
    let api_routes = Router::new()
        .route("/research", post(research::create_research))
        .route("/research/{research_id}", get(research::get_research))
        .route(
            "/research/{research_id}/messages",
            get(research::list_messages).post(research::send_message),
        )
        .route(
            "/research/{research_id}/stream",
            get(stream::stream_research),
        )
        .route("/openapi.json", get(|| async { Json(ApiDoc::openapi()) }));

    Router::new()
        .route("/health", get(health::health))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}
