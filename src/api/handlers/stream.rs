//! Server-sent event stream of a research timeline.

use crate::{AppState, api::extract::CallerId, types::Result};
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::sse::{Event, Sse},
};
use futures::stream::{self, Stream};
use serde::Deserialize;
use tracing::debug;
use utoipa::IntoParams;
use uuid::Uuid;

const LAST_EVENT_ID_HEADER: &str = "last-event-id";

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query, rename_all = "camelCase")]
pub struct StreamQuery {
    /// Stable id of the viewer; generated when absent
    pub client_id: Option<String>,
    /// Last sequence number seen; `Last-Event-ID` takes precedence
    pub last_event_id: Option<i64>,
}

/// Resume point: the `Last-Event-ID` header, else the query field.
pub fn resume_point(headers: &HeaderMap, query: &StreamQuery) -> Option<i64> {
    headers
        .get(LAST_EVENT_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
        .or(query.last_event_id)
}

/// Stream a research timeline
///
/// Frames are `message` and `event` items with their sequence number as id,
/// `report-stream` chunks, heartbeat comments, and a final `[DONE] STATUS`.
#[utoipa::path(
    get,
    path = "/api/research/{research_id}/stream",
    responses(
        (status = 200, description = "text/event-stream of timeline frames"),
        (status = 401, description = "Missing X-User-Id"),
        (status = 404, description = "Research not found")
    ),
    params(
        ("research_id" = String, Path, description = "Research session id"),
        StreamQuery
    ),
    tag = "research"
)]
pub async fn stream_research(
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
    Path(research_id): Path<String>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>>> {
    // ownership check before registering anything
    state.service.status(&user_id, &research_id).await?;

    let last_event_id = resume_point(&headers, &query);
    let client_id = query
        .client_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let rx = state
        .hub
        .connect(&research_id, &client_id, last_event_id)
        .await;

    // a run that already ended will never complete this viewer
    let status = state.service.status(&user_id, &research_id).await?.status;
    if status.is_terminal() {
        debug!(%research_id, %client_id, %status, "Viewer joined a finished run");
        // replay may still be filling the channel, so close from a task
        let hub = state.hub.clone();
        tokio::spawn(async move {
            hub.complete_client(&research_id, &client_id, status).await;
        });
    }

    let frames = stream::unfold(rx, |mut rx| async move {
        let frame = rx.recv().await?;
        Some((frame.into_sse_event(), rx))
    });

    Ok(Sse::new(frames))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_header_wins_over_query() {
        let mut headers = HeaderMap::new();
        let query = StreamQuery {
            client_id: None,
            last_event_id: Some(3),
        };
        assert_eq!(resume_point(&headers, &query), Some(3));

        headers.insert(LAST_EVENT_ID_HEADER, HeaderValue::from_static("7"));
        assert_eq!(resume_point(&headers, &query), Some(7));

        headers.insert(LAST_EVENT_ID_HEADER, HeaderValue::from_static("garbage"));
        assert_eq!(resume_point(&headers, &query), Some(3));
    }
}
