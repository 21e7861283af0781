//! HTTP handlers for the `/api` routes

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, IntakeError, Result},
    event::{Event, EventId, EventSubmission},
    ids::RequestId,
    persister::StatsSnapshot,
    state::AppState,
};

/// Plain acknowledgement body
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Body returned once a submission is enqueued
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub message: String,
    /// Identity the event will be stored under
    pub id: EventId,
    /// Queue position of the enqueued event
    pub sequence: u64,
}

/// Persister counters plus the queue they refer to
#[derive(Debug, Serialize)]
pub struct PipelineStatsResponse {
    pub queue: String,
    #[serde(flatten)]
    pub stats: StatsSnapshot,
}

/// `POST /api/events`
pub async fn create_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: std::result::Result<Json<EventSubmission>, JsonRejection>,
) -> Result<Json<SubmitResponse>> {
    let Json(submission) = payload.map_err(|e| IntakeError::Malformed(e.body_text()))?;
    let request_id = RequestId::from_headers(&headers).unwrap_or_default();

    let submitted = state.intake().submit(submission).await.inspect_err(|e| {
        if e.is_validation() {
            tracing::info!(request_id = %request_id, error = %e, "Rejected event submission");
        }
    })?;

    tracing::info!(
        request_id = %request_id,
        event_id = %submitted.id,
        queue = %submitted.receipt.queue,
        sequence = submitted.receipt.sequence,
        event_type = %submitted.event.event_type,
        "Event accepted"
    );

    Ok(Json(SubmitResponse {
        message: "Successfully added create event to the MQ".to_string(),
        id: submitted.id,
        sequence: submitted.receipt.sequence,
    }))
}

/// `GET /api/events`
pub async fn list_events(State(state): State<AppState>) -> Result<Json<Vec<Event>>> {
    Ok(Json(state.store().list().await?))
}

/// `GET /api/events/{id}`
pub async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Event>> {
    let id = parse_id(&id)?;
    state
        .store()
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| Error::NotFound("Event not found".to_string()))
}

/// `GET /api/events/types/{code}`
pub async fn list_events_by_type(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<Vec<Event>>> {
    let code: i32 = code
        .parse()
        .map_err(|_| Error::BadRequest("Cannot convert event type to int".to_string()))?;

    Ok(Json(state.store().list_by_type(code).await?))
}

/// `DELETE /api/events/{id}`
pub async fn delete_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>> {
    let id = parse_id(&id)?;

    if !state.store().delete(id).await? {
        return Err(Error::NotFound("Event not found".to_string()));
    }

    tracing::info!(event_id = %id, "Event deleted");
    Ok(Json(MessageResponse {
        message: "Successfully deleted the event".to_string(),
    }))
}

/// `GET /api/pipeline/stats`
pub async fn pipeline_stats(State(state): State<AppState>) -> Json<PipelineStatsResponse> {
    Json(PipelineStatsResponse {
        queue: state.queue().name().to_string(),
        stats: state.stats().snapshot(),
    })
}

fn parse_id(raw: &str) -> Result<EventId> {
    raw.parse()
        .map_err(|_| Error::BadRequest(format!("Invalid event id: {}", raw)))
}
