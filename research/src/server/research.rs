use crate::runner::{JobSnapshot, ResearchRequest};
use crate::server::{AppError, AppResult, AppState};
use agent::callbacks::ProgressEvent;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{Json, Router, routing::get, routing::post};
use futures::{Stream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// POST /api/research -- queue a new research job.
async fn start_research(
    State(state): State<AppState>,
    body: Result<Json<ResearchRequest>, JsonRejection>,
) -> AppResult<Json<JobSnapshot>> {
    let Json(request) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let job = state.runner.submit(request)?;
    Ok(Json(job))
}

/// GET /api/research/{job_id}
async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Json<JobSnapshot>> {
    Ok(Json(state.runner.get_status(&job_id)?))
}

fn to_sse(event: &ProgressEvent) -> Event {
    let data = match event.data() {
        Ok(data) => data.to_string(),
        Err(e) => {
            tracing::error!(error = %e, event = event.name(), "could not encode progress event");
            "{}".to_string()
        }
    };
    Event::default().event(event.name()).data(data)
}

fn sse_events(
    events: impl Stream<Item = crate::Result<ProgressEvent>> + Send,
) -> impl Stream<Item = Result<Event, Infallible>> + Send {
    events.map(|item| {
        Ok(match item {
            Ok(event) => to_sse(&event),
            Err(e) => Event::default()
                .event("overrun")
                .data(serde_json::json!({ "message": e.to_string() }).to_string()),
        })
    })
}

/// GET /api/research/{job_id}/stream -- progress events as Server-Sent Events.
async fn stream_progress(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let subscription = state.runner.subscribe(&job_id)?;
    tracing::debug!(job_id = %job_id, "progress stream opened");

    let sse = Sse::new(sse_events(subscription.into_stream())).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keepalive"),
    );
    Ok(([("cache-control", "no-cache"), ("x-accel-buffering", "no")], sse))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/research", post(start_research))
        .route("/api/research/{job_id}", get(job_status))
        .route("/api/research/{job_id}/stream", get(stream_progress))
}
