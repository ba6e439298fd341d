use crate::server::AppState;
use axum::extract::State;
use axum::{Json, Router, routing::get};
use serde::Serialize;
use std::time::Duration;

const LLM_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub llm_reachable: bool,
    pub llm_models: Vec<String>,
}

/// GET /api/health -- reports whether the LLM server answers.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let models = match tokio::time::timeout(LLM_PROBE_TIMEOUT, state.llm.models()).await {
        Ok(Ok(models)) => Some(models),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "llm server unreachable");
            None
        }
        Err(_) => {
            tracing::warn!("llm server did not answer in time");
            None
        }
    };

    Json(match models {
        Some(llm_models) => HealthResponse {
            status: "ok",
            llm_reachable: true,
            llm_models,
        },
        None => HealthResponse {
            status: "degraded",
            llm_reachable: false,
            llm_models: Vec::new(),
        },
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/health", get(health_check))
}
