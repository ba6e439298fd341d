//! HTTP surface: the web UI page, the research job API with SSE progress
//! streaming, the report API and a health check.

use crate::runner::JobRunner;
use crate::store::ReportStore;
use agent::llm::LLM;
use axum::Router;
use axum::response::Html;
use axum::routing::get;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

mod error;
mod health;
mod reports;
mod research;

pub use error::{AppError, AppResult};

/// Shared state for every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub runner: JobRunner,
    pub store: ReportStore,
    /// Used by the health check to list the models the server offers.
    pub llm: Arc<dyn LLM + Send + Sync>,
}

const INDEX_HTML: &str = include_str!("static/index.html");

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .merge(research::router())
        .merge(reports::router())
        .merge(health::router())
        .layer(CatchPanicLayer::new())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}
