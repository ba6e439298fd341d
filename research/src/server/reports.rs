use crate::Error;
use crate::server::{AppResult, AppState};
use crate::store::{ReportDetail, ReportSummary};
use axum::extract::{Path, State};
use axum::{Json, Router, routing::get};
use serde_json::{Value, json};

async fn list_reports(State(state): State<AppState>) -> AppResult<Json<Vec<ReportSummary>>> {
    let store = state.store.clone();
    let reports = tokio::task::spawn_blocking(move || store.list())
        .await
        .map_err(Error::from)??;
    Ok(Json(reports))
}

async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<ReportDetail>> {
    let store = state.store.clone();
    let report = tokio::task::spawn_blocking(move || store.get(&id))
        .await
        .map_err(Error::from)??;
    Ok(Json(report))
}

async fn delete_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    let store = state.store.clone();
    let report_id = id.clone();
    let deleted = tokio::task::spawn_blocking(move || store.delete(&report_id))
        .await
        .map_err(Error::from)??;
    if !deleted {
        return Err(Error::not_found("Report", id).into());
    }
    Ok(Json(json!({ "deleted": true })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/reports", get(list_reports))
        .route("/api/reports/{id}", get(get_report).delete(delete_report))
}
