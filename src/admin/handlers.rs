use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::http::server::AppState;
use crate::storage::HistoryEntry;

#[derive(Debug, Serialize)]
pub struct ServiceSummary {
    pub name: String,
    pub upstream: Option<String>,
    pub cache_requests: bool,
    pub responses: usize,
}

pub async fn list_services(State(state): State<AppState>) -> Json<Vec<ServiceSummary>> {
    let services = state.services.load();
    let summaries = services
        .values()
        .map(|service| {
            let config = service.state.config();
            ServiceSummary {
                name: config.name.clone(),
                upstream: config.upstream_url().map(str::to_string),
                cache_requests: config.cache.requests,
                responses: config.responses.len(),
            }
        })
        .collect();
    Json(summaries)
}

/// History snapshot keyed `METHOD:url`.
pub async fn get_history(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<BTreeMap<String, HistoryEntry>>, StatusCode> {
    let service = state.service(&name).ok_or(StatusCode::NOT_FOUND)?;
    let entries = service.state.db().history().data().await;
    Ok(Json(entries.into_iter().collect()))
}

pub async fn clear_history(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> StatusCode {
    match state.service(&name) {
        Some(service) => {
            service.state.db().history().clear().await;
            tracing::info!(service = %name, "History cleared");
            StatusCode::NO_CONTENT
        }
        None => StatusCode::NOT_FOUND,
    }
}
