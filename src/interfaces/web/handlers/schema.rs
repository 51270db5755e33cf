use axum::{Json, extract::State};

use super::super::AppState;

pub async fn get_schema(State(state): State<AppState>) -> Json<serde_json::Value> {
    let catalog = state.orchestrator.catalog();
    Json(serde_json::json!({
        "database": catalog.database,
        "catalog": catalog.catalog,
        "tables": catalog.tables(),
    }))
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
