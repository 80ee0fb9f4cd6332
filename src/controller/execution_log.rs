use axum::{
    extract::{Path, Query, State},
    routing::get,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::controller::BaseError;
use crate::database::execution_log::ExecutionLog;
use crate::database::DbResult;
use crate::service::app_state::{create_state_router, AppState, StateRouter};
use crate::utils::HttpResult;

const MAX_PAGE: i64 = 500;

#[derive(Deserialize)]
struct ListParams {
    limit: Option<i64>,
}

async fn list_logs(
    State(app_state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> DbResult<HttpResult<Vec<ExecutionLog>>> {
    let limit = params.limit.unwrap_or(50).clamp(1, MAX_PAGE);
    let logs = app_state.store.list_execution_logs(limit).await?;
    Ok(HttpResult::new(logs))
}

async fn get_log(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> DbResult<HttpResult<ExecutionLog>> {
    let log = app_state
        .store
        .get_execution_log(id)
        .await?
        .ok_or_else(|| BaseError::NotFound(Some(format!("Execution log {} not found", id))))?;
    Ok(HttpResult::new(log))
}

pub fn create_execution_log_router() -> StateRouter {
    create_state_router().nest(
        "/execution_log",
        create_state_router()
            .route("/list", get(list_logs))
            .route("/{id}", get(get_log)),
    )
}
