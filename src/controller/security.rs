use axum::{
    extract::{Path, State},
    routing::post,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::controller::BaseError;
use crate::database::security_policy::SecurityPolicy;
use crate::database::DbResult;
use crate::service::app_state::{create_state_router, AppState, StateRouter};
use crate::service::security::SecurityCheckResult;
use crate::utils::HttpResult;

#[derive(Deserialize)]
struct CheckPromptRequest {
    text: String,
}

#[derive(Deserialize)]
struct CheckSqlRequest {
    sql: String,
    // Falls back to the active policy.
    policy_id: Option<i64>,
}

async fn check_prompt(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<CheckPromptRequest>,
) -> DbResult<HttpResult<SecurityCheckResult>> {
    let result = app_state.pipeline.security().check_prompt_security(&payload.text);
    Ok(HttpResult::new(result))
}

async fn check_sql(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<CheckSqlRequest>,
) -> DbResult<HttpResult<SecurityCheckResult>> {
    let policy = match payload.policy_id {
        Some(id) => Some(
            app_state
                .store
                .get_policy(id)
                .await?
                .ok_or_else(|| BaseError::NotFound(Some(format!("Security policy {} not found", id))))?,
        ),
        None => None,
    };
    let result = app_state
        .pipeline
        .security()
        .check_sql_security(&payload.sql, policy.as_ref())
        .await?;
    Ok(HttpResult::new(result))
}

async fn activate_policy(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> DbResult<HttpResult<SecurityPolicy>> {
    let policy = app_state.store.activate_policy(id).await?;
    Ok(HttpResult::new(policy))
}

pub fn create_security_router() -> StateRouter {
    create_state_router().nest(
        "/security",
        create_state_router()
            .route("/check-prompt", post(check_prompt))
            .route("/check-sql", post(check_sql))
            .route("/policy/{id}/activate", post(activate_policy)),
    )
}
