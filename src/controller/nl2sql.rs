use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json,
};
use std::sync::Arc;

use crate::controller::BaseError;
use crate::database::DbResult;
use crate::service::app_state::{create_state_router, AppState, StateRouter};
use crate::service::pipeline::{
    ErrorExplanation, ExplainErrorRequest, Nl2SqlRequest, Nl2SqlResponse, SuggestionsResponse,
};
use crate::utils::HttpResult;

async fn generate(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<Nl2SqlRequest>,
) -> DbResult<HttpResult<Nl2SqlResponse>> {
    if payload.connection_id.trim().is_empty() {
        return Err(BaseError::ParamInvalid(Some("connection_id is required".to_string())));
    }
    // Runs detached so the completion call and its log write finish even if
    // the client goes away.
    let pipeline = app_state.pipeline.clone();
    let response = tokio::spawn(async move { pipeline.generate(&payload).await })
        .await
        .map_err(|e| BaseError::InternalServerError(Some(format!("generation task failed: {}", e))))?;
    Ok(HttpResult::new(response))
}

async fn suggestions(
    State(app_state): State<Arc<AppState>>,
    Path(connection_id): Path<String>,
) -> DbResult<HttpResult<SuggestionsResponse>> {
    let result = app_state.pipeline.suggest_questions(&connection_id).await?;
    Ok(HttpResult::new(result))
}

async fn explain_error(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<ExplainErrorRequest>,
) -> DbResult<HttpResult<ErrorExplanation>> {
    if payload.error.trim().is_empty() {
        return Err(BaseError::ParamInvalid(Some("error text is required".to_string())));
    }
    let result = app_state.pipeline.explain_error(&payload).await?;
    Ok(HttpResult::new(result))
}

pub fn create_nl2sql_router() -> StateRouter {
    create_state_router().nest(
        "/nl2sql",
        create_state_router()
            .route("/generate", post(generate))
            .route("/suggestions/{connection_id}", get(suggestions))
            .route("/explain-error", post(explain_error)),
    )
}
