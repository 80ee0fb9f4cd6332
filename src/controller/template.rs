use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Json,
};
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;

use crate::controller::BaseError;
use crate::database::prompt_template::PromptTemplate;
use crate::database::DbResult;
use crate::schema::enum_def::Purpose;
use crate::service::app_state::{create_state_router, AppState, StateRouter};
use crate::service::prompt::{CreateTemplateRequest, UpdateTemplateRequest};
use crate::utils::HttpResult;

#[derive(Deserialize)]
struct ApproveRequest {
    approved_by: String,
}

async fn create_template(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<CreateTemplateRequest>,
) -> DbResult<HttpResult<PromptTemplate>> {
    let created = app_state.pipeline.templates().create(payload).await?;
    Ok(HttpResult::new(created))
}

async fn update_template(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateTemplateRequest>,
) -> DbResult<HttpResult<PromptTemplate>> {
    let created = app_state.pipeline.templates().update(id, payload).await?;
    Ok(HttpResult::new(created))
}

async fn approve_template(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(payload): Json<ApproveRequest>,
) -> DbResult<HttpResult<PromptTemplate>> {
    let approved = app_state.pipeline.templates().approve(id, &payload.approved_by).await?;
    Ok(HttpResult::new(approved))
}

async fn get_template(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> DbResult<HttpResult<PromptTemplate>> {
    let template = app_state.pipeline.templates().get(id).await?;
    Ok(HttpResult::new(template))
}

async fn template_history(
    State(app_state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> DbResult<HttpResult<Vec<PromptTemplate>>> {
    let versions = app_state.pipeline.templates().history(&name).await?;
    Ok(HttpResult::new(versions))
}

async fn latest_template(
    State(app_state): State<Arc<AppState>>,
    Path(purpose): Path<String>,
) -> DbResult<HttpResult<PromptTemplate>> {
    let purpose = Purpose::from_str(&purpose)
        .map_err(|_| BaseError::ParamInvalid(Some(format!("unknown purpose '{}'", purpose))))?;
    let template = app_state
        .pipeline
        .templates()
        .find_latest_active(purpose)
        .await?
        .ok_or_else(|| BaseError::NotFound(Some(format!("No approved template for {}", purpose))))?;
    Ok(HttpResult::new(template))
}

pub fn create_template_router() -> StateRouter {
    create_state_router().nest(
        "/template",
        create_state_router()
            .route("/", post(create_template))
            .route("/{id}", put(update_template))
            .route("/{id}", get(get_template))
            .route("/{id}/approve", post(approve_template))
            .route("/history/{name}", get(template_history))
            .route("/latest/{purpose}", get(latest_template)),
    )
}
