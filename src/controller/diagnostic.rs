use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::database::DbResult;
use crate::service::app_state::{create_state_router, AppState, StateRouter};
use crate::service::diagnostic::{HealthReport, ProviderDiagnostic};
use crate::service::router::{RouteSelection, RoutingContext};
use crate::utils::HttpResult;

#[derive(Deserialize)]
struct RouteRequest {
    #[serde(flatten)]
    context: RoutingContext,
    #[serde(default)]
    failover: bool,
}

/// Routing outcome without provider credentials.
#[derive(Serialize)]
struct RouteView {
    model_id: i64,
    model_name: String,
    upstream_model: String,
    provider_id: i64,
    provider_name: String,
    reason: String,
}

impl From<RouteSelection> for RouteView {
    fn from(s: RouteSelection) -> Self {
        RouteView {
            model_id: s.model.id,
            model_name: s.model.name,
            upstream_model: s.model.model_id,
            provider_id: s.provider.id,
            provider_name: s.provider.name,
            reason: s.reason,
        }
    }
}

async fn diagnose_all(State(app_state): State<Arc<AppState>>) -> DbResult<HttpResult<Vec<ProviderDiagnostic>>> {
    let result = app_state.pipeline.diagnostics().diagnose_all_providers().await?;
    Ok(HttpResult::new(result))
}

async fn diagnose_one(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> DbResult<HttpResult<ProviderDiagnostic>> {
    let result = app_state.pipeline.diagnostics().diagnose_provider_by_id(id).await?;
    Ok(HttpResult::new(result))
}

async fn health(State(app_state): State<Arc<AppState>>) -> DbResult<HttpResult<HealthReport>> {
    let report = app_state.pipeline.diagnostics().health_check().await?;
    Ok(HttpResult::new(report))
}

async fn route(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<RouteRequest>,
) -> DbResult<HttpResult<Option<RouteView>>> {
    let pipeline = &app_state.pipeline;
    let selection = if payload.failover {
        pipeline
            .router()
            .select_with_failover(&payload.context, pipeline.diagnostics())
            .await?
    } else {
        pipeline.router().select_model(&payload.context).await?
    };
    Ok(HttpResult::new(selection.map(RouteView::from)))
}

pub fn create_diagnostic_router() -> StateRouter {
    create_state_router().nest(
        "/diagnostic",
        create_state_router()
            .route("/providers", get(diagnose_all))
            .route("/provider/{id}", get(diagnose_one))
            .route("/health", get(health))
            .route("/route", post(route)),
    )
}
