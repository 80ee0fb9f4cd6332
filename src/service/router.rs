use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::database::model::Model;
use crate::database::provider::Provider;
use crate::database::DbResult;
use crate::schema::enum_def::Purpose;
use crate::service::diagnostic::DiagnosticEngine;
use crate::service::store::{sort_by_priority, ConfigStore};
use cyder_tools::log::{debug, info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingContext {
    pub purpose: Option<Purpose>,
    pub database_type: Option<String>,
    pub preferred_provider_id: Option<i64>,
    pub preferred_model_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteSelection {
    pub model: Model,
    pub provider: Provider,
    pub reason: String,
}

/// Picks a (model, provider) pair. `providers` is the set of active
/// providers; models whose provider is missing from it are ineligible.
pub fn choose(models: &[Model], providers: &[Provider], ctx: &RoutingContext) -> Option<RouteSelection> {
    let by_id: HashMap<i64, &Provider> = providers
        .iter()
        .filter(|p| p.is_active)
        .map(|p| (p.id, p))
        .collect();
    let eligible = |m: &&Model| m.is_active && by_id.contains_key(&m.provider_id);

    if let Some(preferred) = ctx.preferred_model_id {
        if let Some(model) = models.iter().filter(eligible).find(|m| m.id == preferred) {
            let provider = by_id[&model.provider_id];
            return Some(RouteSelection {
                model: model.clone(),
                provider: provider.clone(),
                reason: format!("preferred model '{}' requested", model.name),
            });
        }
    }

    let mut reasons = Vec::new();
    let mut candidates: Vec<&Model> = models.iter().filter(|m| m.is_active).collect();
    // A narrowing only sticks if something routable survives it.
    let routable = |set: &[&Model]| set.iter().any(|m| by_id.contains_key(&m.provider_id));

    if let Some(purpose) = ctx.purpose {
        let narrowed: Vec<&Model> = candidates.iter().copied().filter(|m| m.purpose.serves(purpose)).collect();
        if !routable(&narrowed) {
            reasons.push(format!("no model serves purpose {}, using any purpose", purpose));
        } else {
            reasons.push(format!("purpose {}", purpose));
            candidates = narrowed;
        }
    }

    if let Some(provider_id) = ctx.preferred_provider_id {
        let narrowed: Vec<&Model> = candidates.iter().copied().filter(|m| m.provider_id == provider_id).collect();
        if !routable(&narrowed) {
            reasons.push(format!("preferred provider {} has no candidate", provider_id));
        } else {
            reasons.push(format!("preferred provider {}", provider_id));
            candidates = narrowed;
        }
    }

    candidates.retain(|m| by_id.contains_key(&m.provider_id));
    // Stable sort keeps store order among equal priorities.
    candidates.sort_by_key(|m| {
        let priority = by_id[&m.provider_id].priority;
        (priority.is_none(), priority.unwrap_or(0))
    });

    let model = *candidates.first()?;
    let provider = by_id[&model.provider_id];
    if let Some(db_type) = &ctx.database_type {
        reasons.push(format!("database type {}", db_type));
    }
    reasons.push(match provider.priority {
        Some(p) => format!("highest-priority provider '{}' (priority {})", provider.name, p),
        None => format!("provider '{}' (no priority)", provider.name),
    });

    Some(RouteSelection {
        model: model.clone(),
        provider: provider.clone(),
        reason: reasons.join(", "),
    })
}

pub struct ModelRouter {
    store: Arc<dyn ConfigStore>,
}

impl ModelRouter {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        ModelRouter { store }
    }

    /// `Ok(None)` means nothing can serve the request.
    pub async fn select_model(&self, ctx: &RoutingContext) -> DbResult<Option<RouteSelection>> {
        let models = self.store.list_active_models().await?;
        let providers = self.store.list_active_providers().await?;
        let selection = choose(&models, &providers, ctx);
        match &selection {
            Some(s) => debug!("Routed to model '{}': {}", s.model.name, s.reason),
            None => warn!("No active model available for {:?}", ctx),
        }
        Ok(selection)
    }

    /// Probes active providers in priority order and routes to the first one
    /// that answers.
    pub async fn select_with_failover(
        &self,
        ctx: &RoutingContext,
        diagnostics: &DiagnosticEngine,
    ) -> DbResult<Option<RouteSelection>> {
        let models = self.store.list_active_models().await?;
        let mut providers = self.store.list_active_providers().await?;
        sort_by_priority(&mut providers);

        for provider in &providers {
            let has_model = models.iter().any(|m| m.is_active && m.provider_id == provider.id);
            if !has_model {
                debug!("Skipping provider '{}': no active models", provider.name);
                continue;
            }
            let probe = diagnostics.probe(provider).await;
            if !probe.passed() {
                warn!(
                    "Failover: provider '{}' failed connection probe: {}",
                    provider.name,
                    probe.error.as_deref().unwrap_or("unknown error")
                );
                continue;
            }

            let constrained = RoutingContext {
                preferred_provider_id: Some(provider.id),
                ..ctx.clone()
            };
            let only_this = std::slice::from_ref(provider);
            if let Some(mut selection) = choose(&models, only_this, &constrained) {
                selection.reason = format!("failover: {}", selection.reason);
                info!("Failover routed to provider '{}'", provider.name);
                return Ok(Some(selection));
            }
        }
        warn!("Failover: every active provider failed its probe");
        Ok(None)
    }
}
