use async_trait::async_trait;
use std::sync::Arc;

use super::ConfigStore;
use crate::config::CacheConfig;
use crate::database::execution_log::{ExecutionLog, NewExecutionLog, UpdateExecutionLogData};
use crate::database::model::Model;
use crate::database::prompt_template::{NewPromptTemplate, PromptTemplate};
use crate::database::provider::Provider;
use crate::database::security_policy::SecurityPolicy;
use crate::database::DbResult;
use crate::schema::enum_def::Purpose;
use crate::service::cache::memory::MemoryCacheBackend;
use crate::service::cache::repository::CacheRepository;
use crate::service::cache::types::CacheEntry;
use cyder_tools::log::warn;

const PROVIDERS_KEY: &str = "providers:active";
const MODELS_KEY: &str = "models:active";
const POLICY_KEY: &str = "policy:active";

fn templates_key(purpose: Purpose) -> String {
    format!("templates:approved:{}", purpose)
}

type Repo<T> = CacheRepository<T, MemoryCacheBackend<T>>;

/// Time-bounded read-through cache over another store. Only the reads the
/// generation path makes on every request are cached; writes go straight to
/// the inner store and drop the keys they affect.
pub struct CachedStore {
    inner: Arc<dyn ConfigStore>,
    providers: Repo<Vec<Provider>>,
    models: Repo<Vec<Model>>,
    policy: Repo<SecurityPolicy>,
    templates: Repo<Vec<PromptTemplate>>,
    negative_ttl: std::time::Duration,
}

impl CachedStore {
    pub fn new(inner: Arc<dyn ConfigStore>, config: &CacheConfig) -> Self {
        let ttl = Some(config.ttl());
        CachedStore {
            inner,
            providers: CacheRepository::new(MemoryCacheBackend::new(), ttl),
            models: CacheRepository::new(MemoryCacheBackend::new(), ttl),
            policy: CacheRepository::new(MemoryCacheBackend::new(), ttl),
            templates: CacheRepository::new(MemoryCacheBackend::new(), ttl),
            negative_ttl: config.negative_ttl(),
        }
    }

    pub async fn invalidate_all(&self) {
        for result in [
            self.providers.clear().await,
            self.models.clear().await,
            self.policy.clear().await,
            self.templates.clear().await,
        ] {
            if let Err(e) = result {
                warn!("Failed to clear config cache: {}", e);
            }
        }
    }

    async fn drop_templates(&self, purpose: Purpose) {
        if let Err(e) = self.templates.delete(&templates_key(purpose)).await {
            warn!("Failed to invalidate template cache for {}: {}", purpose, e);
        }
    }
}

#[async_trait]
impl ConfigStore for CachedStore {
    async fn list_active_providers(&self) -> DbResult<Vec<Provider>> {
        if let Some(cached) = self.providers.get(PROVIDERS_KEY).await? {
            return Ok(cached.as_ref().clone());
        }
        let providers = self.inner.list_active_providers().await?;
        self.providers.set_positive(PROVIDERS_KEY, providers.clone()).await?;
        Ok(providers)
    }

    async fn get_provider(&self, id: i64) -> DbResult<Option<Provider>> {
        self.inner.get_provider(id).await
    }

    async fn list_active_models(&self) -> DbResult<Vec<Model>> {
        if let Some(cached) = self.models.get(MODELS_KEY).await? {
            return Ok(cached.as_ref().clone());
        }
        let models = self.inner.list_active_models().await?;
        self.models.set_positive(MODELS_KEY, models.clone()).await?;
        Ok(models)
    }

    async fn get_model(&self, id: i64) -> DbResult<Option<Model>> {
        self.inner.get_model(id).await
    }

    async fn get_template(&self, id: i64) -> DbResult<Option<PromptTemplate>> {
        self.inner.get_template(id).await
    }

    async fn list_templates_by_name(&self, name: &str) -> DbResult<Vec<PromptTemplate>> {
        self.inner.list_templates_by_name(name).await
    }

    async fn list_active_approved_templates(&self, purpose: Purpose) -> DbResult<Vec<PromptTemplate>> {
        let key = templates_key(purpose);
        if let Some(cached) = self.templates.get(&key).await? {
            return Ok(cached.as_ref().clone());
        }
        let templates = self.inner.list_active_approved_templates(purpose).await?;
        self.templates.set_positive(&key, templates.clone()).await?;
        Ok(templates)
    }

    async fn insert_template(&self, template: &NewPromptTemplate) -> DbResult<PromptTemplate> {
        let created = self.inner.insert_template(template).await?;
        self.drop_templates(created.purpose).await;
        Ok(created)
    }

    async fn supersede_template(&self, target_id: i64, successor: &NewPromptTemplate) -> DbResult<PromptTemplate> {
        let created = self.inner.supersede_template(target_id, successor).await?;
        self.drop_templates(created.purpose).await;
        Ok(created)
    }

    async fn approve_template(&self, id: i64, approver: &str, approved_at: i64) -> DbResult<PromptTemplate> {
        let approved = self.inner.approve_template(id, approver, approved_at).await?;
        self.drop_templates(approved.purpose).await;
        Ok(approved)
    }

    async fn get_active_policy(&self) -> DbResult<Option<SecurityPolicy>> {
        if let Some(entry) = self.policy.get_entry(POLICY_KEY).await? {
            return Ok(match &*entry {
                CacheEntry::Positive(policy) => Some(policy.as_ref().clone()),
                CacheEntry::Negative => None,
            });
        }
        match self.inner.get_active_policy().await? {
            Some(policy) => {
                self.policy.set_positive(POLICY_KEY, policy.clone()).await?;
                Ok(Some(policy))
            }
            None => {
                self.policy.set_negative(POLICY_KEY, self.negative_ttl).await?;
                Ok(None)
            }
        }
    }

    async fn get_policy(&self, id: i64) -> DbResult<Option<SecurityPolicy>> {
        self.inner.get_policy(id).await
    }

    async fn activate_policy(&self, id: i64) -> DbResult<SecurityPolicy> {
        let activated = self.inner.activate_policy(id).await?;
        self.policy.delete(POLICY_KEY).await?;
        Ok(activated)
    }

    async fn insert_execution_log(&self, log: &NewExecutionLog) -> DbResult<ExecutionLog> {
        self.inner.insert_execution_log(log).await
    }

    async fn update_execution_log(&self, id: i64, data: &UpdateExecutionLogData) -> DbResult<ExecutionLog> {
        self.inner.update_execution_log(id, data).await
    }

    async fn get_execution_log(&self, id: i64) -> DbResult<Option<ExecutionLog>> {
        self.inner.get_execution_log(id).await
    }

    async fn list_execution_logs(&self, limit: i64) -> DbResult<Vec<ExecutionLog>> {
        self.inner.list_execution_logs(limit).await
    }
}
