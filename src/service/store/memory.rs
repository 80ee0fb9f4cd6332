use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Mutex;

use super::{sort_by_priority, ConfigStore};
use crate::controller::BaseError;
use crate::database::execution_log::{ExecutionLog, NewExecutionLog, UpdateExecutionLogData};
use crate::database::model::Model;
use crate::database::prompt_template::{NewPromptTemplate, PromptTemplate};
use crate::database::provider::Provider;
use crate::database::security_policy::SecurityPolicy;
use crate::database::DbResult;
use crate::schema::enum_def::Purpose;

/// In-process `ConfigStore`. Backs `memory://` deployments and tests.
#[derive(Default)]
pub struct MemoryStore {
    providers: DashMap<i64, Provider>,
    models: DashMap<i64, Model>,
    templates: DashMap<i64, PromptTemplate>,
    policies: DashMap<i64, SecurityPolicy>,
    logs: DashMap<i64, ExecutionLog>,
    // Serialises the multi-row template and policy transitions.
    write_lock: Mutex<()>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_provider(&self, provider: Provider) {
        self.providers.insert(provider.id, provider);
    }

    pub fn put_model(&self, model: Model) {
        self.models.insert(model.id, model);
    }

    pub fn put_policy(&self, policy: SecurityPolicy) {
        self.policies.insert(policy.id, policy);
    }

    fn lock(&self) -> DbResult<std::sync::MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| BaseError::StoreError(Some("memory store lock poisoned".to_string())))
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn list_active_providers(&self) -> DbResult<Vec<Provider>> {
        let mut providers: Vec<Provider> = self
            .providers
            .iter()
            .filter(|p| p.is_active)
            .map(|p| p.value().clone())
            .collect();
        sort_by_priority(&mut providers);
        Ok(providers)
    }

    async fn get_provider(&self, id: i64) -> DbResult<Option<Provider>> {
        Ok(self.providers.get(&id).map(|p| p.value().clone()))
    }

    async fn list_active_models(&self) -> DbResult<Vec<Model>> {
        let mut models: Vec<Model> = self
            .models
            .iter()
            .filter(|m| m.is_active)
            .map(|m| m.value().clone())
            .collect();
        models.sort_by_key(|m| (m.created_at, m.id));
        Ok(models)
    }

    async fn get_model(&self, id: i64) -> DbResult<Option<Model>> {
        Ok(self.models.get(&id).map(|m| m.value().clone()))
    }

    async fn get_template(&self, id: i64) -> DbResult<Option<PromptTemplate>> {
        Ok(self.templates.get(&id).map(|t| t.value().clone()))
    }

    async fn list_templates_by_name(&self, name: &str) -> DbResult<Vec<PromptTemplate>> {
        let mut templates: Vec<PromptTemplate> = self
            .templates
            .iter()
            .filter(|t| t.name == name)
            .map(|t| t.value().clone())
            .collect();
        templates.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(templates)
    }

    async fn list_active_approved_templates(&self, purpose: Purpose) -> DbResult<Vec<PromptTemplate>> {
        let mut templates: Vec<PromptTemplate> = self
            .templates
            .iter()
            .filter(|t| t.purpose == purpose && t.is_active && t.is_approved)
            .map(|t| t.value().clone())
            .collect();
        templates.sort_by(|a, b| {
            b.version
                .cmp(&a.version)
                .then_with(|| b.updated_at.cmp(&a.updated_at))
        });
        Ok(templates)
    }

    async fn insert_template(&self, template: &NewPromptTemplate) -> DbResult<PromptTemplate> {
        let record = PromptTemplate::from(template.clone());
        self.templates.insert(record.id, record.clone());
        Ok(record)
    }

    async fn supersede_template(&self, target_id: i64, successor: &NewPromptTemplate) -> DbResult<PromptTemplate> {
        let _guard = self.lock()?;
        {
            let mut target = self.templates.get_mut(&target_id).ok_or_else(|| {
                BaseError::NotFound(Some(format!("Template {} not found", target_id)))
            })?;
            if !target.is_active {
                return Err(BaseError::ParamInvalid(Some(format!(
                    "Template {} is not the active version",
                    target_id
                ))));
            }
            target.is_active = false;
            target.updated_at = successor.created_at;
        }
        let record = PromptTemplate::from(successor.clone());
        self.templates.insert(record.id, record.clone());
        Ok(record)
    }

    async fn approve_template(&self, id: i64, approver: &str, approved_at: i64) -> DbResult<PromptTemplate> {
        let mut template = self
            .templates
            .get_mut(&id)
            .ok_or_else(|| BaseError::NotFound(Some(format!("Template {} not found", id))))?;
        template.is_approved = true;
        template.approved_by = Some(approver.to_string());
        template.approved_at = Some(approved_at);
        template.updated_at = approved_at;
        Ok(template.clone())
    }

    async fn get_active_policy(&self) -> DbResult<Option<SecurityPolicy>> {
        Ok(self
            .policies
            .iter()
            .filter(|p| p.is_active)
            .min_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| b.updated_at.cmp(&a.updated_at))
            })
            .map(|p| p.value().clone()))
    }

    async fn get_policy(&self, id: i64) -> DbResult<Option<SecurityPolicy>> {
        Ok(self.policies.get(&id).map(|p| p.value().clone()))
    }

    async fn activate_policy(&self, id: i64) -> DbResult<SecurityPolicy> {
        let _guard = self.lock()?;
        if !self.policies.contains_key(&id) {
            return Err(BaseError::NotFound(Some(format!("Security policy {} not found", id))));
        }
        let now = chrono::Utc::now().timestamp_millis();
        for mut policy in self.policies.iter_mut() {
            let activate = policy.id == id;
            if policy.is_active != activate {
                policy.is_active = activate;
                policy.updated_at = now;
            }
        }
        self.policies
            .get(&id)
            .map(|p| p.value().clone())
            .ok_or_else(|| BaseError::NotFound(Some(format!("Security policy {} not found", id))))
    }

    async fn insert_execution_log(&self, log: &NewExecutionLog) -> DbResult<ExecutionLog> {
        let record = ExecutionLog::from(log.clone());
        self.logs.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_execution_log(&self, id: i64, data: &UpdateExecutionLogData) -> DbResult<ExecutionLog> {
        let mut log = self
            .logs
            .get_mut(&id)
            .ok_or_else(|| BaseError::NotFound(Some(format!("Execution log {} not found", id))))?;
        data.apply_to(&mut log);
        Ok(log.clone())
    }

    async fn get_execution_log(&self, id: i64) -> DbResult<Option<ExecutionLog>> {
        Ok(self.logs.get(&id).map(|l| l.value().clone()))
    }

    async fn list_execution_logs(&self, limit: i64) -> DbResult<Vec<ExecutionLog>> {
        let mut logs: Vec<ExecutionLog> = self.logs.iter().map(|l| l.value().clone()).collect();
        logs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        logs.truncate(limit.max(0) as usize);
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_active_policy_is_lowest_priority() {
        let store = MemoryStore::new();
        store.put_policy(SecurityPolicy { name: "strict".into(), priority: 1, ..Default::default() });
        store.put_policy(SecurityPolicy { name: "loose".into(), priority: 9, ..Default::default() });
        store.put_policy(SecurityPolicy {
            name: "off".into(),
            priority: 0,
            is_active: false,
            ..Default::default()
        });
        assert_eq!(store.get_active_policy().await.unwrap().unwrap().name, "strict");
    }

    #[tokio::test]
    async fn test_activate_policy_deactivates_others() {
        let store = MemoryStore::new();
        let a = SecurityPolicy { priority: 1, ..Default::default() };
        let b = SecurityPolicy { priority: 2, is_active: false, ..Default::default() };
        let b_id = b.id;
        store.put_policy(a);
        store.put_policy(b);

        store.activate_policy(b_id).await.unwrap();
        let active: Vec<i64> = store
            .policies
            .iter()
            .filter(|p| p.is_active)
            .map(|p| p.id)
            .collect();
        assert_eq!(active, vec![b_id]);
    }

    #[tokio::test]
    async fn test_version_chain_after_updates() {
        let store = MemoryStore::new();
        let mut head = store
            .insert_template(&NewPromptTemplate::first_version("t", Purpose::Sql, "v1", None, None))
            .await
            .unwrap();
        for n in 2..=4 {
            let next = NewPromptTemplate::next_version(&head, &format!("v{}", n), None, None);
            head = store.supersede_template(head.id, &next).await.unwrap();
        }

        let history = store.list_templates_by_name("t").await.unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history.iter().map(|t| t.version).collect::<Vec<_>>(), vec![4, 3, 2, 1]);
        assert_eq!(history.iter().filter(|t| t.is_active).count(), 1);
        for pair in history.windows(2) {
            assert_eq!(pair[0].parent_id, Some(pair[1].id));
        }
        assert_eq!(history[3].content, "v1");
    }
}
