use async_trait::async_trait;

use crate::database::execution_log::{ExecutionLog, NewExecutionLog, UpdateExecutionLogData};
use crate::database::model::Model;
use crate::database::prompt_template::{NewPromptTemplate, PromptTemplate};
use crate::database::provider::Provider;
use crate::database::security_policy::SecurityPolicy;
use crate::database::DbResult;
use crate::schema::enum_def::Purpose;

pub mod cached;
pub mod db;
pub mod memory;

pub use cached::CachedStore;
pub use db::DbStore;
pub use memory::MemoryStore;

/// Access to configuration records and the execution audit trail.
///
/// Ordering guarantees every implementation honours:
/// - active providers come back sorted by ascending priority, `None` last;
/// - template history is newest version first;
/// - the active policy is the lowest priority value among active policies.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn list_active_providers(&self) -> DbResult<Vec<Provider>>;
    async fn get_provider(&self, id: i64) -> DbResult<Option<Provider>>;
    async fn list_active_models(&self) -> DbResult<Vec<Model>>;
    async fn get_model(&self, id: i64) -> DbResult<Option<Model>>;

    async fn get_template(&self, id: i64) -> DbResult<Option<PromptTemplate>>;
    async fn list_templates_by_name(&self, name: &str) -> DbResult<Vec<PromptTemplate>>;
    async fn list_active_approved_templates(&self, purpose: Purpose) -> DbResult<Vec<PromptTemplate>>;
    async fn insert_template(&self, template: &NewPromptTemplate) -> DbResult<PromptTemplate>;
    /// Deactivates `target_id` and inserts `successor` atomically. Fails with
    /// `ParamInvalid` when the target is not currently active.
    async fn supersede_template(&self, target_id: i64, successor: &NewPromptTemplate) -> DbResult<PromptTemplate>;
    async fn approve_template(&self, id: i64, approver: &str, approved_at: i64) -> DbResult<PromptTemplate>;

    async fn get_active_policy(&self) -> DbResult<Option<SecurityPolicy>>;
    async fn get_policy(&self, id: i64) -> DbResult<Option<SecurityPolicy>>;
    /// Makes `id` the only active policy.
    async fn activate_policy(&self, id: i64) -> DbResult<SecurityPolicy>;

    async fn insert_execution_log(&self, log: &NewExecutionLog) -> DbResult<ExecutionLog>;
    async fn update_execution_log(&self, id: i64, data: &UpdateExecutionLogData) -> DbResult<ExecutionLog>;
    async fn get_execution_log(&self, id: i64) -> DbResult<Option<ExecutionLog>>;
    async fn list_execution_logs(&self, limit: i64) -> DbResult<Vec<ExecutionLog>>;
}

pub(crate) fn sort_by_priority(providers: &mut [Provider]) {
    providers.sort_by_key(|p| (p.priority.is_none(), p.priority.unwrap_or(0), p.created_at));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_priority_sorts_last() {
        let mut providers = vec![
            Provider { id: 1, priority: None, ..Default::default() },
            Provider { id: 2, priority: Some(5), ..Default::default() },
            Provider { id: 3, priority: Some(1), ..Default::default() },
        ];
        sort_by_priority(&mut providers);
        let ids: Vec<i64> = providers.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }
}
