use async_trait::async_trait;
use std::sync::Arc;

use super::{sort_by_priority, ConfigStore};
use crate::controller::BaseError;
use crate::database::execution_log::{ExecutionLog, NewExecutionLog, UpdateExecutionLogData};
use crate::database::model::Model;
use crate::database::prompt_template::{NewPromptTemplate, PromptTemplate};
use crate::database::provider::Provider;
use crate::database::security_policy::SecurityPolicy;
use crate::database::{DbConnection, DbPool, DbResult};
use crate::schema::enum_def::Purpose;

/// `ConfigStore` over the diesel pool. Queries are blocking, so each call
/// hops onto the blocking thread pool.
#[derive(Clone)]
pub struct DbStore {
    pool: Arc<DbPool>,
}

impl DbStore {
    pub fn new(pool: DbPool) -> Self {
        DbStore { pool: Arc::new(pool) }
    }

    async fn run<T, F>(&self, f: F) -> DbResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut DbConnection) -> DbResult<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await
        .map_err(|e| BaseError::InternalServerError(Some(format!("database task failed: {}", e))))?
    }
}

#[async_trait]
impl ConfigStore for DbStore {
    async fn list_active_providers(&self) -> DbResult<Vec<Provider>> {
        let mut providers = self.run(|conn| Provider::list_all_active(conn)).await?;
        sort_by_priority(&mut providers);
        Ok(providers)
    }

    async fn get_provider(&self, id: i64) -> DbResult<Option<Provider>> {
        self.run(move |conn| Provider::get_by_id(conn, id)).await
    }

    async fn list_active_models(&self) -> DbResult<Vec<Model>> {
        self.run(|conn| Model::list_all_active(conn)).await
    }

    async fn get_model(&self, id: i64) -> DbResult<Option<Model>> {
        self.run(move |conn| Model::get_by_id(conn, id)).await
    }

    async fn get_template(&self, id: i64) -> DbResult<Option<PromptTemplate>> {
        self.run(move |conn| PromptTemplate::get_by_id(conn, id)).await
    }

    async fn list_templates_by_name(&self, name: &str) -> DbResult<Vec<PromptTemplate>> {
        let name = name.to_string();
        self.run(move |conn| PromptTemplate::list_by_name(conn, &name)).await
    }

    async fn list_active_approved_templates(&self, purpose: Purpose) -> DbResult<Vec<PromptTemplate>> {
        self.run(move |conn| PromptTemplate::list_active_approved_by_purpose(conn, purpose))
            .await
    }

    async fn insert_template(&self, template: &NewPromptTemplate) -> DbResult<PromptTemplate> {
        let template = template.clone();
        self.run(move |conn| PromptTemplate::insert(conn, &template)).await
    }

    async fn supersede_template(&self, target_id: i64, successor: &NewPromptTemplate) -> DbResult<PromptTemplate> {
        let successor = successor.clone();
        self.run(move |conn| PromptTemplate::supersede(conn, target_id, &successor))
            .await
    }

    async fn approve_template(&self, id: i64, approver: &str, approved_at: i64) -> DbResult<PromptTemplate> {
        let approver = approver.to_string();
        self.run(move |conn| PromptTemplate::approve(conn, id, &approver, approved_at))
            .await
    }

    async fn get_active_policy(&self) -> DbResult<Option<SecurityPolicy>> {
        self.run(|conn| SecurityPolicy::get_active(conn)).await
    }

    async fn get_policy(&self, id: i64) -> DbResult<Option<SecurityPolicy>> {
        self.run(move |conn| SecurityPolicy::get_by_id(conn, id)).await
    }

    async fn activate_policy(&self, id: i64) -> DbResult<SecurityPolicy> {
        self.run(move |conn| SecurityPolicy::activate(conn, id)).await
    }

    async fn insert_execution_log(&self, log: &NewExecutionLog) -> DbResult<ExecutionLog> {
        let log = log.clone();
        self.run(move |conn| ExecutionLog::insert(conn, &log)).await
    }

    async fn update_execution_log(&self, id: i64, data: &UpdateExecutionLogData) -> DbResult<ExecutionLog> {
        let data = data.clone();
        self.run(move |conn| ExecutionLog::update(conn, id, &data)).await
    }

    async fn get_execution_log(&self, id: i64) -> DbResult<Option<ExecutionLog>> {
        self.run(move |conn| ExecutionLog::get_by_id(conn, id)).await
    }

    async fn list_execution_logs(&self, limit: i64) -> DbResult<Vec<ExecutionLog>> {
        self.run(move |conn| ExecutionLog::list_recent(conn, limit)).await
    }
}
