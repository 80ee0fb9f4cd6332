use chrono::Utc;
use diesel::prelude::*;
use serde::Deserialize;

use super::{DbConnection, DbResult};
use crate::controller::BaseError;
use crate::utils::ID_GENERATOR;
use crate::{db_execute, db_object};

db_object! {
    #[derive(Queryable, Selectable, Identifiable, AsChangeset)]
    #[diesel(table_name = execution_log)]
    pub struct ExecutionLog {
        pub id: i64,
        pub provider_id: Option<i64>,
        pub model_id: Option<i64>,
        pub template_id: Option<i64>,
        pub user_input: String,
        pub rendered_prompt: Option<String>,
        pub generated_sql: Option<String>,
        pub input_tokens: Option<i32>,
        pub output_tokens: Option<i32>,
        pub latency_ms: Option<i64>,
        pub success: bool,
        pub error_message: Option<String>,
        pub user_id: Option<String>,
        pub connection_id: String,
        pub was_blocked: bool,
        pub block_reason: Option<String>,
        pub created_at: i64,
        pub updated_at: i64,
    }

    #[derive(Insertable, Deserialize, Debug)]
    #[diesel(table_name = execution_log)]
    pub struct NewExecutionLog {
        pub id: i64,
        pub user_input: String,
        pub user_id: Option<String>,
        pub connection_id: String,
        pub success: bool,
        pub was_blocked: bool,
        pub created_at: i64,
        pub updated_at: i64,
    }
}

/// Partial update applied as a generation request moves through its steps.
/// The outer `Option` means "leave unchanged".
#[derive(AsChangeset, Deserialize, Debug, Default, Clone)]
#[diesel(table_name = crate::database::_sqlite_schema::execution_log)]
pub struct UpdateExecutionLogData {
    pub provider_id: Option<Option<i64>>,
    pub model_id: Option<Option<i64>>,
    pub template_id: Option<Option<i64>>,
    pub rendered_prompt: Option<Option<String>>,
    pub generated_sql: Option<Option<String>>,
    pub input_tokens: Option<Option<i32>>,
    pub output_tokens: Option<Option<i32>>,
    pub latency_ms: Option<Option<i64>>,
    pub success: Option<bool>,
    pub error_message: Option<Option<String>>,
    pub was_blocked: Option<bool>,
    pub block_reason: Option<Option<String>>,
}

#[derive(AsChangeset)]
#[diesel(table_name = crate::database::_postgres_schema::execution_log)]
struct UpdateExecutionLogPg {
    provider_id: Option<Option<i64>>,
    model_id: Option<Option<i64>>,
    template_id: Option<Option<i64>>,
    rendered_prompt: Option<Option<String>>,
    generated_sql: Option<Option<String>>,
    input_tokens: Option<Option<i32>>,
    output_tokens: Option<Option<i32>>,
    latency_ms: Option<Option<i64>>,
    success: Option<bool>,
    error_message: Option<Option<String>>,
    was_blocked: Option<bool>,
    block_reason: Option<Option<String>>,
}

impl From<UpdateExecutionLogData> for UpdateExecutionLogPg {
    fn from(data: UpdateExecutionLogData) -> Self {
        UpdateExecutionLogPg {
            provider_id: data.provider_id,
            model_id: data.model_id,
            template_id: data.template_id,
            rendered_prompt: data.rendered_prompt,
            generated_sql: data.generated_sql,
            input_tokens: data.input_tokens,
            output_tokens: data.output_tokens,
            latency_ms: data.latency_ms,
            success: data.success,
            error_message: data.error_message,
            was_blocked: data.was_blocked,
            block_reason: data.block_reason,
        }
    }
}

impl UpdateExecutionLogData {
    /// Applies the changed fields to an in-memory copy.
    pub fn apply_to(&self, log: &mut ExecutionLog) {
        if let Some(v) = self.provider_id {
            log.provider_id = v;
        }
        if let Some(v) = self.model_id {
            log.model_id = v;
        }
        if let Some(v) = self.template_id {
            log.template_id = v;
        }
        if let Some(v) = &self.rendered_prompt {
            log.rendered_prompt = v.clone();
        }
        if let Some(v) = &self.generated_sql {
            log.generated_sql = v.clone();
        }
        if let Some(v) = self.input_tokens {
            log.input_tokens = v;
        }
        if let Some(v) = self.output_tokens {
            log.output_tokens = v;
        }
        if let Some(v) = self.latency_ms {
            log.latency_ms = v;
        }
        if let Some(v) = self.success {
            log.success = v;
        }
        if let Some(v) = &self.error_message {
            log.error_message = v.clone();
        }
        if let Some(v) = self.was_blocked {
            log.was_blocked = v;
        }
        if let Some(v) = &self.block_reason {
            log.block_reason = v.clone();
        }
        log.updated_at = Utc::now().timestamp_millis();
    }
}

impl NewExecutionLog {
    pub fn new(user_input: &str, user_id: Option<String>, connection_id: &str) -> Self {
        let now = Utc::now().timestamp_millis();
        NewExecutionLog {
            id: ID_GENERATOR.generate_id(),
            user_input: user_input.to_string(),
            user_id,
            connection_id: connection_id.to_string(),
            success: false,
            was_blocked: false,
            created_at: now,
            updated_at: now,
        }
    }
}

impl From<NewExecutionLog> for ExecutionLog {
    fn from(new: NewExecutionLog) -> Self {
        ExecutionLog {
            id: new.id,
            user_input: new.user_input,
            user_id: new.user_id,
            connection_id: new.connection_id,
            success: new.success,
            was_blocked: new.was_blocked,
            created_at: new.created_at,
            updated_at: new.updated_at,
            ..Default::default()
        }
    }
}

impl ExecutionLog {
    pub fn insert(conn: &mut DbConnection, new_log: &NewExecutionLog) -> DbResult<ExecutionLog> {
        db_execute!(conn, {
            let db_log = diesel::insert_into(execution_log::table)
                .values(NewExecutionLogDb::to_db(new_log))
                .returning(ExecutionLogDb::as_returning())
                .get_result::<ExecutionLogDb>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!("Failed to insert execution log: {}", e)))
                })?;
            Ok(db_log.from_db())
        })
    }

    pub fn update(
        conn: &mut DbConnection,
        id_value: i64,
        data: &UpdateExecutionLogData,
    ) -> DbResult<ExecutionLog> {
        let now = Utc::now().timestamp_millis();
        let result = match conn {
            DbConnection::Postgres(conn) => {
                use crate::database::_postgres_schema::execution_log;
                use _postgres_model::ExecutionLogDb;
                diesel::update(execution_log::table.find(id_value))
                    .set((
                        UpdateExecutionLogPg::from(data.clone()),
                        execution_log::dsl::updated_at.eq(now),
                    ))
                    .returning(ExecutionLogDb::as_returning())
                    .get_result::<ExecutionLogDb>(conn)
                    .map(|db_log| db_log.from_db())
            }
            DbConnection::Sqlite(conn) => {
                use crate::database::_sqlite_schema::execution_log;
                use _sqlite_model::ExecutionLogDb;
                diesel::update(execution_log::table.find(id_value))
                    .set((data, execution_log::dsl::updated_at.eq(now)))
                    .returning(ExecutionLogDb::as_returning())
                    .get_result::<ExecutionLogDb>(conn)
                    .map(|db_log| db_log.from_db())
            }
        };
        result.map_err(|e| match e {
            diesel::result::Error::NotFound => {
                BaseError::NotFound(Some(format!("Execution log {} not found", id_value)))
            }
            e => BaseError::DatabaseFatal(Some(format!("Failed to update execution log {}: {}", id_value, e))),
        })
    }

    pub fn get_by_id(conn: &mut DbConnection, id_value: i64) -> DbResult<Option<ExecutionLog>> {
        db_execute!(conn, {
            let db_log_opt = execution_log::table
                .filter(execution_log::dsl::id.eq(id_value))
                .select(ExecutionLogDb::as_select())
                .first::<ExecutionLogDb>(conn)
                .optional()
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!("Error fetching execution log {}: {}", id_value, e)))
                })?;
            Ok(db_log_opt.map(|db_l| db_l.from_db()))
        })
    }

    /// Most recent entries first.
    pub fn list_recent(conn: &mut DbConnection, limit: i64) -> DbResult<Vec<ExecutionLog>> {
        db_execute!(conn, {
            let db_logs = execution_log::table
                .order(execution_log::dsl::created_at.desc())
                .limit(limit)
                .select(ExecutionLogDb::as_select())
                .load::<ExecutionLogDb>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!("Failed to list execution logs: {}", e)))
                })?;
            Ok(db_logs.into_iter().map(|db_l| db_l.from_db()).collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_only_touches_set_fields() {
        let mut log: ExecutionLog = NewExecutionLog::new("top customers", None, "conn-1").into();
        log.generated_sql = Some("SELECT 1".to_string());

        let update = UpdateExecutionLogData {
            success: Some(true),
            latency_ms: Some(Some(42)),
            error_message: Some(None),
            ..Default::default()
        };
        update.apply_to(&mut log);

        assert!(log.success);
        assert_eq!(log.latency_ms, Some(42));
        assert_eq!(log.generated_sql.as_deref(), Some("SELECT 1"));
        assert_eq!(log.connection_id, "conn-1");
    }
}
