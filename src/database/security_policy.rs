use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use super::{DbConnection, DbResult};
use crate::controller::BaseError;
use crate::utils::ID_GENERATOR;
use crate::{db_execute, db_object};
use cyder_tools::log::error;

// The three list columns hold JSON string arrays.
db_object! {
    #[derive(Queryable, Selectable, Identifiable, AsChangeset, Insertable)]
    #[diesel(table_name = security_policy)]
    pub struct SecurityPolicyRecord {
        pub id: i64,
        pub name: String,
        pub description: Option<String>,
        pub is_active: bool,
        pub blocked_keywords: String,
        pub allowed_tables: String,
        pub denied_columns: String,
        pub max_result_rows: i32,
        pub require_approval: bool,
        pub block_ddl: bool,
        pub block_dml: bool,
        pub enable_injection_check: bool,
        pub enable_pii_masking: bool,
        pub priority: i32,
        pub created_at: i64,
        pub updated_at: i64,
    }
}

/// Rule parameters for SQL checks. At most one policy is active at a time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecurityPolicy {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub blocked_keywords: Vec<String>,
    /// Empty means every table is allowed.
    pub allowed_tables: Vec<String>,
    pub denied_columns: Vec<String>,
    pub max_result_rows: i32,
    pub require_approval: bool,
    pub block_ddl: bool,
    pub block_dml: bool,
    pub enable_injection_check: bool,
    pub enable_pii_masking: bool,
    pub priority: i32,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        let now = Utc::now().timestamp_millis();
        SecurityPolicy {
            id: ID_GENERATOR.generate_id(),
            name: "default".to_string(),
            description: None,
            is_active: true,
            blocked_keywords: Vec::new(),
            allowed_tables: Vec::new(),
            denied_columns: Vec::new(),
            max_result_rows: 1000,
            require_approval: false,
            block_ddl: true,
            block_dml: true,
            enable_injection_check: true,
            enable_pii_masking: false,
            priority: 100,
            created_at: now,
            updated_at: now,
        }
    }
}

fn parse_list(id: i64, column: &str, raw: &str) -> DbResult<Vec<String>> {
    serde_json::from_str(raw).map_err(|e| {
        error!("security policy {} has an unreadable {} column: {}", id, column, e);
        BaseError::DatabaseFatal(Some(format!(
            "Security policy {} has malformed {}: {}",
            id, column, e
        )))
    })
}

fn encode_list(list: &[String]) -> String {
    serde_json::to_string(list).unwrap_or_else(|_| "[]".to_string())
}

// A list that cannot be read is an error rather than an empty list, so a
// damaged row never loosens the rules it carries.
impl TryFrom<SecurityPolicyRecord> for SecurityPolicy {
    type Error = BaseError;

    fn try_from(record: SecurityPolicyRecord) -> DbResult<Self> {
        Ok(SecurityPolicy {
            id: record.id,
            name: record.name,
            description: record.description,
            is_active: record.is_active,
            blocked_keywords: parse_list(record.id, "blocked_keywords", &record.blocked_keywords)?,
            allowed_tables: parse_list(record.id, "allowed_tables", &record.allowed_tables)?,
            denied_columns: parse_list(record.id, "denied_columns", &record.denied_columns)?,
            max_result_rows: record.max_result_rows,
            require_approval: record.require_approval,
            block_ddl: record.block_ddl,
            block_dml: record.block_dml,
            enable_injection_check: record.enable_injection_check,
            enable_pii_masking: record.enable_pii_masking,
            priority: record.priority,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

impl From<&SecurityPolicy> for SecurityPolicyRecord {
    fn from(policy: &SecurityPolicy) -> Self {
        SecurityPolicyRecord {
            id: policy.id,
            name: policy.name.clone(),
            description: policy.description.clone(),
            is_active: policy.is_active,
            blocked_keywords: encode_list(&policy.blocked_keywords),
            allowed_tables: encode_list(&policy.allowed_tables),
            denied_columns: encode_list(&policy.denied_columns),
            max_result_rows: policy.max_result_rows,
            require_approval: policy.require_approval,
            block_ddl: policy.block_ddl,
            block_dml: policy.block_dml,
            enable_injection_check: policy.enable_injection_check,
            enable_pii_masking: policy.enable_pii_masking,
            priority: policy.priority,
            created_at: policy.created_at,
            updated_at: policy.updated_at,
        }
    }
}

impl SecurityPolicy {
    pub fn create(conn: &mut DbConnection, policy: &SecurityPolicy) -> DbResult<SecurityPolicy> {
        let record = SecurityPolicyRecord::from(policy);
        db_execute!(conn, {
            let db_policy = diesel::insert_into(security_policy::table)
                .values(SecurityPolicyRecordDb::to_db(&record))
                .returning(SecurityPolicyRecordDb::as_returning())
                .get_result::<SecurityPolicyRecordDb>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!("Failed to insert security policy: {}", e)))
                })?;
            SecurityPolicy::try_from(db_policy.from_db())
        })
    }

    pub fn get_by_id(conn: &mut DbConnection, id_value: i64) -> DbResult<Option<SecurityPolicy>> {
        db_execute!(conn, {
            let db_policy_opt = security_policy::table
                .filter(security_policy::dsl::id.eq(id_value))
                .select(SecurityPolicyRecordDb::as_select())
                .first::<SecurityPolicyRecordDb>(conn)
                .optional()
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!("Error fetching security policy {}: {}", id_value, e)))
                })?;
            db_policy_opt
                .map(|db_p| SecurityPolicy::try_from(db_p.from_db()))
                .transpose()
        })
    }

    /// The active policy with the lowest priority value, if any.
    pub fn get_active(conn: &mut DbConnection) -> DbResult<Option<SecurityPolicy>> {
        db_execute!(conn, {
            let db_policy_opt = security_policy::table
                .filter(security_policy::dsl::is_active.eq(true))
                .order((security_policy::dsl::priority.asc(), security_policy::dsl::updated_at.desc()))
                .select(SecurityPolicyRecordDb::as_select())
                .first::<SecurityPolicyRecordDb>(conn)
                .optional()
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!("Error fetching active security policy: {}", e)))
                })?;
            db_policy_opt
                .map(|db_p| SecurityPolicy::try_from(db_p.from_db()))
                .transpose()
        })
    }

    /// Makes `id_value` the single active policy.
    pub fn activate(conn: &mut DbConnection, id_value: i64) -> DbResult<SecurityPolicy> {
        let now = Utc::now().timestamp_millis();
        db_execute!(conn, {
            conn.transaction::<_, BaseError, _>(|conn| {
                let exists = security_policy::table
                    .filter(security_policy::dsl::id.eq(id_value))
                    .select(security_policy::dsl::id)
                    .first::<i64>(conn)
                    .optional()?;
                if exists.is_none() {
                    return Err(BaseError::NotFound(Some(format!(
                        "Security policy {} not found",
                        id_value
                    ))));
                }

                diesel::update(security_policy::table.filter(security_policy::dsl::is_active.eq(true)))
                    .set((
                        security_policy::dsl::is_active.eq(false),
                        security_policy::dsl::updated_at.eq(now),
                    ))
                    .execute(conn)?;

                let db_policy = diesel::update(security_policy::table.find(id_value))
                    .set((
                        security_policy::dsl::is_active.eq(true),
                        security_policy::dsl::updated_at.eq(now),
                    ))
                    .returning(SecurityPolicyRecordDb::as_returning())
                    .get_result::<SecurityPolicyRecordDb>(conn)?;
                SecurityPolicy::try_from(db_policy.from_db())
            })
        })
    }
}
