use chrono::Utc;
use diesel::prelude::*;
use serde::Deserialize;

use super::{DbConnection, DbResult};
use crate::controller::BaseError;
use crate::schema::enum_def::ProviderType;
use crate::utils::ID_GENERATOR;
use crate::{db_execute, db_object};

db_object! {
    #[derive(Queryable, Selectable, Identifiable, AsChangeset)]
    #[diesel(table_name = provider)]
    pub struct Provider {
        pub id: i64,
        pub name: String,
        pub provider_type: ProviderType,
        pub base_url: String,
        pub api_key: Option<String>,
        pub timeout_ms: i64,
        pub max_retries: i32,
        pub use_proxy: bool,
        pub is_active: bool,
        // Lower is preferred; providers without one sort last.
        pub priority: Option<i32>,
        pub description: Option<String>,
        pub created_at: i64,
        pub updated_at: i64,
    }

    #[derive(Insertable, Deserialize, Debug)]
    #[diesel(table_name = provider)]
    pub struct NewProvider {
        pub id: i64,
        pub name: String,
        pub provider_type: ProviderType,
        pub base_url: String,
        pub api_key: Option<String>,
        pub timeout_ms: i64,
        pub max_retries: i32,
        pub use_proxy: bool,
        pub is_active: bool,
        pub priority: Option<i32>,
        pub description: Option<String>,
        pub created_at: i64,
        pub updated_at: i64,
    }
}

impl NewProvider {
    pub fn new(name: &str, provider_type: ProviderType, base_url: &str, priority: Option<i32>) -> Self {
        let now = Utc::now().timestamp_millis();
        NewProvider {
            id: ID_GENERATOR.generate_id(),
            name: name.to_string(),
            provider_type,
            base_url: base_url.to_string(),
            api_key: None,
            timeout_ms: 60_000,
            max_retries: 2,
            use_proxy: false,
            is_active: true,
            priority,
            description: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl From<NewProvider> for Provider {
    fn from(new: NewProvider) -> Self {
        Provider {
            id: new.id,
            name: new.name,
            provider_type: new.provider_type,
            base_url: new.base_url,
            api_key: new.api_key,
            timeout_ms: new.timeout_ms,
            max_retries: new.max_retries,
            use_proxy: new.use_proxy,
            is_active: new.is_active,
            priority: new.priority,
            description: new.description,
            created_at: new.created_at,
            updated_at: new.updated_at,
        }
    }
}

impl Provider {
    pub fn create(conn: &mut DbConnection, new_provider_data: &NewProvider) -> DbResult<Provider> {
        db_execute!(conn, {
            let db_provider = diesel::insert_into(provider::table)
                .values(NewProviderDb::to_db(new_provider_data))
                .returning(ProviderDb::as_returning())
                .get_result::<ProviderDb>(conn)
                .map_err(|e| BaseError::DatabaseFatal(Some(format!("Failed to insert provider: {}", e))))?;
            Ok(db_provider.from_db())
        })
    }

    pub fn get_by_id(conn: &mut DbConnection, target_id_value: i64) -> DbResult<Option<Provider>> {
        db_execute!(conn, {
            let db_provider_opt = provider::table
                .filter(provider::dsl::id.eq(target_id_value))
                .select(ProviderDb::as_select())
                .first::<ProviderDb>(conn)
                .optional()
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!("Error fetching provider {}: {}", target_id_value, e)))
                })?;
            Ok(db_provider_opt.map(|db_p| db_p.from_db()))
        })
    }

    /// Lists active providers. Priority ordering is left to the caller since
    /// the two backends disagree on where NULLs sort.
    pub fn list_all_active(conn: &mut DbConnection) -> DbResult<Vec<Provider>> {
        db_execute!(conn, {
            let db_providers = provider::table
                .filter(provider::dsl::is_active.eq(true))
                .order(provider::dsl::created_at.asc())
                .select(ProviderDb::as_select())
                .load::<ProviderDb>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!(
                        "Failed to list active providers: {}",
                        e
                    )))
                })?;

            Ok(db_providers.into_iter().map(|db_p| db_p.from_db()).collect())
        })
    }
}
