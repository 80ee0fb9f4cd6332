use chrono::Utc;
use diesel::prelude::*;
use serde::Deserialize;

use super::{DbConnection, DbResult};
use crate::controller::BaseError;
use crate::schema::enum_def::Purpose;
use crate::utils::ID_GENERATOR;
use crate::{db_execute, db_object};

db_object! {
    #[derive(Queryable, Selectable, Identifiable, AsChangeset)]
    #[diesel(table_name = model)]
    pub struct Model {
        pub id: i64,
        pub provider_id: i64,
        pub name: String,
        // Identifier sent to the backend in the `model` field.
        pub model_id: String,
        pub purpose: Purpose,
        pub max_tokens: i32,
        pub temperature: f64,
        pub top_p: f64,
        pub system_prompt: Option<String>,
        pub is_active: bool,
        pub created_at: i64,
        pub updated_at: i64,
    }

    #[derive(Insertable, Deserialize, Debug)]
    #[diesel(table_name = model)]
    pub struct NewModel {
        pub id: i64,
        pub provider_id: i64,
        pub name: String,
        pub model_id: String,
        pub purpose: Purpose,
        pub max_tokens: i32,
        pub temperature: f64,
        pub top_p: f64,
        pub system_prompt: Option<String>,
        pub is_active: bool,
        pub created_at: i64,
        pub updated_at: i64,
    }
}

impl NewModel {
    pub fn new(provider_id: i64, name: &str, model_id: &str, purpose: Purpose) -> Self {
        let now = Utc::now().timestamp_millis();
        NewModel {
            id: ID_GENERATOR.generate_id(),
            provider_id,
            name: name.to_string(),
            model_id: model_id.to_string(),
            purpose,
            max_tokens: 2048,
            temperature: 0.1,
            top_p: 0.95,
            system_prompt: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

impl From<NewModel> for Model {
    fn from(new: NewModel) -> Self {
        Model {
            id: new.id,
            provider_id: new.provider_id,
            name: new.name,
            model_id: new.model_id,
            purpose: new.purpose,
            max_tokens: new.max_tokens,
            temperature: new.temperature,
            top_p: new.top_p,
            system_prompt: new.system_prompt,
            is_active: new.is_active,
            created_at: new.created_at,
            updated_at: new.updated_at,
        }
    }
}

impl Model {
    pub fn create(conn: &mut DbConnection, new_model_data: &NewModel) -> DbResult<Model> {
        db_execute!(conn, {
            let db_model = diesel::insert_into(model::table)
                .values(NewModelDb::to_db(new_model_data))
                .returning(ModelDb::as_returning())
                .get_result::<ModelDb>(conn)
                .map_err(|e| BaseError::DatabaseFatal(Some(format!("Failed to insert model: {}", e))))?;
            Ok(db_model.from_db())
        })
    }

    pub fn get_by_id(conn: &mut DbConnection, id_value: i64) -> DbResult<Option<Model>> {
        db_execute!(conn, {
            let db_model_opt = model::table
                .filter(model::dsl::id.eq(id_value))
                .select(ModelDb::as_select())
                .first::<ModelDb>(conn)
                .optional()
                .map_err(|e| BaseError::DatabaseFatal(Some(format!("Error fetching model {}: {}", id_value, e))))?;
            Ok(db_model_opt.map(|db_m| db_m.from_db()))
        })
    }

    pub fn list_all_active(conn: &mut DbConnection) -> DbResult<Vec<Model>> {
        db_execute!(conn, {
            let db_models = model::table
                .filter(model::dsl::is_active.eq(true))
                .order(model::dsl::created_at.asc())
                .select(ModelDb::as_select())
                .load::<ModelDb>(conn)
                .map_err(|e| BaseError::DatabaseFatal(Some(format!("Failed to list active models: {}", e))))?;
            Ok(db_models.into_iter().map(|db_m| db_m.from_db()).collect())
        })
    }
}
