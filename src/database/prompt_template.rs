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
    #[diesel(table_name = prompt_template)]
    pub struct PromptTemplate {
        pub id: i64,
        pub name: String,
        pub purpose: Purpose,
        pub content: String,
        pub description: Option<String>,
        pub version: i32,
        pub is_active: bool,
        pub is_approved: bool,
        pub approved_by: Option<String>,
        pub approved_at: Option<i64>,
        pub parent_id: Option<i64>,
        pub created_by: Option<String>,
        pub created_at: i64,
        pub updated_at: i64,
    }

    #[derive(Insertable, Deserialize, Debug)]
    #[diesel(table_name = prompt_template)]
    pub struct NewPromptTemplate {
        pub id: i64,
        pub name: String,
        pub purpose: Purpose,
        pub content: String,
        pub description: Option<String>,
        pub version: i32,
        pub is_active: bool,
        pub is_approved: bool,
        pub approved_by: Option<String>,
        pub approved_at: Option<i64>,
        pub parent_id: Option<i64>,
        pub created_by: Option<String>,
        pub created_at: i64,
        pub updated_at: i64,
    }
}

impl NewPromptTemplate {
    /// First version of a template: active, unapproved, no parent.
    pub fn first_version(
        name: &str,
        purpose: Purpose,
        content: &str,
        description: Option<String>,
        created_by: Option<String>,
    ) -> Self {
        let now = Utc::now().timestamp_millis();
        NewPromptTemplate {
            id: ID_GENERATOR.generate_id(),
            name: name.to_string(),
            purpose,
            content: content.to_string(),
            description,
            version: 1,
            is_active: true,
            is_approved: false,
            approved_by: None,
            approved_at: None,
            parent_id: None,
            created_by,
            created_at: now,
            updated_at: now,
        }
    }

    /// Successor of `head` carrying new content. Name and purpose are inherited.
    pub fn next_version(
        head: &PromptTemplate,
        content: &str,
        description: Option<String>,
        created_by: Option<String>,
    ) -> Self {
        let now = Utc::now().timestamp_millis();
        NewPromptTemplate {
            id: ID_GENERATOR.generate_id(),
            name: head.name.clone(),
            purpose: head.purpose,
            content: content.to_string(),
            description: description.or_else(|| head.description.clone()),
            version: head.version + 1,
            is_active: true,
            is_approved: false,
            approved_by: None,
            approved_at: None,
            parent_id: Some(head.id),
            created_by,
            created_at: now,
            updated_at: now,
        }
    }
}

impl From<NewPromptTemplate> for PromptTemplate {
    fn from(new: NewPromptTemplate) -> Self {
        PromptTemplate {
            id: new.id,
            name: new.name,
            purpose: new.purpose,
            content: new.content,
            description: new.description,
            version: new.version,
            is_active: new.is_active,
            is_approved: new.is_approved,
            approved_by: new.approved_by,
            approved_at: new.approved_at,
            parent_id: new.parent_id,
            created_by: new.created_by,
            created_at: new.created_at,
            updated_at: new.updated_at,
        }
    }
}

impl PromptTemplate {
    pub fn insert(conn: &mut DbConnection, new_template: &NewPromptTemplate) -> DbResult<PromptTemplate> {
        db_execute!(conn, {
            let db_template = diesel::insert_into(prompt_template::table)
                .values(NewPromptTemplateDb::to_db(new_template))
                .returning(PromptTemplateDb::as_returning())
                .get_result::<PromptTemplateDb>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!("Failed to insert prompt template: {}", e)))
                })?;
            Ok(db_template.from_db())
        })
    }

    pub fn get_by_id(conn: &mut DbConnection, id_value: i64) -> DbResult<Option<PromptTemplate>> {
        db_execute!(conn, {
            let db_template_opt = prompt_template::table
                .filter(prompt_template::dsl::id.eq(id_value))
                .select(PromptTemplateDb::as_select())
                .first::<PromptTemplateDb>(conn)
                .optional()
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!("Error fetching prompt template {}: {}", id_value, e)))
                })?;
            Ok(db_template_opt.map(|db_t| db_t.from_db()))
        })
    }

    /// Every version sharing `name_value`, newest first.
    pub fn list_by_name(conn: &mut DbConnection, name_value: &str) -> DbResult<Vec<PromptTemplate>> {
        db_execute!(conn, {
            let db_templates = prompt_template::table
                .filter(prompt_template::dsl::name.eq(name_value))
                .order(prompt_template::dsl::version.desc())
                .select(PromptTemplateDb::as_select())
                .load::<PromptTemplateDb>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!("Failed to list template history for {}: {}", name_value, e)))
                })?;
            Ok(db_templates.into_iter().map(|db_t| db_t.from_db()).collect())
        })
    }

    /// Active, approved templates for `purpose`, newest version first.
    pub fn list_active_approved_by_purpose(
        conn: &mut DbConnection,
        purpose_value: Purpose,
    ) -> DbResult<Vec<PromptTemplate>> {
        db_execute!(conn, {
            let db_templates = prompt_template::table
                .filter(prompt_template::dsl::purpose.eq(purpose_value))
                .filter(prompt_template::dsl::is_active.eq(true))
                .filter(prompt_template::dsl::is_approved.eq(true))
                .order((prompt_template::dsl::version.desc(), prompt_template::dsl::updated_at.desc()))
                .select(PromptTemplateDb::as_select())
                .load::<PromptTemplateDb>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!("Failed to list approved templates: {}", e)))
                })?;
            Ok(db_templates.into_iter().map(|db_t| db_t.from_db()).collect())
        })
    }

    /// Deactivates `target_id` and inserts its successor in one transaction.
    pub fn supersede(
        conn: &mut DbConnection,
        target_id: i64,
        successor: &NewPromptTemplate,
    ) -> DbResult<PromptTemplate> {
        let now = Utc::now().timestamp_millis();
        db_execute!(conn, {
            conn.transaction::<_, BaseError, _>(|conn| {
                let affected = diesel::update(prompt_template::table.find(target_id))
                    .filter(prompt_template::dsl::is_active.eq(true))
                    .set((
                        prompt_template::dsl::is_active.eq(false),
                        prompt_template::dsl::updated_at.eq(now),
                    ))
                    .execute(conn)?;
                if affected == 0 {
                    return Err(BaseError::ParamInvalid(Some(format!(
                        "Template {} is not the active version",
                        target_id
                    ))));
                }

                let db_template = diesel::insert_into(prompt_template::table)
                    .values(NewPromptTemplateDb::to_db(successor))
                    .returning(PromptTemplateDb::as_returning())
                    .get_result::<PromptTemplateDb>(conn)?;
                Ok(db_template.from_db())
            })
        })
    }

    pub fn approve(
        conn: &mut DbConnection,
        id_value: i64,
        approver: &str,
        approved_at_value: i64,
    ) -> DbResult<PromptTemplate> {
        db_execute!(conn, {
            let db_template = diesel::update(prompt_template::table.find(id_value))
                .set((
                    prompt_template::dsl::is_approved.eq(true),
                    prompt_template::dsl::approved_by.eq(Some(approver)),
                    prompt_template::dsl::approved_at.eq(Some(approved_at_value)),
                    prompt_template::dsl::updated_at.eq(approved_at_value),
                ))
                .returning(PromptTemplateDb::as_returning())
                .get_result::<PromptTemplateDb>(conn)
                .optional()
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!("Failed to approve template {}: {}", id_value, e)))
                })?;
            db_template
                .map(|db_t| db_t.from_db())
                .ok_or_else(|| BaseError::NotFound(Some(format!("Template {} not found", id_value))))
        })
    }
}
