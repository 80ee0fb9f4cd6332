use chrono::Utc;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::controller::BaseError;
use crate::database::prompt_template::{NewPromptTemplate, PromptTemplate};
use crate::database::DbResult;
use crate::schema::enum_def::Purpose;
use crate::service::security::patterns::compile;
use crate::service::store::ConfigStore;
use cyder_tools::log::info;

pub const DEFAULT_SQL_TEMPLATE: &str = r#"You are an expert SQL engineer. Translate the user's question into a single {{database_type}} SQL query.

Rules:
- Use only the tables and columns listed in the schema below.
- Produce read-only SQL (SELECT or WITH) unless the question explicitly asks otherwise.
- Return the query inside a ```sql code block, followed by a one-paragraph explanation.

Schema:
{{schema}}

Question: {{query}}
"#;

#[derive(Debug, Deserialize)]
pub struct CreateTemplateRequest {
    pub name: String,
    pub purpose: Purpose,
    pub content: String,
    pub description: Option<String>,
    pub created_by: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTemplateRequest {
    pub content: String,
    pub description: Option<String>,
    pub updated_by: Option<String>,
}

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| compile(r"\{\{([^{}]+)\}\}"));

/// Replaces every `{{key}}` for the keys in `variables` in a single pass, so
/// substituted values are never scanned again. Placeholders with no value
/// are left as written.
pub fn render_prompt(content: &str, variables: &HashMap<String, String>) -> String {
    PLACEHOLDER
        .replace_all(content, |caps: &Captures<'_>| match variables.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

pub struct PromptTemplateManager {
    store: Arc<dyn ConfigStore>,
}

impl PromptTemplateManager {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        PromptTemplateManager { store }
    }

    /// Newest version among active, approved templates for `purpose`.
    pub async fn find_latest_active(&self, purpose: Purpose) -> DbResult<Option<PromptTemplate>> {
        let templates = self.store.list_active_approved_templates(purpose).await?;
        Ok(templates.into_iter().max_by(|a, b| {
            a.version
                .cmp(&b.version)
                .then_with(|| a.updated_at.cmp(&b.updated_at))
        }))
    }

    pub async fn create(&self, req: CreateTemplateRequest) -> DbResult<PromptTemplate> {
        if req.name.trim().is_empty() || req.content.trim().is_empty() {
            return Err(BaseError::ParamInvalid(Some(
                "template name and content must not be empty".to_string(),
            )));
        }
        if !self.store.list_templates_by_name(req.name.trim()).await?.is_empty() {
            return Err(BaseError::DatabaseDup(Some(format!(
                "A template named '{}' already exists; update it instead",
                req.name.trim()
            ))));
        }
        let new_template = NewPromptTemplate::first_version(
            req.name.trim(),
            req.purpose,
            &req.content,
            req.description,
            req.created_by,
        );
        let created = self.store.insert_template(&new_template).await?;
        info!("Created prompt template '{}' (id {})", created.name, created.id);
        Ok(created)
    }

    /// Supersedes the active head `id` with a new, unapproved version.
    pub async fn update(&self, id: i64, req: UpdateTemplateRequest) -> DbResult<PromptTemplate> {
        if req.content.trim().is_empty() {
            return Err(BaseError::ParamInvalid(Some("template content must not be empty".to_string())));
        }
        let head = self.get(id).await?;
        if !head.is_active {
            return Err(BaseError::ParamInvalid(Some(format!(
                "Template {} v{} has been superseded; only the active version can be updated",
                head.name, head.version
            ))));
        }
        let successor = NewPromptTemplate::next_version(&head, &req.content, req.description, req.updated_by);
        let created = self.store.supersede_template(head.id, &successor).await?;
        info!(
            "Template '{}' moved to v{} (parent {})",
            created.name, created.version, head.id
        );
        Ok(created)
    }

    pub async fn approve(&self, id: i64, approver: &str) -> DbResult<PromptTemplate> {
        if approver.trim().is_empty() {
            return Err(BaseError::ParamInvalid(Some("approver must not be empty".to_string())));
        }
        let approved = self
            .store
            .approve_template(id, approver.trim(), Utc::now().timestamp_millis())
            .await?;
        info!("Template '{}' v{} approved by {}", approved.name, approved.version, approver);
        Ok(approved)
    }

    pub async fn get(&self, id: i64) -> DbResult<PromptTemplate> {
        self.store
            .get_template(id)
            .await?
            .ok_or_else(|| BaseError::NotFound(Some(format!("Template {} not found", id))))
    }

    /// All versions of `name`, newest first.
    pub async fn history(&self, name: &str) -> DbResult<Vec<PromptTemplate>> {
        self.store.list_templates_by_name(name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::store::MemoryStore;

    fn manager() -> PromptTemplateManager {
        PromptTemplateManager::new(Arc::new(MemoryStore::new()))
    }

    fn create_req(name: &str, content: &str) -> CreateTemplateRequest {
        CreateTemplateRequest {
            name: name.into(),
            purpose: Purpose::Sql,
            content: content.into(),
            description: None,
            created_by: Some("alice".into()),
        }
    }

    fn update_req(content: &str) -> UpdateTemplateRequest {
        UpdateTemplateRequest { content: content.into(), description: None, updated_by: None }
    }

    #[test]
    fn test_render_leaves_unknown_placeholders() {
        let vars = HashMap::from([
            ("query".to_string(), "top customers".to_string()),
            ("schema".to_string(), "users(id)".to_string()),
        ]);
        let once = render_prompt("Q: {{query}} S: {{schema}} D: {{database_type}} {{query}}", &vars);
        assert_eq!(once, "Q: top customers S: users(id) D: {{database_type}} top customers");
        assert_eq!(
            render_prompt("Q: {{query}} S: {{schema}} D: {{database_type}} {{query}}", &vars),
            once
        );
    }

    #[test]
    fn test_render_does_not_rescan_substituted_values() {
        let vars = HashMap::from([
            ("query".to_string(), "show {{schema}}".to_string()),
            ("schema".to_string(), "users(id)".to_string()),
        ]);
        for _ in 0..50 {
            let vars = vars.clone().into_iter().collect::<HashMap<_, _>>();
            assert_eq!(render_prompt("Q: {{query}}", &vars), "Q: show {{schema}}");
        }
        assert_eq!(render_prompt("S: {{schema}} Q: {{query}}", &vars), "S: users(id) Q: show {{schema}}");
    }

    #[tokio::test]
    async fn test_update_creates_new_unapproved_version() {
        let m = manager();
        let v1 = m.create(create_req("nl2sql", "v1 {{query}}")).await.unwrap();
        assert_eq!(v1.version, 1);
        assert!(!v1.is_approved);
        m.approve(v1.id, "bob").await.unwrap();

        let v2 = m.update(v1.id, update_req("v2 {{query}}")).await.unwrap();
        assert_eq!(v2.version, 2);
        assert_eq!(v2.parent_id, Some(v1.id));
        assert!(!v2.is_approved);
        assert_eq!(v2.purpose, Purpose::Sql);

        let old = m.get(v1.id).await.unwrap();
        assert_eq!(old.content, "v1 {{query}}");
        assert!(!old.is_active);
        assert!(old.is_approved);

        // The superseded approved version is no longer a candidate.
        assert!(m.find_latest_active(Purpose::Sql).await.unwrap().is_none());
        m.approve(v2.id, "bob").await.unwrap();
        assert_eq!(m.find_latest_active(Purpose::Sql).await.unwrap().unwrap().id, v2.id);
    }

    #[tokio::test]
    async fn test_superseded_version_cannot_be_updated() {
        let m = manager();
        let v1 = m.create(create_req("t", "a")).await.unwrap();
        m.update(v1.id, update_req("b")).await.unwrap();
        let err = m.update(v1.id, update_req("c")).await.unwrap_err();
        assert!(matches!(err, BaseError::ParamInvalid(_)));

        let history = m.history("t").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.iter().filter(|t| t.is_active).count(), 1);
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_name_and_empty_content() {
        let m = manager();
        m.create(create_req("dup", "x")).await.unwrap();
        assert!(matches!(m.create(create_req("dup", "y")).await, Err(BaseError::DatabaseDup(_))));
        assert!(matches!(m.create(create_req("e", "  ")).await, Err(BaseError::ParamInvalid(_))));
        assert!(matches!(m.get(42).await, Err(BaseError::NotFound(_))));
    }
}
