use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::database::model::Model;
use crate::database::provider::Provider;
use crate::schema::enum_def::Purpose;
use crate::service::client::{
    ChatCompletion, ChatRequest, ClientError, ClientFactory, CompletionClient, StreamSummary, Usage,
};
use crate::service::schema::{
    CollaboratorError, ColumnInfo, SchemaSource, TableInfo, TableTranslation, TranslationSource,
};

/// How a scripted provider answers.
#[derive(Clone, Debug)]
pub struct Script {
    pub models: Option<Vec<String>>,
    pub reply: Option<String>,
    pub stream: bool,
    pub panic_on_list: bool,
}

impl Script {
    pub fn healthy(reply: &str) -> Self {
        Script {
            models: Some(vec!["scripted-model".to_string()]),
            reply: Some(reply.to_string()),
            stream: true,
            panic_on_list: false,
        }
    }

    pub fn unreachable() -> Self {
        Script { models: None, reply: None, stream: false, panic_on_list: false }
    }
}

/// Completion clients driven by per-provider scripts. Chat calls are counted
/// across every client the factory hands out.
#[derive(Clone, Default)]
pub struct ScriptedFactory {
    scripts: Arc<DashMap<i64, Script>>,
    pub chat_calls: Arc<AtomicUsize>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, provider_id: i64, script: Script) {
        self.scripts.insert(provider_id, script);
    }

    pub fn chat_count(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }
}

struct ScriptedClient {
    provider_id: i64,
    script: Script,
    chat_calls: Arc<AtomicUsize>,
}

fn refused() -> ClientError {
    ClientError::Transport { url: "scripted://".to_string(), message: "connection refused".to_string() }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn list_models(&self) -> Result<Vec<String>, ClientError> {
        if self.script.panic_on_list {
            panic!("scripted provider {} crashed", self.provider_id);
        }
        self.script.models.clone().ok_or_else(refused)
    }

    async fn chat_completion(&self, request: &ChatRequest) -> Result<ChatCompletion, ClientError> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.script.reply.clone().ok_or_else(refused)?;
        let completion_tokens = reply.split_whitespace().count() as u32;
        Ok(ChatCompletion {
            content: reply,
            model: Some(request.model.clone()),
            usage: Some(Usage { prompt_tokens: 10, completion_tokens, total_tokens: 10 + completion_tokens }),
        })
    }

    async fn chat_completion_stream(&self, request: &ChatRequest) -> Result<StreamSummary, ClientError> {
        if !self.script.stream {
            return Err(ClientError::Status { status: 501, body: "streaming unsupported".to_string() });
        }
        let reply = self.chat_completion(request).await?.content;
        Ok(StreamSummary {
            chunk_count: reply.split_whitespace().count(),
            content: reply,
            first_chunk_ms: Some(1),
            total_ms: 2,
        })
    }
}

impl ClientFactory for ScriptedFactory {
    fn build_client(&self, provider: &Provider) -> Arc<dyn CompletionClient> {
        let script = self
            .scripts
            .get(&provider.id)
            .map(|s| s.value().clone())
            .unwrap_or_else(Script::unreachable);
        Arc::new(ScriptedClient {
            provider_id: provider.id,
            script,
            chat_calls: self.chat_calls.clone(),
        })
    }
}

pub fn provider(id: i64, priority: Option<i32>) -> Provider {
    Provider {
        id,
        name: format!("provider-{}", id),
        base_url: format!("http://provider-{}.local", id),
        timeout_ms: 1_000,
        is_active: true,
        priority,
        ..Default::default()
    }
}

pub fn model(id: i64, provider_id: i64, purpose: Purpose) -> Model {
    Model {
        id,
        provider_id,
        name: format!("model-{}", id),
        model_id: "scripted-model".to_string(),
        purpose,
        max_tokens: 512,
        temperature: 0.0,
        top_p: 1.0,
        is_active: true,
        ..Default::default()
    }
}

/// Fixed schema collaborator: `users` and `orders` plus Korean labels.
#[derive(Clone, Debug, Default)]
pub struct StaticSchema {
    pub tables: Vec<(String, Vec<ColumnInfo>)>,
    pub translations: HashMap<String, TableTranslation>,
    pub translations_fail: bool,
}

impl StaticSchema {
    pub fn sample() -> Self {
        let column = |name: &str, data_type: &str, pk: bool| ColumnInfo {
            name: name.to_string(),
            data_type: data_type.to_string(),
            primary_key: pk,
            nullable: !pk,
        };
        StaticSchema {
            tables: vec![
                (
                    "users".to_string(),
                    vec![column("id", "bigint", true), column("name", "varchar", false), column("email", "varchar", false)],
                ),
                (
                    "orders".to_string(),
                    vec![column("id", "bigint", true), column("user_id", "bigint", false), column("total", "numeric", false)],
                ),
            ],
            translations: HashMap::from([(
                "users".to_string(),
                TableTranslation {
                    korean_name: Some("사용자".to_string()),
                    column_translations: HashMap::from([("email".to_string(), "이메일".to_string())]),
                },
            )]),
            translations_fail: false,
        }
    }
}

#[async_trait]
impl SchemaSource for StaticSchema {
    async fn get_tables(&self, _connection_id: &str) -> Result<Vec<TableInfo>, CollaboratorError> {
        Ok(self.tables.iter().map(|(name, _)| TableInfo { name: name.clone() }).collect())
    }

    async fn get_columns(&self, _connection_id: &str, table: &str) -> Result<Vec<ColumnInfo>, CollaboratorError> {
        Ok(self
            .tables
            .iter()
            .find(|(name, _)| name == table)
            .map(|(_, columns)| columns.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl TranslationSource for StaticSchema {
    async fn get_translations_map(
        &self,
        _connection_id: &str,
    ) -> Result<HashMap<String, TableTranslation>, CollaboratorError> {
        if self.translations_fail {
            return Err(CollaboratorError::Status { url: "static://translations".to_string(), status: 503 });
        }
        Ok(self.translations.clone())
    }
}
