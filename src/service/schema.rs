use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

use crate::config::SchemaServiceConfig;
use cyder_tools::log::{debug, warn};

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("schema service request {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("schema service returned status {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("schema service sent an unreadable payload: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type", alias = "data_type", default)]
    pub data_type: String,
    #[serde(alias = "primaryKey", default)]
    pub primary_key: bool,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableTranslation {
    #[serde(alias = "koreanName", default)]
    pub korean_name: Option<String>,
    #[serde(alias = "columnTranslations", default)]
    pub column_translations: HashMap<String, String>,
}

/// Table and column metadata for a target connection.
#[async_trait]
pub trait SchemaSource: Send + Sync {
    async fn get_tables(&self, connection_id: &str) -> Result<Vec<TableInfo>, CollaboratorError>;
    async fn get_columns(&self, connection_id: &str, table: &str) -> Result<Vec<ColumnInfo>, CollaboratorError>;
}

/// Localized labels keyed by table name.
#[async_trait]
pub trait TranslationSource: Send + Sync {
    async fn get_translations_map(
        &self,
        connection_id: &str,
    ) -> Result<HashMap<String, TableTranslation>, CollaboratorError>;
}

/// Talks to the metadata service over HTTP. Payloads may be bare JSON or
/// wrapped as `{ "code": 0, "data": ... }`.
pub struct HttpSchemaSource {
    client: Client,
    base_url: String,
}

impl HttpSchemaSource {
    pub fn new(config: &SchemaServiceConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to build schema service client ({}), using defaults", e);
                Client::new()
            });
        HttpSchemaSource {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
        }
    }

    async fn fetch<T: DeserializeOwned>(&self, path: &str) -> Result<T, CollaboratorError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("schema service GET {}", url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CollaboratorError::Transport { url: url.clone(), message: e.to_string() })?;
        if !response.status().is_success() {
            return Err(CollaboratorError::Status { url, status: response.status().as_u16() });
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| CollaboratorError::Decode(e.to_string()))?;
        let payload = match body {
            Value::Object(mut map) if map.contains_key("data") => map.remove("data").unwrap_or(Value::Null),
            other => other,
        };
        serde_json::from_value(payload).map_err(|e| CollaboratorError::Decode(e.to_string()))
    }
}

fn segment(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => (b as char).to_string(),
            _ => format!("%{:02X}", b),
        })
        .collect()
}

#[async_trait]
impl SchemaSource for HttpSchemaSource {
    async fn get_tables(&self, connection_id: &str) -> Result<Vec<TableInfo>, CollaboratorError> {
        self.fetch(&format!("/connections/{}/tables", segment(connection_id))).await
    }

    async fn get_columns(&self, connection_id: &str, table: &str) -> Result<Vec<ColumnInfo>, CollaboratorError> {
        self.fetch(&format!(
            "/connections/{}/tables/{}/columns",
            segment(connection_id),
            segment(table)
        ))
        .await
    }
}

#[async_trait]
impl TranslationSource for HttpSchemaSource {
    async fn get_translations_map(
        &self,
        connection_id: &str,
    ) -> Result<HashMap<String, TableTranslation>, CollaboratorError> {
        self.fetch(&format!("/connections/{}/translations", segment(connection_id)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Path, http::StatusCode, routing::get, Json, Router};
    use serde_json::json;

    async fn spawn_service() -> String {
        let app = Router::new()
            .route(
                "/connections/{id}/tables",
                get(|Path(id): Path<String>| async move {
                    if id == "broken" {
                        return Err(StatusCode::BAD_GATEWAY);
                    }
                    Ok(Json(json!({ "code": 0, "data": [{ "name": "users" }, { "name": "orders" }] })))
                }),
            )
            .route(
                "/connections/{id}/tables/{table}/columns",
                get(|Path((_, table)): Path<(String, String)>| async move {
                    Json(json!([
                        { "name": format!("{}_id", table), "type": "bigint", "primaryKey": true, "nullable": false },
                        { "name": "email", "type": "varchar" }
                    ]))
                }),
            )
            .route(
                "/connections/{id}/translations",
                get(|| async {
                    Json(json!({ "users": { "koreanName": "사용자", "columnTranslations": { "email": "이메일" } } }))
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn source(url: String) -> HttpSchemaSource {
        HttpSchemaSource::new(&SchemaServiceConfig { url, timeout_ms: 2_000 })
    }

    #[tokio::test]
    async fn test_reads_tables_columns_and_translations() {
        let src = source(spawn_service().await);
        let tables = src.get_tables("c1").await.unwrap();
        assert_eq!(tables.len(), 2);

        let columns = src.get_columns("c1", "users").await.unwrap();
        assert_eq!(columns[0].name, "users_id");
        assert!(columns[0].primary_key);
        assert!(!columns[0].nullable);
        assert!(columns[1].nullable);
        assert_eq!(columns[1].data_type, "varchar");

        let translations = src.get_translations_map("c1").await.unwrap();
        assert_eq!(translations["users"].korean_name.as_deref(), Some("사용자"));
        assert_eq!(translations["users"].column_translations["email"], "이메일");
    }

    #[tokio::test]
    async fn test_status_and_transport_failures() {
        let src = source(spawn_service().await);
        assert!(matches!(
            src.get_tables("broken").await,
            Err(CollaboratorError::Status { status: 502, .. })
        ));

        let dead = source("http://127.0.0.1:9".to_string());
        assert!(matches!(dead.get_tables("c1").await, Err(CollaboratorError::Transport { .. })));
    }

    #[test]
    fn test_path_segments_are_escaped() {
        assert_eq!(segment("a b/c"), "a%20b%2Fc");
        assert_eq!(segment("orders_2024"), "orders_2024");
    }
}
