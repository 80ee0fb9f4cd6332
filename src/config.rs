use std::{fs, path::Path, time::Duration};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

// --- START CACHE CONFIG ---

/// Read-through cache over the configuration store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_seconds")]
    pub ttl: u64,
    #[serde(default = "default_negative_ttl_seconds")]
    pub negative_ttl: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: default_ttl_seconds(),
            negative_ttl: default_negative_ttl_seconds(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl)
    }

    pub fn negative_ttl(&self) -> Duration {
        Duration::from_secs(self.negative_ttl)
    }
}

#[derive(Debug, Deserialize, Serialize, Default)]
#[serde(deny_unknown_fields)]
pub struct PartialCacheConfig {
    pub ttl: Option<u64>,
    pub negative_ttl: Option<u64>,
}

impl PartialCacheConfig {
    fn merge_into(self, final_config: &mut CacheConfig) {
        if let Some(ttl) = self.ttl {
            final_config.ttl = ttl;
        }
        if let Some(negative_ttl) = self.negative_ttl {
            final_config.negative_ttl = negative_ttl;
        }
    }
}

// --- START PIPELINE CONFIG ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_max_tables")]
    pub max_tables: usize,
    #[serde(default = "default_max_columns_per_table")]
    pub max_columns_per_table: usize,
    /// Row cap used when no active policy supplies one.
    #[serde(default = "default_max_rows")]
    pub default_max_rows: u32,
    #[serde(default)]
    pub use_failover: bool,
    #[serde(default = "default_suggestion_count")]
    pub suggestion_count: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_tables: default_max_tables(),
            max_columns_per_table: default_max_columns_per_table(),
            default_max_rows: default_max_rows(),
            use_failover: false,
            suggestion_count: default_suggestion_count(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Default)]
#[serde(deny_unknown_fields)]
pub struct PartialPipelineConfig {
    pub max_tables: Option<usize>,
    pub max_columns_per_table: Option<usize>,
    pub default_max_rows: Option<u32>,
    pub use_failover: Option<bool>,
    pub suggestion_count: Option<usize>,
}

impl PartialPipelineConfig {
    fn merge_into(self, final_config: &mut PipelineConfig) {
        if let Some(max_tables) = self.max_tables {
            final_config.max_tables = max_tables;
        }
        if let Some(max_columns_per_table) = self.max_columns_per_table {
            final_config.max_columns_per_table = max_columns_per_table;
        }
        if let Some(default_max_rows) = self.default_max_rows {
            final_config.default_max_rows = default_max_rows;
        }
        if let Some(use_failover) = self.use_failover {
            final_config.use_failover = use_failover;
        }
        if let Some(suggestion_count) = self.suggestion_count {
            final_config.suggestion_count = suggestion_count;
        }
    }
}

// --- START DIAGNOSTIC CONFIG ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticConfig {
    #[serde(default = "default_test_prompt")]
    pub test_prompt: String,
    #[serde(default = "default_speed_prompt")]
    pub speed_prompt: String,
    #[serde(default = "default_diagnostic_max_tokens")]
    pub max_tokens: u32,
}

impl Default for DiagnosticConfig {
    fn default() -> Self {
        Self {
            test_prompt: default_test_prompt(),
            speed_prompt: default_speed_prompt(),
            max_tokens: default_diagnostic_max_tokens(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Default)]
#[serde(deny_unknown_fields)]
pub struct PartialDiagnosticConfig {
    pub test_prompt: Option<String>,
    pub speed_prompt: Option<String>,
    pub max_tokens: Option<u32>,
}

impl PartialDiagnosticConfig {
    fn merge_into(self, final_config: &mut DiagnosticConfig) {
        if let Some(test_prompt) = self.test_prompt {
            final_config.test_prompt = test_prompt;
        }
        if let Some(speed_prompt) = self.speed_prompt {
            final_config.speed_prompt = speed_prompt;
        }
        if let Some(max_tokens) = self.max_tokens {
            final_config.max_tokens = max_tokens;
        }
    }
}

// --- START SCHEMA SERVICE CONFIG ---

/// Where table/column metadata and label translations are fetched from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaServiceConfig {
    #[serde(default = "default_schema_service_url")]
    pub url: String,
    #[serde(default = "default_schema_service_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for SchemaServiceConfig {
    fn default() -> Self {
        Self {
            url: default_schema_service_url(),
            timeout_ms: default_schema_service_timeout_ms(),
        }
    }
}

impl SchemaServiceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Default)]
#[serde(deny_unknown_fields)]
pub struct PartialSchemaServiceConfig {
    pub url: Option<String>,
    pub timeout_ms: Option<u64>,
}

impl PartialSchemaServiceConfig {
    fn merge_into(self, final_config: &mut SchemaServiceConfig) {
        if let Some(url) = self.url {
            final_config.url = url;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            final_config.timeout_ms = timeout_ms;
        }
    }
}

fn default_ttl_seconds() -> u64 {
    30
}

fn default_negative_ttl_seconds() -> u64 {
    10
}

fn default_max_tables() -> usize {
    30
}

fn default_max_columns_per_table() -> usize {
    40
}

fn default_max_rows() -> u32 {
    1000
}

fn default_suggestion_count() -> usize {
    5
}

fn default_test_prompt() -> String {
    "Reply with the single word: pong".to_string()
}

fn default_speed_prompt() -> String {
    "Count from 1 to 20, separated by spaces.".to_string()
}

fn default_diagnostic_max_tokens() -> u32 {
    64
}

fn default_schema_service_url() -> String {
    "http://127.0.0.1:8080/api/schema".to_string()
}

fn default_schema_service_timeout_ms() -> u64 {
    10_000
}

// Used for deserializing user-provided config files where all fields are optional.
#[derive(Debug, Deserialize, Serialize, Default)]
#[serde(deny_unknown_fields)]
pub struct PartialConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub base_path: Option<String>,
    pub db_url: Option<String>,
    pub proxy: Option<String>,
    pub log_level: Option<String>,
    pub cache: Option<PartialCacheConfig>,
    pub pipeline: Option<PartialPipelineConfig>,
    pub diagnostic: Option<PartialDiagnosticConfig>,
    pub schema_service: Option<PartialSchemaServiceConfig>,
}

impl PartialConfig {
    /// Merges the fields of this partial config into a final config, overwriting existing values.
    fn merge_into(self, final_config: &mut FinalConfig) {
        if let Some(host) = self.host { final_config.host = host; }
        if let Some(port) = self.port { final_config.port = port; }
        if let Some(base_path) = self.base_path { final_config.base_path = base_path; }
        if let Some(db_url) = self.db_url { final_config.db_url = db_url; }
        if let Some(proxy) = self.proxy { final_config.proxy = Some(proxy); }
        if let Some(log_level) = self.log_level { final_config.log_level = log_level; }
        if let Some(cache) = self.cache {
            cache.merge_into(&mut final_config.cache)
        }
        if let Some(pipeline) = self.pipeline {
            pipeline.merge_into(&mut final_config.pipeline)
        }
        if let Some(diagnostic) = self.diagnostic {
            diagnostic.merge_into(&mut final_config.diagnostic)
        }
        if let Some(schema_service) = self.schema_service {
            schema_service.merge_into(&mut final_config.schema_service)
        }
    }
}

// The fully resolved configuration used by the application.
// This is also the format for the default configuration file.
#[derive(Debug, Deserialize, Serialize)]
pub struct FinalConfig {
    pub host: String,
    pub port: u16,
    pub base_path: String,
    pub db_url: String,
    pub proxy: Option<String>,
    pub log_level: String,
    pub cache: CacheConfig,
    pub pipeline: PipelineConfig,
    pub diagnostic: DiagnosticConfig,
    pub schema_service: SchemaServiceConfig,
}

impl Default for FinalConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8010,
            base_path: "/nl2sql".to_string(),
            db_url: "./storage/sqlite.db".to_string(),
            proxy: None,
            log_level: "info".to_string(),
            cache: CacheConfig::default(),
            pipeline: PipelineConfig::default(),
            diagnostic: DiagnosticConfig::default(),
            schema_service: SchemaServiceConfig::default(),
        }
    }
}

fn get_env_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn get_config_from_env() -> PartialConfig {
    PartialConfig {
        host: get_env_var("HOST"),
        port: get_env_var("PORT"),
        base_path: get_env_var("BASE_PATH"),
        db_url: get_env_var("DB_URL"),
        proxy: get_env_var("PROXY"),
        log_level: get_env_var("LOG_LEVEL"),
        cache: None,
        pipeline: None,
        diagnostic: None,
        schema_service: get_env_var::<String>("SCHEMA_SERVICE_URL").map(|url| {
            PartialSchemaServiceConfig {
                url: Some(url),
                timeout_ms: None,
            }
        }),
    }
}

pub static CONFIG: Lazy<FinalConfig> = Lazy::new(|| {
    let default_config_path = Path::new("config.default.yaml");
    let local_config_path = Path::new("config.local.yaml");

    // Local overrides win over config.yaml when both exist.
    let user_config_path = if local_config_path.exists() {
        local_config_path
    } else {
        Path::new("config.yaml")
    };

    let mut effective_default_config = FinalConfig::default();

    // If a default config file exists, load it as partial and merge it over the programmatic defaults.
    if default_config_path.exists() {
        if let Ok(config_str) = fs::read_to_string(default_config_path) {
            let file_defaults: PartialConfig = serde_yaml::from_str(&config_str)
                .unwrap_or_else(|e| panic!("Failed to parse default configuration file at {:?}: {}", default_config_path, e));

            file_defaults.merge_into(&mut effective_default_config);
        }
    }

    // Write the (potentially updated) defaults back so new fields show up in config.default.yaml.
    let yaml_str = serde_yaml::to_string(&effective_default_config)
        .unwrap_or_else(|err| panic!("Failed to serialize default configuration: {}", err));
    fs::write(default_config_path, yaml_str)
        .unwrap_or_else(|err| panic!("Failed to write default configuration file: {}", err));

    let mut final_config = effective_default_config;

    // Load the user's config if it exists. It's optional and overrides the defaults.
    if user_config_path.exists() {
        if let Ok(config_str) = fs::read_to_string(user_config_path) {
            let user_config: PartialConfig = serde_yaml::from_str(&config_str)
                .unwrap_or_else(|e| panic!("Failed to parse user configuration file at {:?}: {}", user_config_path, e));

            user_config.merge_into(&mut final_config);
        }
    }

    // Environment variables have the highest priority.
    get_config_from_env().merge_into(&mut final_config);

    final_config
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_overrides_only_present_fields() {
        let mut config = FinalConfig::default();
        let partial: PartialConfig = serde_yaml::from_str(
            r#"
port: 9100
pipeline:
  default_max_rows: 250
schema_service:
  url: http://schema.internal/api
"#,
        )
        .unwrap();

        partial.merge_into(&mut config);

        assert_eq!(config.port, 9100);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.pipeline.default_max_rows, 250);
        assert_eq!(config.pipeline.max_tables, default_max_tables());
        assert_eq!(config.schema_service.url, "http://schema.internal/api");
        assert_eq!(config.schema_service.timeout_ms, default_schema_service_timeout_ms());
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let result = serde_yaml::from_str::<PartialConfig>("cache:\n  backend: redis\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_cache_durations() {
        let cache = CacheConfig { ttl: 5, negative_ttl: 2 };
        assert_eq!(cache.ttl(), Duration::from_secs(5));
        assert_eq!(cache.negative_ttl(), Duration::from_secs(2));
    }
}
