use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::config::DiagnosticConfig;
use crate::controller::BaseError;
use crate::database::model::Model;
use crate::database::provider::Provider;
use crate::database::DbResult;
use crate::service::client::{ChatMessage, ChatRequest, ClientFactory, CompletionClient};
use crate::service::store::{sort_by_priority, ConfigStore};
use cyder_tools::log::{debug, error, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticTest {
    Connection,
    ModelList,
    ChatCompletion,
    Streaming,
    GenerationSpeed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestResult {
    pub test: DiagnosticTest,
    pub status: TestStatus,
    pub latency_ms: u64,
    pub details: Option<String>,
    pub error: Option<String>,
}

impl TestResult {
    fn pass(test: DiagnosticTest, started: Instant, details: String) -> Self {
        TestResult {
            test,
            status: TestStatus::Passed,
            latency_ms: started.elapsed().as_millis() as u64,
            details: Some(details),
            error: None,
        }
    }

    fn fail(test: DiagnosticTest, started: Instant, error: String) -> Self {
        TestResult {
            test,
            status: TestStatus::Failed,
            latency_ms: started.elapsed().as_millis() as u64,
            details: None,
            error: Some(error),
        }
    }

    pub fn passed(&self) -> bool {
        self.status == TestStatus::Passed
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Failed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderDiagnostic {
    pub provider_id: i64,
    pub provider_name: String,
    pub status: HealthStatus,
    pub tests: Vec<TestResult>,
    pub discovered_model: Option<String>,
    pub tokens_per_second: Option<f64>,
    pub total_latency_ms: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub provider_id: i64,
    pub provider_name: String,
    pub healthy: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthReport {
    pub overall_healthy: bool,
    pub providers: Vec<ProviderHealth>,
    pub checked_at: i64,
}

/// Zero failures is healthy, a mix is degraded, and nothing passing (or
/// nothing run) is failed.
pub fn aggregate_status(tests: &[TestResult]) -> HealthStatus {
    let passed = tests.iter().filter(|t| t.passed()).count();
    if passed == 0 {
        HealthStatus::Failed
    } else if passed == tests.len() {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    }
}

/// Picks the model id the chat tests should use: a configured model that the
/// backend actually lists, else whatever it lists first, else a configured id.
fn discover_model(listed: &[String], configured: &[Model]) -> Option<String> {
    configured
        .iter()
        .find(|m| listed.iter().any(|id| id == &m.model_id))
        .map(|m| m.model_id.clone())
        .or_else(|| listed.first().cloned())
        .or_else(|| configured.first().map(|m| m.model_id.clone()))
}

#[derive(Clone)]
pub struct DiagnosticEngine {
    store: Arc<dyn ConfigStore>,
    factory: Arc<dyn ClientFactory>,
    config: DiagnosticConfig,
}

impl DiagnosticEngine {
    pub fn new(store: Arc<dyn ConfigStore>, factory: Arc<dyn ClientFactory>, config: DiagnosticConfig) -> Self {
        DiagnosticEngine { store, factory, config }
    }

    /// Connection probe: the provider answers its model-list endpoint.
    pub async fn probe(&self, provider: &Provider) -> TestResult {
        let client = self.factory.build_client(provider);
        Self::connection_test(client.as_ref()).await
    }

    async fn connection_test(client: &dyn CompletionClient) -> TestResult {
        let started = Instant::now();
        match client.list_models().await {
            Ok(models) => TestResult::pass(
                DiagnosticTest::Connection,
                started,
                format!("reachable, {} model(s) advertised", models.len()),
            ),
            Err(e) => TestResult::fail(DiagnosticTest::Connection, started, e.to_string()),
        }
    }

    async fn configured_models(&self, provider_id: i64) -> Vec<Model> {
        match self.store.list_active_models().await {
            Ok(models) => models.into_iter().filter(|m| m.provider_id == provider_id).collect(),
            Err(e) => {
                warn!("Diagnostics could not load models for provider {}: {}", provider_id, e);
                Vec::new()
            }
        }
    }

    fn chat_request(&self, model: &str, prompt: &str, stream: bool) -> ChatRequest {
        ChatRequest {
            model: model.to_string(),
            messages: vec![ChatMessage::user(prompt)],
            max_tokens: Some(self.config.max_tokens),
            temperature: Some(0.0),
            stream,
            ..Default::default()
        }
    }

    pub async fn diagnose_provider(&self, provider: &Provider) -> ProviderDiagnostic {
        let overall = Instant::now();
        let client = self.factory.build_client(provider);
        let mut tests = Vec::with_capacity(5);

        let connection = Self::connection_test(client.as_ref()).await;
        let gate_open = connection.passed();
        tests.push(connection);
        if !gate_open {
            warn!("Provider '{}' failed its connection probe, skipping remaining tests", provider.name);
            return ProviderDiagnostic {
                provider_id: provider.id,
                provider_name: provider.name.clone(),
                status: aggregate_status(&tests),
                tests,
                discovered_model: None,
                tokens_per_second: None,
                total_latency_ms: overall.elapsed().as_millis() as u64,
            };
        }

        let configured = self.configured_models(provider.id).await;

        // model list
        let started = Instant::now();
        let discovered = match client.list_models().await {
            Ok(listed) if listed.is_empty() => {
                tests.push(TestResult::fail(DiagnosticTest::ModelList, started, "no models listed".to_string()));
                discover_model(&listed, &configured)
            }
            Ok(listed) => {
                let found = discover_model(&listed, &configured);
                tests.push(TestResult::pass(
                    DiagnosticTest::ModelList,
                    started,
                    format!("{} model(s), using {}", listed.len(), found.as_deref().unwrap_or("none")),
                ));
                found
            }
            Err(e) => {
                tests.push(TestResult::fail(DiagnosticTest::ModelList, started, e.to_string()));
                discover_model(&[], &configured)
            }
        };

        let model = discovered.clone().unwrap_or_default();
        let no_model = || "no usable model discovered".to_string();

        // chat completion
        let started = Instant::now();
        tests.push(if model.is_empty() {
            TestResult::fail(DiagnosticTest::ChatCompletion, started, no_model())
        } else {
            match client.chat_completion(&self.chat_request(&model, &self.config.test_prompt, false)).await {
                Ok(c) if !c.content.trim().is_empty() => TestResult::pass(
                    DiagnosticTest::ChatCompletion,
                    started,
                    crate::utils::truncate_chars(c.content.trim(), 120),
                ),
                Ok(_) => TestResult::fail(DiagnosticTest::ChatCompletion, started, "empty completion".to_string()),
                Err(e) => TestResult::fail(DiagnosticTest::ChatCompletion, started, e.to_string()),
            }
        });

        // streaming
        let started = Instant::now();
        tests.push(if model.is_empty() {
            TestResult::fail(DiagnosticTest::Streaming, started, no_model())
        } else {
            match client
                .chat_completion_stream(&self.chat_request(&model, &self.config.test_prompt, true))
                .await
            {
                Ok(s) if s.chunk_count > 0 => TestResult::pass(
                    DiagnosticTest::Streaming,
                    started,
                    format!(
                        "{} chunk(s), first after {} ms",
                        s.chunk_count,
                        s.first_chunk_ms.unwrap_or(s.total_ms)
                    ),
                ),
                Ok(_) => TestResult::fail(DiagnosticTest::Streaming, started, "stream carried no chunks".to_string()),
                Err(e) => TestResult::fail(DiagnosticTest::Streaming, started, e.to_string()),
            }
        });

        // generation speed
        let started = Instant::now();
        let mut tokens_per_second = None;
        tests.push(if model.is_empty() {
            TestResult::fail(DiagnosticTest::GenerationSpeed, started, no_model())
        } else {
            match client.chat_completion(&self.chat_request(&model, &self.config.speed_prompt, false)).await {
                Ok(c) if !c.content.trim().is_empty() => {
                    let tokens = c
                        .usage
                        .map(|u| u.completion_tokens as usize)
                        .filter(|t| *t > 0)
                        .unwrap_or_else(|| c.content.split_whitespace().count());
                    let secs = started.elapsed().as_secs_f64().max(0.001);
                    let rate = tokens as f64 / secs;
                    tokens_per_second = Some(rate);
                    TestResult::pass(
                        DiagnosticTest::GenerationSpeed,
                        started,
                        format!("{} token(s), {:.1} tokens/sec", tokens, rate),
                    )
                }
                Ok(_) => TestResult::fail(DiagnosticTest::GenerationSpeed, started, "empty completion".to_string()),
                Err(e) => TestResult::fail(DiagnosticTest::GenerationSpeed, started, e.to_string()),
            }
        });

        let status = aggregate_status(&tests);
        info!("Provider '{}' diagnosed as {:?}", provider.name, status);
        ProviderDiagnostic {
            provider_id: provider.id,
            provider_name: provider.name.clone(),
            status,
            tests,
            discovered_model: discovered,
            tokens_per_second,
            total_latency_ms: overall.elapsed().as_millis() as u64,
        }
    }

    pub async fn diagnose_provider_by_id(&self, provider_id: i64) -> DbResult<ProviderDiagnostic> {
        let provider = self
            .store
            .get_provider(provider_id)
            .await?
            .ok_or_else(|| BaseError::NotFound(Some(format!("Provider {} not found", provider_id))))?;
        Ok(self.diagnose_provider(&provider).await)
    }

    /// Runs the full battery for every active provider concurrently. Results
    /// come back in provider priority order.
    pub async fn diagnose_all_providers(&self) -> DbResult<Vec<ProviderDiagnostic>> {
        let mut providers = self.store.list_active_providers().await?;
        sort_by_priority(&mut providers);

        let handles: Vec<_> = providers
            .iter()
            .map(|provider| {
                let engine = self.clone();
                let provider = provider.clone();
                tokio::spawn(async move { engine.diagnose_provider(&provider).await })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (provider, handle) in providers.iter().zip(handles) {
            match handle.await {
                Ok(diagnostic) => results.push(diagnostic),
                Err(e) => {
                    error!("Diagnostic task for provider '{}' aborted: {}", provider.name, e);
                    let tests = vec![TestResult {
                        test: DiagnosticTest::Connection,
                        status: TestStatus::Failed,
                        latency_ms: 0,
                        details: None,
                        error: Some(format!("diagnostic task aborted: {}", e)),
                    }];
                    results.push(ProviderDiagnostic {
                        provider_id: provider.id,
                        provider_name: provider.name.clone(),
                        status: HealthStatus::Failed,
                        tests,
                        discovered_model: None,
                        tokens_per_second: None,
                        total_latency_ms: 0,
                    });
                }
            }
        }
        Ok(results)
    }

    /// Connection probe only. With no active provider the report is unhealthy.
    pub async fn health_check(&self) -> DbResult<HealthReport> {
        let mut providers = self.store.list_active_providers().await?;
        sort_by_priority(&mut providers);

        let probes = join_all(providers.iter().map(|p| self.probe(p))).await;
        let providers: Vec<ProviderHealth> = providers
            .iter()
            .zip(probes)
            .map(|(p, probe)| ProviderHealth {
                provider_id: p.id,
                provider_name: p.name.clone(),
                healthy: probe.passed(),
                latency_ms: probe.latency_ms,
                error: probe.error,
            })
            .collect();
        let overall_healthy = !providers.is_empty() && providers.iter().all(|p| p.healthy);
        debug!("Health check over {} provider(s): healthy={}", providers.len(), overall_healthy);

        Ok(HealthReport {
            overall_healthy,
            providers,
            checked_at: Utc::now().timestamp_millis(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::enum_def::Purpose;
    use crate::service::client::{test_backend, HttpClientFactory};
    use crate::service::store::MemoryStore;
    use crate::service::testing::{model, provider, Script, ScriptedFactory};

    fn engine(store: Arc<MemoryStore>, factory: ScriptedFactory) -> DiagnosticEngine {
        DiagnosticEngine::new(store, Arc::new(factory), DiagnosticConfig::default())
    }

    fn result(test: DiagnosticTest, passed: bool) -> TestResult {
        TestResult {
            test,
            status: if passed { TestStatus::Passed } else { TestStatus::Failed },
            latency_ms: 1,
            details: None,
            error: None,
        }
    }

    #[test]
    fn test_aggregate_status() {
        assert_eq!(aggregate_status(&[result(DiagnosticTest::Connection, true)]), HealthStatus::Healthy);
        assert_eq!(
            aggregate_status(&[result(DiagnosticTest::Connection, true), result(DiagnosticTest::Streaming, false)]),
            HealthStatus::Degraded
        );
        assert_eq!(aggregate_status(&[result(DiagnosticTest::Connection, false)]), HealthStatus::Failed);
        assert_eq!(aggregate_status(&[]), HealthStatus::Failed);
    }

    #[test]
    fn test_discover_prefers_configured_model_that_is_listed() {
        let mut configured = model(1, 1, Purpose::Sql);
        configured.model_id = "llama-3".into();
        let listed = vec!["sqlcoder-7b".to_string(), "llama-3".to_string()];
        assert_eq!(discover_model(&listed, &[configured.clone()]).as_deref(), Some("llama-3"));
        assert_eq!(discover_model(&listed, &[]).as_deref(), Some("sqlcoder-7b"));
        assert_eq!(discover_model(&[], &[configured]).as_deref(), Some("llama-3"));
        assert_eq!(discover_model(&[], &[]), None);
    }

    #[tokio::test]
    async fn test_failed_probe_gates_remaining_tests() {
        let store = Arc::new(MemoryStore::new());
        let factory = ScriptedFactory::new();
        let diagnostic = engine(store, factory.clone()).diagnose_provider(&provider(1, Some(1))).await;

        assert_eq!(diagnostic.tests.len(), 1);
        assert_eq!(diagnostic.tests[0].test, DiagnosticTest::Connection);
        assert_eq!(diagnostic.status, HealthStatus::Failed);
        assert_eq!(factory.chat_count(), 0);
    }

    #[tokio::test]
    async fn test_streaming_failure_degrades_provider() {
        let store = Arc::new(MemoryStore::new());
        let factory = ScriptedFactory::new();
        factory.script(1, Script { stream: false, ..Script::healthy("SELECT 1") });
        let diagnostic = engine(store, factory).diagnose_provider(&provider(1, Some(1))).await;

        assert_eq!(diagnostic.tests.len(), 5);
        assert_eq!(diagnostic.status, HealthStatus::Degraded);
        let streaming = diagnostic.tests.iter().find(|t| t.test == DiagnosticTest::Streaming).unwrap();
        assert!(!streaming.passed());
        assert_eq!(diagnostic.discovered_model.as_deref(), Some("scripted-model"));
        assert!(diagnostic.tokens_per_second.is_some());
    }

    #[tokio::test]
    async fn test_panicking_provider_does_not_abort_batch() {
        let store = Arc::new(MemoryStore::new());
        store.put_provider(provider(1, Some(1)));
        store.put_provider(provider(2, Some(2)));
        let factory = ScriptedFactory::new();
        factory.script(1, Script { panic_on_list: true, ..Script::healthy("x") });
        factory.script(2, Script::healthy("SELECT 1"));

        let results = engine(store, factory).diagnose_all_providers().await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].provider_id, 1);
        assert_eq!(results[0].status, HealthStatus::Failed);
        assert_eq!(results[0].tests.len(), 1);
        assert!(results[0].tests[0].error.as_deref().unwrap().contains("aborted"));
        assert_eq!(results[1].status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_health_check_is_and_of_probes() {
        let store = Arc::new(MemoryStore::new());
        store.put_provider(provider(1, Some(1)));
        store.put_provider(provider(2, Some(2)));
        let factory = ScriptedFactory::new();
        factory.script(1, Script::healthy("ok"));

        let e = engine(store.clone(), factory.clone());
        let report = e.health_check().await.unwrap();
        assert!(!report.overall_healthy);
        assert!(report.providers[0].healthy);
        assert!(!report.providers[1].healthy);

        factory.script(2, Script::healthy("ok"));
        assert!(e.health_check().await.unwrap().overall_healthy);

        let empty = engine(Arc::new(MemoryStore::new()), ScriptedFactory::new());
        assert!(!empty.health_check().await.unwrap().overall_healthy);
    }

    #[tokio::test]
    async fn test_full_battery_against_live_backend() {
        let backend = test_backend::spawn("SELECT 1;", 0).await;
        let store = Arc::new(MemoryStore::new());
        let mut p = provider(7, Some(1));
        p.base_url = backend.base_url.clone();
        store.put_provider(p.clone());
        let mut m = model(70, 7, Purpose::Sql);
        m.model_id = "llama-3".into();
        store.put_model(m);

        let e = DiagnosticEngine::new(store, Arc::new(HttpClientFactory::default()), DiagnosticConfig::default());
        let diagnostic = e.diagnose_provider(&p).await;
        assert_eq!(diagnostic.status, HealthStatus::Healthy, "{:?}", diagnostic.tests);
        assert_eq!(diagnostic.discovered_model.as_deref(), Some("llama-3"));

        assert!(matches!(e.diagnose_provider_by_id(999).await, Err(BaseError::NotFound(_))));
    }
}
