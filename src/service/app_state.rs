use axum::Router;
use std::sync::Arc;

use crate::config::FinalConfig;
use crate::database::{DbPool, DbResult};
use crate::service::client::{ClientFactory, HttpClientFactory};
use crate::service::pipeline::Nl2SqlPipeline;
use crate::service::schema::{HttpSchemaSource, SchemaSource, TranslationSource};
use crate::service::store::{CachedStore, ConfigStore, DbStore, MemoryStore};
use cyder_tools::log::info;

pub const MEMORY_DB_URL: &str = "memory://";

pub struct AppState {
    pub store: Arc<dyn ConfigStore>,
    pub pipeline: Arc<Nl2SqlPipeline>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        factory: Arc<dyn ClientFactory>,
        schema: Arc<dyn SchemaSource>,
        translations: Arc<dyn TranslationSource>,
        config: &FinalConfig,
    ) -> Self {
        let pipeline = Nl2SqlPipeline::new(
            store.clone(),
            factory,
            schema,
            translations,
            config.pipeline.clone(),
            config.diagnostic.clone(),
        );
        AppState { store, pipeline: Arc::new(pipeline) }
    }
}

fn open_store(db_url: &str) -> DbResult<Arc<dyn ConfigStore>> {
    if db_url.starts_with(MEMORY_DB_URL) {
        info!("Using in-process configuration store");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let pool = DbPool::establish(db_url)?;
    info!("Configuration store ready");
    Ok(Arc::new(DbStore::new(pool)))
}

pub fn create_app_state(config: &FinalConfig) -> DbResult<Arc<AppState>> {
    let store: Arc<dyn ConfigStore> = Arc::new(CachedStore::new(open_store(&config.db_url)?, &config.cache));
    let schema = Arc::new(HttpSchemaSource::new(&config.schema_service));
    Ok(Arc::new(AppState::new(
        store,
        Arc::new(HttpClientFactory::new(config.proxy.clone())),
        schema.clone(),
        schema,
        config,
    )))
}

pub type StateRouter = Router<Arc<AppState>>;

pub fn create_state_router() -> StateRouter {
    Router::<Arc<AppState>>::new()
}
