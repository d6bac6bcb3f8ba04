use std::{env, sync::Arc};

use anyhow::{Context, Result};
use sqlx::{PgPool, postgres::PgPoolOptions};

use crate::{
    cache::{MemoryCache, StatusCache},
    config::Settings,
    jobs::SummaryQueue,
    llm::LlmClient,
    storage::{BlobStore, FsBlobStore},
};

/// Shared application state. The blob store, cache, and queue are
/// constructed once here and injected everywhere else.
#[derive(Clone)]
pub struct AppState {
    pool: PgPool,
    settings: Arc<Settings>,
    blob: Arc<dyn BlobStore>,
    cache: Arc<dyn StatusCache>,
    queue: SummaryQueue,
}

impl AppState {
    pub async fn new(settings: Settings) -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL env var is missing")?;

        let llm = LlmClient::from_env().context("failed to initialize LLM client")?;

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&database_url)
            .await
            .context("failed to connect to Postgres")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run database migrations")?;

        let settings = Arc::new(settings);
        let blob: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(settings.storage_root.clone()));
        let cache: Arc<dyn StatusCache> = Arc::new(MemoryCache::new());
        let queue = SummaryQueue::new(
            pool.clone(),
            blob.clone(),
            cache.clone(),
            Arc::new(llm),
            settings.clone(),
        );

        Ok(Self {
            pool,
            settings,
            blob,
            cache,
            queue,
        })
    }

    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn blob(&self) -> &dyn BlobStore {
        self.blob.as_ref()
    }

    pub fn cache(&self) -> &dyn StatusCache {
        self.cache.as_ref()
    }

    pub fn queue(&self) -> &SummaryQueue {
        &self.queue
    }
}
