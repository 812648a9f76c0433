//! Application state shared across all request handlers.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::Config;
use crate::db;
use crate::media::{LocalMediaStorage, MediaService, MediaSettings, MediaStorage, Reaper};
use crate::metrics::Metrics;
use crate::post::PostService;
use crate::repository::{MediaRepository, PgMediaRepository};
use crate::services::token::TokenService;

/// Application state shared across all request handlers.
///
/// Cheap to clone; all services live behind one `Arc`.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Media persistence.
    repo: Arc<dyn MediaRepository>,

    /// Media file storage.
    storage: Arc<dyn MediaStorage>,

    /// Media lifecycle service.
    media: Arc<MediaService>,

    /// Post and profile picture linking.
    posts: Arc<PostService>,

    /// Bearer token verification.
    tokens: TokenService,

    /// Prometheus metrics.
    metrics: Arc<Metrics>,
}

impl AppState {
    /// Connect to PostgreSQL, apply migrations and wire up services.
    pub async fn new(config: &Config) -> Result<Self> {
        let pool = db::create_pool(config).await?;
        db::run_migrations(&pool).await?;
        info!("database ready");

        tokio::fs::create_dir_all(&config.uploads_dir)
            .await
            .with_context(|| {
                format!(
                    "failed to create uploads directory {}",
                    config.uploads_dir.display()
                )
            })?;

        let repo: Arc<dyn MediaRepository> = Arc::new(PgMediaRepository::new(pool));
        let storage: Arc<dyn MediaStorage> = Arc::new(LocalMediaStorage::new(
            config.uploads_dir.clone(),
            config.files_url.clone(),
        ));

        Ok(Self::from_parts(
            repo,
            storage,
            config.media_settings()?,
            TokenService::new(config.jwt_secret.as_bytes()),
        ))
    }

    /// Wire up services over the given backends.
    pub fn from_parts(
        repo: Arc<dyn MediaRepository>,
        storage: Arc<dyn MediaStorage>,
        settings: MediaSettings,
        tokens: TokenService,
    ) -> Self {
        let metrics = Arc::new(Metrics::new());
        let media = Arc::new(MediaService::new(repo.clone(), storage.clone(), settings));
        let posts = Arc::new(PostService::new(
            repo.clone(),
            media.clone(),
            metrics.clone(),
        ));

        Self {
            inner: Arc::new(AppStateInner {
                repo,
                storage,
                media,
                posts,
                tokens,
                metrics,
            }),
        }
    }

    /// Get the media repository.
    pub fn repository(&self) -> &Arc<dyn MediaRepository> {
        &self.inner.repo
    }

    /// Get the media storage.
    pub fn storage(&self) -> &Arc<dyn MediaStorage> {
        &self.inner.storage
    }

    /// Get the media service.
    pub fn media(&self) -> &Arc<MediaService> {
        &self.inner.media
    }

    /// Get the post service.
    pub fn posts(&self) -> &Arc<PostService> {
        &self.inner.posts
    }

    /// Get the token service.
    pub fn tokens(&self) -> &TokenService {
        &self.inner.tokens
    }

    /// Get the metrics registry.
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.inner.metrics
    }

    /// A reaper over this state's repository and storage.
    pub fn reaper(&self) -> Reaper {
        Reaper::new(self.inner.repo.clone(), self.inner.storage.clone())
            .with_metrics(self.inner.metrics.clone())
    }

    /// Check if the persistence backend is reachable.
    pub async fn database_healthy(&self) -> bool {
        self.inner.repo.ping().await
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish()
    }
}
