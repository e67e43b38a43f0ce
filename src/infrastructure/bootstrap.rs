//! Wiring of the default pipeline from [`Settings`].

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::application::services::ImageManager;
use crate::application::shared;
use crate::domain::errors::ImageError;
use crate::domain::ports::CacheError;
use crate::infrastructure::codec::default_registry;
use crate::infrastructure::config::Settings;
use crate::infrastructure::image::{DiskCache, ImageCache, MemoryCache};
use crate::infrastructure::network::HttpFetcher;

/// Errors raised while assembling the pipeline.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The cache could not be created.
    #[error("cache setup failed: {0}")]
    Cache(#[from] CacheError),
    /// The HTTP client could not be created.
    #[error("fetcher setup failed: {0}")]
    Fetcher(#[from] ImageError),
}

/// A wired pipeline.
#[derive(Debug)]
pub struct Pipeline {
    /// The load manager.
    pub manager: ImageManager,
    /// The cache behind the manager.
    pub cache: Arc<ImageCache>,
    /// The memory tier, for [`MemoryCache::watch_memory_pressure`] and stats.
    pub memory: Arc<MemoryCache>,
    /// Background disk expiration, when enabled.
    pub expiration_sweep: Option<JoinHandle<()>>,
}

/// Builds a manager over a memory cache, a disk cache, the built-in coders
/// and the HTTP fetcher.
///
/// The expiration sweep starts only when an interval is configured and a
/// Tokio runtime is running.
///
/// # Errors
/// Returns error if the disk queue or the HTTP client cannot be created.
pub fn build_pipeline(settings: &Settings) -> Result<Pipeline, BootstrapError> {
    let config = settings.cache.clone();
    let coders = Arc::new(default_registry());
    let memory = Arc::new(MemoryCache::new(
        config.max_memory_cost,
        config.max_memory_count,
    ));
    let disk = Arc::new(DiskCache::new(config.disk_root(), config.disk_limits()));
    let root = disk.root().to_path_buf();
    let interval = config.expiration_interval_secs;

    let cache = Arc::new(ImageCache::with_stores(
        config,
        memory.clone(),
        disk,
        coders.clone(),
    )?);
    let fetcher = Arc::new(HttpFetcher::new(settings.network.clone())?);
    let manager = ImageManager::new(cache.clone(), fetcher, coders, settings.manager.clone());

    let expiration_sweep = if interval == 0 {
        None
    } else if tokio::runtime::Handle::try_current().is_ok() {
        Some(cache.spawn_expiration_sweep(Duration::from_secs(interval)))
    } else {
        warn!("No Tokio runtime, disk expiration sweep not started");
        None
    };

    info!(disk_root = %root.display(), "Image pipeline ready");
    Ok(Pipeline {
        manager,
        cache,
        memory,
        expiration_sweep,
    })
}

/// Builds a pipeline and installs its manager as the shared instance.
///
/// # Errors
/// Returns error if the pipeline cannot be built.
pub fn init_shared(settings: &Settings) -> Result<Pipeline, BootstrapError> {
    let pipeline = build_pipeline(settings)?;
    if shared::install(pipeline.manager.clone()).is_some() {
        warn!("Replaced existing shared image manager");
    }
    Ok(pipeline)
}
