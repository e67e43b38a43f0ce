//! Process-wide default manager.
//!
//! Nothing here is required: every component can be constructed and
//! injected directly. The shared slot only exists for callers that want a
//! single pipeline per process.

use std::sync::OnceLock;

use parking_lot::RwLock;
use tracing::debug;

use super::services::ImageManager;

static SHARED: OnceLock<RwLock<Option<ImageManager>>> = OnceLock::new();

fn slot() -> &'static RwLock<Option<ImageManager>> {
    SHARED.get_or_init(|| RwLock::new(None))
}

/// Installs `manager` as the shared instance, returning the previous one.
pub fn install(manager: ImageManager) -> Option<ImageManager> {
    slot().write().replace(manager)
}

/// The shared instance, if one is installed.
#[must_use]
pub fn shared() -> Option<ImageManager> {
    slot().read().clone()
}

/// Removes the shared instance and cancels its in-flight loads.
///
/// Returns false if nothing was installed.
pub fn shutdown_shared() -> bool {
    let Some(manager) = slot().write().take() else {
        return false;
    };
    let cancelled = manager.cancel_all();
    debug!(cancelled, "Shared image manager shut down");
    true
}
