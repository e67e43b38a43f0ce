//! webimage - asynchronous image loading with a two-tier cache.
//!
//! A URL goes through the memory cache, the disk cache and finally the
//! network. Downloads are decoded by pluggable coders and written back to
//! both cache tiers. Concurrent requests for the same image share one
//! download.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Application layer containing the load manager and prefetcher.
pub mod application;
/// Domain layer containing entities, errors, ports and codec services.
pub mod domain;
/// Infrastructure layer containing cache, codec and network adapters.
pub mod infrastructure;

#[cfg(test)]
mod test_support;

/// Current version of the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = "webimage";
