//! Network fetching.

pub mod download_queue;
pub mod http_fetcher;

pub use download_queue::{DownloadPermit, DownloadQueue};
pub use http_fetcher::{FetcherConfig, HttpFetcher};
