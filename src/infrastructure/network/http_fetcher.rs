//! HTTP image fetcher built on `reqwest` streaming bodies.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::domain::errors::{ImageError, NetworkErrorKind};
use crate::domain::ports::{FetchChunk, FetchRequest, FetchStream, ImageFetcher};

use super::download_queue::{DownloadPermit, DownloadQueue};

/// Configuration for [`HttpFetcher`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FetcherConfig {
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Maximum concurrent downloads.
    pub max_concurrent_downloads: usize,
    /// Retries for transient failures before any body byte arrives.
    pub max_retries: u32,
    /// Pause between retries in milliseconds.
    pub retry_backoff_ms: u64,
    /// User-Agent header.
    pub user_agent: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            max_concurrent_downloads: 6,
            max_retries: 0,
            retry_backoff_ms: 500,
            user_agent: format!("{}/{}", crate::NAME, crate::VERSION),
        }
    }
}

enum FetchState {
    Start {
        client: reqwest::Client,
        queue: DownloadQueue,
        config: FetcherConfig,
        request: FetchRequest,
    },
    Streaming {
        body: BoxStream<'static, reqwest::Result<Bytes>>,
        buffer: BytesMut,
        expected: Option<u64>,
        progressive: bool,
        emitted: usize,
        url: Url,
        _permit: DownloadPermit,
    },
    Done,
}

/// Copies `buffer` for a progressive chunk once it has at least doubled
/// since the previous copy.
fn snapshot(buffer: &BytesMut, emitted: &mut usize) -> Option<Bytes> {
    if buffer.is_empty() || buffer.len() < emitted.saturating_mul(2) {
        return None;
    }
    *emitted = buffer.len();
    Some(Bytes::copy_from_slice(buffer))
}

fn classify(e: &reqwest::Error) -> ImageError {
    let kind = if e.is_timeout() {
        NetworkErrorKind::Timeout
    } else if e.is_connect() {
        NetworkErrorKind::Connect
    } else {
        NetworkErrorKind::Transport
    };
    ImageError::network(kind, format!("Request failed: {e}"))
}

/// Downloads images over HTTP(S).
///
/// Concurrency is bounded by a [`DownloadQueue`]; responses are validated
/// against the request's status and content-type rules before any body byte
/// is delivered. Dropping the returned stream aborts the transfer.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    queue: DownloadQueue,
    config: FetcherConfig,
}

impl HttpFetcher {
    /// Creates a fetcher with its own HTTP client.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn new(config: FetcherConfig) -> Result<Self, ImageError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| {
                ImageError::network(
                    NetworkErrorKind::Transport,
                    format!("Failed to create HTTP client: {e}"),
                )
            })?;
        Ok(Self::with_client(client, config))
    }

    /// Creates a fetcher over an existing client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, config: FetcherConfig) -> Self {
        Self {
            client,
            queue: DownloadQueue::new(config.max_concurrent_downloads),
            config,
        }
    }

    /// The download slot queue.
    #[must_use]
    pub const fn queue(&self) -> &DownloadQueue {
        &self.queue
    }

    async fn send_once(
        client: &reqwest::Client,
        request: &FetchRequest,
    ) -> Result<reqwest::Response, ImageError> {
        let response = client
            .get(request.url.clone())
            .send()
            .await
            .map_err(|e| classify(&e))?;

        let status = response.status();
        if !request.accepts_status(status.as_u16()) {
            return Err(ImageError::network(
                NetworkErrorKind::Status(status.as_u16()),
                format!(
                    "HTTP {}: {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown")
                ),
            ));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        if !request.accepts_content_type(content_type) {
            return Err(ImageError::network(
                NetworkErrorKind::ContentType,
                format!("Unacceptable content type: {}", content_type.unwrap_or("none")),
            ));
        }

        Ok(response)
    }

    async fn open(
        client: &reqwest::Client,
        config: &FetcherConfig,
        request: &FetchRequest,
    ) -> Result<reqwest::Response, ImageError> {
        let mut attempt = 0;
        loop {
            match Self::send_once(client, request).await {
                Err(e) if e.is_transient() && attempt < config.max_retries => {
                    attempt += 1;
                    warn!(url = %request.url, attempt, error = %e, "Retrying image download");
                    tokio::time::sleep(Duration::from_millis(config.retry_backoff_ms)).await;
                }
                result => return result,
            }
        }
    }

    async fn step(state: FetchState) -> Option<(Result<FetchChunk, ImageError>, FetchState)> {
        match state {
            FetchState::Start {
                client,
                queue,
                config,
                request,
            } => {
                let permit = queue.acquire(request.priority).await;
                debug!(url = %request.url, "Downloading image from network");
                match Self::open(&client, &config, &request).await {
                    Ok(response) => {
                        let expected = response.content_length();
                        let chunk = FetchChunk {
                            received: 0,
                            expected,
                            data: None,
                            finished: false,
                        };
                        let next = FetchState::Streaming {
                            body: response.bytes_stream().boxed(),
                            buffer: BytesMut::new(),
                            expected,
                            progressive: request.progressive,
                            emitted: 0,
                            url: request.url,
                            _permit: permit,
                        };
                        Some((Ok(chunk), next))
                    }
                    Err(e) => {
                        debug!(url = %request.url, error = %e, "Image download failed");
                        Some((Err(e), FetchState::Done))
                    }
                }
            }
            FetchState::Streaming {
                mut body,
                mut buffer,
                expected,
                progressive,
                mut emitted,
                url,
                _permit,
            } => match body.next().await {
                Some(Ok(bytes)) => {
                    buffer.extend_from_slice(&bytes);
                    let chunk = FetchChunk {
                        received: buffer.len() as u64,
                        expected,
                        data: if progressive {
                            snapshot(&buffer, &mut emitted)
                        } else {
                            None
                        },
                        finished: false,
                    };
                    trace!(url = %url, received = chunk.received, "Received image bytes");
                    let next = FetchState::Streaming {
                        body,
                        buffer,
                        expected,
                        progressive,
                        emitted,
                        url,
                        _permit,
                    };
                    Some((Ok(chunk), next))
                }
                Some(Err(e)) => Some((Err(classify(&e)), FetchState::Done)),
                None => {
                    let data = buffer.freeze();
                    debug!(url = %url, size = data.len(), "Image download finished");
                    let chunk = FetchChunk {
                        received: data.len() as u64,
                        expected,
                        data: Some(data),
                        finished: true,
                    };
                    Some((Ok(chunk), FetchState::Done))
                }
            },
            FetchState::Done => None,
        }
    }
}

impl ImageFetcher for HttpFetcher {
    fn can_fetch(&self, url: &Url) -> bool {
        matches!(url.scheme(), "http" | "https")
    }

    fn fetch(&self, request: FetchRequest) -> FetchStream {
        let state = FetchState::Start {
            client: self.client.clone(),
            queue: self.queue.clone(),
            config: self.config.clone(),
            request,
        };
        stream::unfold(state, Self::step).boxed()
    }
}
