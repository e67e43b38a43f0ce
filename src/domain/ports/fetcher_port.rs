//! Port definition for fetching encoded image bytes.

use bytes::Bytes;
use futures_util::stream::BoxStream;
use reqwest::Url;

use crate::domain::entities::FetchPriority;
use crate::domain::errors::ImageError;

/// Stream of fetch progress. Dropping it cancels the fetch.
pub type FetchStream = BoxStream<'static, Result<FetchChunk, ImageError>>;

/// A request for the bytes behind a URL.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Resource to fetch.
    pub url: Url,
    /// Scheduling priority.
    pub priority: FetchPriority,
    /// Attach the bytes received so far to every chunk, not just the last.
    pub progressive: bool,
    /// Extra HTTP status codes to accept, on top of 2xx.
    pub acceptable_status_codes: Option<Vec<u16>>,
    /// Content-type allowlist; `None` accepts everything.
    pub acceptable_content_types: Option<Vec<String>>,
}

impl FetchRequest {
    /// Creates a normal-priority, non-progressive request.
    #[must_use]
    pub const fn new(url: Url) -> Self {
        Self {
            url,
            priority: FetchPriority::Normal,
            progressive: false,
            acceptable_status_codes: None,
            acceptable_content_types: None,
        }
    }

    /// Returns true if `status` is 2xx or explicitly accepted.
    #[must_use]
    pub fn accepts_status(&self, status: u16) -> bool {
        (200..300).contains(&status)
            || self
                .acceptable_status_codes
                .as_ref()
                .is_some_and(|codes| codes.contains(&status))
    }

    /// Returns true if `content_type` passes the allowlist.
    ///
    /// Parameters are ignored and `type/*` entries match any subtype. A missing
    /// content type only passes when there is no allowlist.
    #[must_use]
    pub fn accepts_content_type(&self, content_type: Option<&str>) -> bool {
        let Some(allowed) = &self.acceptable_content_types else {
            return true;
        };
        let Some(content_type) = content_type else {
            return false;
        };
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        allowed.iter().any(|pattern| {
            let pattern = pattern.to_ascii_lowercase();
            pattern
                .strip_suffix("/*")
                .map_or(pattern == essence, |major| {
                    essence.split('/').next() == Some(major)
                })
        })
    }
}

/// One step of fetch progress.
#[derive(Debug, Clone)]
pub struct FetchChunk {
    /// Bytes received so far.
    pub received: u64,
    /// Total size, if the server announced it.
    pub expected: Option<u64>,
    /// Everything received so far; always present on the final chunk.
    pub data: Option<Bytes>,
    /// True on the last chunk.
    pub finished: bool,
}

/// Source of encoded image bytes, usually the network.
pub trait ImageFetcher: Send + Sync {
    /// Returns true if this fetcher can handle `url`.
    fn can_fetch(&self, _url: &Url) -> bool {
        true
    }

    /// Starts fetching. The stream ends after the finished chunk or an error.
    fn fetch(&self, request: FetchRequest) -> FetchStream;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures_util::stream;
    use parking_lot::Mutex;
    use tokio::sync::watch;

    use crate::domain::errors::NetworkErrorKind;

    /// Canned response for a URL.
    #[derive(Debug, Clone)]
    pub enum MockResponse {
        /// Serve `data` split into `chunks` pieces.
        Body { data: Bytes, chunks: usize },
        /// Fail with the given error.
        Failure(ImageError),
    }

    struct CancelProbe {
        finished: bool,
        cancels: Arc<AtomicUsize>,
    }

    impl Drop for CancelProbe {
        fn drop(&mut self) {
            if !self.finished {
                self.cancels.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    struct MockState {
        gate: Option<watch::Receiver<bool>>,
        response: MockResponse,
        sent: usize,
        probe: CancelProbe,
    }

    /// Mock fetcher for testing.
    ///
    /// Counts fetches and cancellations. While held, fetches wait before
    /// producing their first chunk.
    pub struct MockFetcher {
        responses: Mutex<HashMap<String, MockResponse>>,
        requests: Mutex<Vec<FetchRequest>>,
        cancels: Arc<AtomicUsize>,
        gate: watch::Sender<bool>,
    }

    impl MockFetcher {
        /// Creates a mock with no responses and an open gate.
        pub fn new() -> Self {
            let (gate, _) = watch::channel(true);
            Self {
                responses: Mutex::new(HashMap::new()),
                requests: Mutex::new(Vec::new()),
                cancels: Arc::new(AtomicUsize::new(0)),
                gate,
            }
        }

        /// Serves `data` for `url` in one chunk.
        pub fn respond(&self, url: &str, data: impl Into<Bytes>) {
            self.respond_in_chunks(url, data, 1);
        }

        /// Serves `data` for `url` in `chunks` pieces.
        pub fn respond_in_chunks(&self, url: &str, data: impl Into<Bytes>, chunks: usize) {
            self.responses.lock().insert(
                url.to_owned(),
                MockResponse::Body {
                    data: data.into(),
                    chunks,
                },
            );
        }

        /// Fails fetches of `url` with `error`.
        pub fn fail(&self, url: &str, error: ImageError) {
            self.responses
                .lock()
                .insert(url.to_owned(), MockResponse::Failure(error));
        }

        /// Makes new and waiting fetches block.
        pub fn hold(&self) {
            self.gate.send_replace(false);
        }

        /// Lets blocked fetches proceed.
        pub fn release(&self) {
            self.gate.send_replace(true);
        }

        /// Total fetches started.
        pub fn fetch_count(&self) -> usize {
            self.requests.lock().len()
        }

        /// Fetches started for `url`.
        pub fn fetch_count_for(&self, url: &str) -> usize {
            self.requests
                .lock()
                .iter()
                .filter(|r| r.url.as_str() == url)
                .count()
        }

        /// Fetch streams dropped before finishing.
        pub fn cancel_count(&self) -> usize {
            self.cancels.load(Ordering::SeqCst)
        }

        /// The most recent request.
        pub fn last_request(&self) -> Option<FetchRequest> {
            self.requests.lock().last().cloned()
        }
    }

    impl Default for MockFetcher {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ImageFetcher for MockFetcher {
        fn fetch(&self, request: FetchRequest) -> FetchStream {
            let response = self
                .responses
                .lock()
                .get(request.url.as_str())
                .cloned()
                .unwrap_or_else(|| {
                    MockResponse::Failure(ImageError::network(
                        NetworkErrorKind::Status(404),
                        "HTTP 404 Not Found",
                    ))
                });
            self.requests.lock().push(request);

            let state = MockState {
                gate: Some(self.gate.subscribe()),
                response,
                sent: 0,
                probe: CancelProbe {
                    finished: false,
                    cancels: self.cancels.clone(),
                },
            };

            Box::pin(stream::unfold(state, |mut state| async move {
                if let Some(mut gate) = state.gate.take() {
                    let _ = gate.wait_for(|open| *open).await.map(|_| ());
                }
                if state.probe.finished {
                    return None;
                }
                match state.response.clone() {
                    MockResponse::Failure(error) => {
                        state.probe.finished = true;
                        Some((Err(error), state))
                    }
                    MockResponse::Body { data, chunks } => {
                        let chunks = chunks.max(1);
                        state.sent += 1;
                        let end = data.len() * state.sent / chunks;
                        let finished = state.sent >= chunks;
                        state.probe.finished = finished;
                        let chunk = FetchChunk {
                            received: end as u64,
                            expected: Some(data.len() as u64),
                            data: Some(data.slice(..end)),
                            finished,
                        };
                        Some((Ok(chunk), state))
                    }
                }
            }))
        }
    }
}
