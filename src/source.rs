//! Trip-update feed sources.
//!
//! A source performs one fetch-decode-classify cycle per [`get_updates`]
//! call and reports the result as a [`PollOutcome`]. Failures are logged and
//! folded into the outcome; nothing is retried and nothing panics.
//!
//! [`get_updates`]: TripUpdateSource::get_updates

use async_trait::async_trait;
use reqwest::Url;
use reqwest::header::HeaderMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error};

use crate::config::{DEFAULT_HEADERS, TripUpdateSourceConfig, merge_headers};
use crate::error::FeedError;
use crate::fetch::{BasicClient, HttpClient, fetch_bytes, header_map, parse_url};
use crate::gtfs_rt::feed_header::Incrementality;
use crate::gtfs_rt::{FeedMessage, TripUpdate};
use crate::parser::{ExtensionRegistry, parse_feed};

/// Result of one poll of a feed.
#[derive(Debug)]
pub enum PollOutcome {
    /// The feed decoded. `updates` may be empty.
    Success {
        updates: Vec<TripUpdate>,
        /// True when `updates` replace everything previously known for the
        /// feed, false for a differential message.
        is_full_dataset: bool,
    },
    /// The feed answered without usable data.
    Unavailable,
    /// Fetching, reading or decoding failed.
    DecodeFailed(FeedError),
}

impl PollOutcome {
    /// The decoded updates, or `None` if this cycle produced no result.
    pub fn updates(&self) -> Option<&[TripUpdate]> {
        match self {
            PollOutcome::Success { updates, .. } => Some(updates),
            _ => None,
        }
    }

    pub fn into_updates(self) -> Option<Vec<TripUpdate>> {
        match self {
            PollOutcome::Success { updates, .. } => Some(updates),
            _ => None,
        }
    }

    pub fn is_full_dataset(&self) -> Option<bool> {
        match self {
            PollOutcome::Success {
                is_full_dataset, ..
            } => Some(*is_full_dataset),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PollOutcome::Success { .. })
    }

    /// Short label for logs and records.
    pub fn kind(&self) -> &'static str {
        match self {
            PollOutcome::Success { .. } => "success",
            PollOutcome::Unavailable => "unavailable",
            PollOutcome::DecodeFailed(_) => "decode_failed",
        }
    }
}

/// A source of GTFS-RT trip updates for one feed.
///
/// One instance is meant to be polled by one scheduling loop at a time; the
/// last-dataset flag is only meaningful under that discipline. Prefer
/// [`PollOutcome::is_full_dataset`] on the outcome you hold.
#[async_trait]
pub trait TripUpdateSource: Send + Sync {
    /// Runs one fetch-decode-classify cycle.
    async fn get_updates(&self) -> PollOutcome;

    /// Whether the most recent poll represented a full dataset. `true` before
    /// the first poll and after any failed poll.
    fn full_dataset_value_of_last_updates(&self) -> bool;

    fn feed_id(&self) -> &str;
}

/// Splits a decoded message into its trip updates, in feed order, and
/// whether it is a full dataset.
///
/// Only an explicit `DIFFERENTIAL` header makes a message incremental.
pub fn classify_feed(feed: FeedMessage) -> (Vec<TripUpdate>, bool) {
    let is_full_dataset = feed.header.incrementality() != Incrementality::Differential;
    let updates = feed
        .entity
        .into_iter()
        .filter_map(|entity| entity.trip_update)
        .collect();
    (updates, is_full_dataset)
}

/// Decodes and classifies `bytes`. Callers log failures under their own
/// location field.
fn decode_updates(bytes: &[u8], registry: &ExtensionRegistry) -> Result<PollOutcome, FeedError> {
    let feed = parse_feed(bytes, registry)?;
    let entity_count = feed.entity.len();
    let (updates, is_full_dataset) = classify_feed(feed);
    debug!(
        entity_count,
        trip_updates = updates.len(),
        is_full_dataset,
        "Feed decoded"
    );
    Ok(PollOutcome::Success {
        updates,
        is_full_dataset,
    })
}

/// Polls a GTFS-RT feed over HTTP.
pub struct HttpTripUpdateSource<C = BasicClient> {
    feed_id: String,
    url: Url,
    headers: HeaderMap,
    registry: ExtensionRegistry,
    client: C,
    full_dataset: AtomicBool,
}

impl HttpTripUpdateSource<BasicClient> {
    pub fn new(config: TripUpdateSourceConfig) -> Result<Self, FeedError> {
        Self::with_client(config, BasicClient::new())
    }
}

impl<C: HttpClient> HttpTripUpdateSource<C> {
    /// Builds a source that sends its requests through `client`.
    ///
    /// Headers are merged with [`DEFAULT_HEADERS`] and validated here, once.
    /// Every known vendor extension is registered.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::InvalidUrl`] or [`FeedError::InvalidHeader`] if
    /// the configured URL or a header is not valid HTTP.
    pub fn with_client(config: TripUpdateSourceConfig, client: C) -> Result<Self, FeedError> {
        let url = parse_url(&config.url)?;
        let headers = header_map(&merge_headers(&config.headers, DEFAULT_HEADERS))?;
        Ok(Self {
            feed_id: config.feed_id,
            url,
            headers,
            registry: ExtensionRegistry::all(),
            client,
            full_dataset: AtomicBool::new(true),
        })
    }

    pub fn with_registry(mut self, registry: ExtensionRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Request headers after merging with the defaults.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

#[async_trait]
impl<C: HttpClient> TripUpdateSource for HttpTripUpdateSource<C> {
    #[tracing::instrument(skip(self), fields(feed_id = %self.feed_id))]
    async fn get_updates(&self) -> PollOutcome {
        self.full_dataset.store(true, Ordering::Relaxed);

        let body = match fetch_bytes(&self.client, &self.url, &self.headers).await {
            Ok(Some(body)) => body,
            Ok(None) => {
                error!(url = %self.url, "GTFS-RT feed did not return usable data");
                return PollOutcome::Unavailable;
            }
            Err(e) => {
                error!(url = %self.url, error = %e, "Failed to fetch GTFS-RT feed");
                return PollOutcome::DecodeFailed(e);
            }
        };

        match decode_updates(&body, &self.registry) {
            Ok(outcome) => {
                if let Some(is_full_dataset) = outcome.is_full_dataset() {
                    self.full_dataset.store(is_full_dataset, Ordering::Relaxed);
                }
                outcome
            }
            Err(e) => {
                error!(url = %self.url, error = %e, "Failed to parse GTFS-RT feed");
                PollOutcome::DecodeFailed(e)
            }
        }
    }

    fn full_dataset_value_of_last_updates(&self) -> bool {
        self.full_dataset.load(Ordering::Relaxed)
    }

    fn feed_id(&self) -> &str {
        &self.feed_id
    }
}

impl<C> fmt::Display for HttpTripUpdateSource<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HttpTripUpdateSource(feed_id={}, url={})", self.feed_id, self.url)
    }
}

/// Reads a GTFS-RT feed from a local protobuf file on every poll.
pub struct FileTripUpdateSource {
    feed_id: String,
    path: PathBuf,
    registry: ExtensionRegistry,
    full_dataset: AtomicBool,
}

impl FileTripUpdateSource {
    pub fn new(feed_id: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self {
            feed_id: feed_id.into(),
            path: path.as_ref().to_path_buf(),
            registry: ExtensionRegistry::all(),
            full_dataset: AtomicBool::new(true),
        }
    }

    pub fn with_registry(mut self, registry: ExtensionRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TripUpdateSource for FileTripUpdateSource {
    #[tracing::instrument(skip(self), fields(feed_id = %self.feed_id))]
    async fn get_updates(&self) -> PollOutcome {
        self.full_dataset.store(true, Ordering::Relaxed);
        let location = self.path.display().to_string();

        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => {
                error!(path = %location, "GTFS-RT file is empty");
                return PollOutcome::Unavailable;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                error!(path = %location, "GTFS-RT file does not exist");
                return PollOutcome::Unavailable;
            }
            Err(e) => {
                error!(path = %location, error = %e, "Failed to read GTFS-RT file");
                return PollOutcome::DecodeFailed(e.into());
            }
        };

        match decode_updates(&bytes, &self.registry) {
            Ok(outcome) => {
                if let Some(is_full_dataset) = outcome.is_full_dataset() {
                    self.full_dataset.store(is_full_dataset, Ordering::Relaxed);
                }
                outcome
            }
            Err(e) => {
                error!(path = %location, error = %e, "Failed to parse GTFS-RT file");
                PollOutcome::DecodeFailed(e)
            }
        }
    }

    fn full_dataset_value_of_last_updates(&self) -> bool {
        self.full_dataset.load(Ordering::Relaxed)
    }

    fn feed_id(&self) -> &str {
        &self.feed_id
    }
}

impl fmt::Display for FileTripUpdateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FileTripUpdateSource(feed_id={}, path={})",
            self.feed_id,
            self.path.display()
        )
    }
}
