//! Error taxonomy for fetching and decoding a GTFS-RT feed.

use thiserror::Error;

/// Errors that can occur while fetching or decoding one feed message.
///
/// A poll never returns these to its caller directly; they end up inside
/// [`PollOutcome::DecodeFailed`](crate::source::PollOutcome::DecodeFailed).
#[derive(Debug, Error)]
pub enum FeedError {
    /// Configured URL could not be parsed
    #[error("Invalid feed URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    /// Configured header name or value is not valid HTTP
    #[error("Invalid request header '{name}'")]
    InvalidHeader { name: String },
    /// Network-level error (DNS, connection, TLS, timeout, body read)
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// Local read failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Bytes are not a valid `FeedMessage`
    #[error("Protobuf decode failed: {0}")]
    Decode(#[from] prost::DecodeError),
}
