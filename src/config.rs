//! Feed source configuration and request header defaults.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Headers sent with every feed request unless the feed config overrides them.
pub const DEFAULT_HEADERS: &[(&str, &str)] = &[(
    "Accept",
    "application/x-google-protobuf, application/x-protobuf, application/protobuf, application/octet-stream, */*",
)];

/// Configuration of a single HTTP trip-update feed.
///
/// `feed_id` must be unique across the feeds of one updater; downstream
/// consumers use it to route updates to the right schedule partition.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TripUpdateSourceConfig {
    pub feed_id: String,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl TripUpdateSourceConfig {
    pub fn new(feed_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            feed_id: feed_id.into(),
            url: url.into(),
            headers: HashMap::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Combines caller headers with `defaults`.
///
/// Header names are compared case-insensitively. On collision the caller's
/// entry wins, spelling included.
pub fn merge_headers(
    caller: &HashMap<String, String>,
    defaults: &[(&str, &str)],
) -> BTreeMap<String, String> {
    let mut merged: BTreeMap<String, String> = defaults
        .iter()
        .filter(|(name, _)| !caller.keys().any(|k| k.eq_ignore_ascii_case(name)))
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect();

    merged.extend(caller.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

fn default_poll_interval() -> u64 {
    60
}

fn default_request_timeout() -> u64 {
    30
}

/// Top-level configuration file for the polling CLI.
///
/// Stored as JSON:
/// ```json
/// {
///   "poll_interval_secs": 30,
///   "feeds": [
///     { "feed_id": "agency1", "url": "https://feed.example/rt", "headers": {} }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct UpdaterConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    pub feeds: Vec<TripUpdateSourceConfig>,
}

impl UpdaterConfig {
    /// Loads and validates the config from a JSON file at `path`.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{path}'"))?;
        Self::from_json(&content).with_context(|| format!("Invalid config file '{path}'"))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: UpdaterConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            bail!("poll_interval_secs must be greater than zero");
        }

        let mut seen = HashSet::new();
        for feed in &self.feeds {
            if feed.feed_id.trim().is_empty() {
                bail!("feed with url '{}' has an empty feed_id", feed.url);
            }
            if !seen.insert(feed.feed_id.as_str()) {
                bail!("duplicate feed_id '{}'", feed.feed_id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_merge_keeps_defaults_without_caller_headers() {
        let merged = merge_headers(&HashMap::new(), DEFAULT_HEADERS);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged["Accept"], DEFAULT_HEADERS[0].1);
    }

    #[test]
    fn test_merge_caller_value_wins() {
        let mut caller = HashMap::new();
        caller.insert("Accept".to_string(), "application/x-protobuf".to_string());
        caller.insert("Authorization".to_string(), "Bearer abc".to_string());

        let merged = merge_headers(&caller, DEFAULT_HEADERS);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged["Accept"], "application/x-protobuf");
        assert_eq!(merged["Authorization"], "Bearer abc");
    }

    #[test]
    fn test_merge_collision_is_case_insensitive() {
        let mut caller = HashMap::new();
        caller.insert("accept".to_string(), "*/*".to_string());

        let merged = merge_headers(&caller, DEFAULT_HEADERS);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged["accept"], "*/*");
        assert!(!merged.contains_key("Accept"));
    }

    #[test]
    fn test_merge_contains_every_caller_key_and_unshadowed_default() {
        let defaults = [("Accept", "*/*"), ("User-Agent", "updater")];
        let mut caller = HashMap::new();
        caller.insert("User-Agent".to_string(), "custom".to_string());
        caller.insert("X-Api-Key".to_string(), "secret".to_string());

        let merged = merge_headers(&caller, &defaults);

        for (k, v) in &caller {
            assert_eq!(&merged[k], v);
        }
        assert_eq!(merged["Accept"], "*/*");
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn test_load_config_from_json() {
        let json = r#"{
            "poll_interval_secs": 15,
            "feeds": [
                { "feed_id": "agency1", "url": "http://feed.example/rt" },
                { "feed_id": "agency2", "url": "http://other.example/rt",
                  "headers": { "X-Api-Key": "k" } }
            ]
        }"#;

        let config = UpdaterConfig::from_json(json).unwrap();

        assert_eq!(config.poll_interval_secs, 15);
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.feeds.len(), 2);
        assert!(config.feeds[0].headers.is_empty());
        assert_eq!(config.feeds[1].headers["X-Api-Key"], "k");
    }

    #[test]
    fn test_duplicate_feed_id_rejected() {
        let json = r#"{ "feeds": [
            { "feed_id": "a", "url": "http://x/1" },
            { "feed_id": "a", "url": "http://x/2" }
        ] }"#;
        assert!(UpdaterConfig::from_json(json).is_err());
    }

    #[test]
    fn test_empty_feed_id_rejected() {
        let json = r#"{ "feeds": [ { "feed_id": " ", "url": "http://x/1" } ] }"#;
        assert!(UpdaterConfig::from_json(json).is_err());
    }

    #[test]
    fn test_load_missing_file_errors() {
        assert!(UpdaterConfig::load("/nonexistent/feeds.json").is_err());
    }
}
