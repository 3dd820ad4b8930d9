//! CLI entry point for the GTFS-RT trip-update poller.
//!
//! Polls one feed once, or every feed of a config file on a fixed interval,
//! and records the outcome of each poll.

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use gtfs_rt_trip_updates::{
    config::{TripUpdateSourceConfig, UpdaterConfig},
    fetch::BasicClient,
    output::{PollRecord, append_record, print_json, print_pretty},
    source::{FileTripUpdateSource, HttpTripUpdateSource, TripUpdateSource},
};
use std::ffi::OsStr;
use std::path::Path;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "gtfs_rt_trip_updates")]
#[command(about = "Fetch trip updates from GTFS-RT feeds", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll a single feed from a file or URL once
    Once {
        /// Path to file or URL to fetch
        #[arg(value_name = "FILE_OR_URL")]
        source: String,

        /// Feed id to report the updates under
        #[arg(long, default_value = "cli")]
        feed_id: String,

        /// Extra request header as NAME:VALUE (repeatable)
        #[arg(short = 'H', long = "header", value_name = "NAME:VALUE")]
        headers: Vec<String>,

        /// Optional: CSV file to append the poll record to
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Poll every feed of a config file on its fixed interval
    Poll {
        /// JSON config file listing the feeds
        #[arg(short, long, default_value = "feeds.json")]
        config: String,

        /// Directory to write one CSV of poll records per feed
        #[arg(short, long, default_value = "polls")]
        output_dir: String,

        /// Number of polls per feed (0 = infinite)
        #[arg(short = 'n', long, default_value_t = 0)]
        num_samples: usize,
    },
    /// List the feeds of a config file
    List {
        /// JSON config file listing the feeds
        #[arg(short, long, default_value = "feeds.json")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/gtfs_rt_trip_updates.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("gtfs_rt_trip_updates.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Once {
            source,
            feed_id,
            headers,
            output,
        } => {
            let location = source;
            let source = build_source(&location, feed_id, &headers)?;
            info!(feed_id = %source.feed_id(), location = %location, "Polling feed once");

            let outcome = source.get_updates().await;
            let record = PollRecord::from_outcome(source.feed_id(), &outcome);
            print_pretty(&record);
            print_json(&record)?;

            if let Some(output) = output {
                append_record(&output, &record)?;
            }
        }
        Commands::Poll {
            config,
            output_dir,
            num_samples,
        } => {
            let config = UpdaterConfig::load(&config)?;
            poll_all_feeds(config, &output_dir, num_samples).await?;
        }
        Commands::List { config } => {
            let config = UpdaterConfig::load(&config)?;
            info!(
                total = config.feeds.len(),
                poll_interval_secs = config.poll_interval_secs,
                "Feed list loaded"
            );
            for feed in &config.feeds {
                info!(
                    feed_id = %feed.feed_id,
                    url = %feed.url,
                    extra_headers = feed.headers.len(),
                    "Feed"
                );
            }
        }
    }

    Ok(())
}

/// Whether `location` is an absolute `http` or `https` URL rather than a
/// file path. Schemes compare case-insensitively.
fn is_http_location(location: &str) -> bool {
    reqwest::Url::parse(location)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// Builds a file or HTTP source depending on the shape of `location`.
fn build_source(
    location: &str,
    feed_id: String,
    headers: &[String],
) -> Result<Box<dyn TripUpdateSource>> {
    if !is_http_location(location) {
        if !headers.is_empty() {
            warn!("Request headers are ignored for file sources");
        }
        return Ok(Box::new(FileTripUpdateSource::new(feed_id, location)));
    }

    let mut config = TripUpdateSourceConfig::new(feed_id, location);
    for header in headers {
        let (name, value) = parse_header_arg(header)?;
        config = config.with_header(name, value);
    }
    Ok(Box::new(HttpTripUpdateSource::new(config)?))
}

fn parse_header_arg(arg: &str) -> Result<(&str, &str)> {
    let (name, value) = arg
        .split_once(':')
        .ok_or_else(|| anyhow!("Header '{arg}' must have the form NAME:VALUE"))?;
    Ok((name.trim(), value.trim()))
}

/// Polls every configured feed on `config.poll_interval_secs`, one task per
/// feed, appending a record per poll to `<output_dir>/feed_id=<id>.csv`.
///
/// Each task owns its source, so every source is polled by exactly one loop.
#[tracing::instrument(skip(config), fields(feeds = config.feeds.len()))]
async fn poll_all_feeds(config: UpdaterConfig, output_dir: &str, num_samples: usize) -> Result<()> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory '{output_dir}'"))?;

    let interval = Duration::from_secs(config.poll_interval_secs);
    let timeout = Duration::from_secs(config.request_timeout_secs);

    if num_samples == 0 {
        info!(interval_secs = interval.as_secs(), "Polling infinitely. Press Ctrl+C to stop.");
    } else {
        info!(num_samples, interval_secs = interval.as_secs(), "Starting polling");
    }

    let mut tasks = vec![];

    for feed in config.feeds {
        let client = BasicClient::with_timeout(timeout)?;
        let feed_id = feed.feed_id.clone();
        let source = HttpTripUpdateSource::with_client(feed, client)
            .with_context(|| format!("Invalid configuration for feed '{feed_id}'"))?;
        let output_file = format!("{}/feed_id={}.csv", output_dir, source.feed_id());

        let feed_span = tracing::info_span!("poll_feed", feed_id = %source.feed_id());

        let task = tokio::spawn(
            async move {
                info!(source = %source, "Feed poller started");
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

                let mut sample_count = 0;
                while num_samples == 0 || sample_count < num_samples {
                    ticker.tick().await;
                    sample_count += 1;

                    let outcome = source.get_updates().await;
                    if let Some(updates) = outcome.updates() {
                        info!(
                            sample = sample_count,
                            trip_updates = updates.len(),
                            is_full_dataset = source.full_dataset_value_of_last_updates(),
                            "Feed polled"
                        );
                    } else {
                        warn!(sample = sample_count, outcome = outcome.kind(), "No result this cycle");
                    }

                    let record = PollRecord::from_outcome(source.feed_id(), &outcome);
                    if let Err(e) = append_record(&output_file, &record) {
                        error!(error = %e, "Failed to write poll record");
                    }
                }
            }
            .instrument(feed_span),
        );

        tasks.push(task);
    }

    for task in tasks {
        if let Err(e) = task.await {
            error!(error = %e, "Feed poller task failed");
        }
    }

    info!(output_dir, "Finished polling all feeds");
    Ok(())
}
