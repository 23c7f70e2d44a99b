//! Tracing subscriber initialization.

use m2m_core::{ConfigError, M2mResult};
use tracing::Subscriber;
use tracing_subscriber::{
    fmt::MakeWriter,
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "m2m_client=debug,m2m_cache=debug,info";

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per event.
    #[default]
    Json,
    /// Multi-line human-readable output.
    Pretty,
}

impl LogFormat {
    /// Parse `json` or `pretty` (case-insensitive).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "pretty" => Some(Self::Pretty),
            _ => None,
        }
    }
}

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub format: LogFormat,
    /// Directive string used when `RUST_LOG` is unset or invalid.
    pub default_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            format: std::env::var("M2M_LOG_FORMAT")
                .ok()
                .and_then(|s| LogFormat::parse(&s))
                .unwrap_or_default(),
            default_filter: DEFAULT_FILTER.to_string(),
        }
    }
}

/// Formatting layer for `format`, writing through `writer`.
fn fmt_layer<S, W>(format: LogFormat, writer: W) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_writer(writer)
            .boxed(),
    }
}

/// Install the global tracing subscriber.
///
/// Log lines go to stderr so stdout stays free for command output. Call once
/// at startup; a second call fails because a subscriber is already set.
pub fn init_tracing(config: &TelemetryConfig) -> M2mResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer(config.format, std::io::stderr))
        .try_init()
        .map_err(|e| ConfigError::InvalidValue {
            field: "tracing".to_string(),
            value: format!("{:?}", config.format),
            reason: format!("Failed to init subscriber: {}", e),
        })?;

    tracing::debug!(format = ?config.format, "Tracing initialized");
    Ok(())
}
