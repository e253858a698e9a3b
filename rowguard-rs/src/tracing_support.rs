//! Tracing and logging support.
//!
//! The engine emits `tracing` events at decision, narrowing and store
//! boundaries. Hosts that do not install their own subscriber can use the
//! helpers here.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Tracing output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable format with colors (default for development).
    Pretty,

    /// Compact format without colors.
    Compact,

    /// JSON format (recommended for production).
    Json,
}

/// Tracing configuration.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Log level filter.
    ///
    /// If None, uses RUST_LOG environment variable or defaults to "info".
    pub level: Option<tracing::Level>,

    /// Output format.
    pub format: TracingFormat,

    /// Include timestamps in output.
    pub timestamps: bool,

    /// Include target module names in output.
    pub target: bool,

    /// Include thread IDs in output.
    pub thread_ids: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: None,
            format: TracingFormat::Pretty,
            timestamps: true,
            target: true,
            thread_ids: false,
        }
    }
}

impl TracingConfig {
    fn filter(&self) -> EnvFilter {
        match self.level {
            Some(level) => EnvFilter::new(level.to_string()),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        }
    }

    fn layer<S>(&self) -> Box<dyn Layer<S> + Send + Sync>
    where
        S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    {
        let layer = tracing_subscriber::fmt::layer()
            .with_target(self.target)
            .with_thread_ids(self.thread_ids);

        match (self.format, self.timestamps) {
            (TracingFormat::Pretty, true) => layer.pretty().boxed(),
            (TracingFormat::Pretty, false) => layer.pretty().without_time().boxed(),
            (TracingFormat::Compact, true) => layer.compact().boxed(),
            (TracingFormat::Compact, false) => layer.compact().without_time().boxed(),
            (TracingFormat::Json, true) => layer.json().boxed(),
            (TracingFormat::Json, false) => layer.json().without_time().boxed(),
        }
    }
}

/// Initialize tracing subscriber with default settings.
///
/// Uses RUST_LOG environment variable for level filtering.
/// Defaults to "info" level if RUST_LOG is not set.
///
/// # Example
///
/// ```ignore
/// use rowguard::tracing_support::init_subscriber;
///
/// fn main() {
///     init_subscriber();
///
///     // Your application code
/// }
/// ```
///
/// # Environment Variables
///
/// - `RUST_LOG=debug` - Decisions and narrowed queries
/// - `RUST_LOG=trace` - Also skipped narrowing and bypasses
/// - `RUST_LOG=myapp=debug,rowguard=trace` - Per-module filtering
pub fn init_subscriber() {
    init_subscriber_with_config(TracingConfig::default());
}

/// Initialize tracing subscriber with custom configuration.
///
/// Does nothing if a global subscriber is already installed.
///
/// # Example
///
/// ```ignore
/// use rowguard::tracing_support::{init_subscriber_with_config, TracingConfig, TracingFormat};
///
/// fn main() {
///     let config = TracingConfig {
///         format: TracingFormat::Json,
///         timestamps: true,
///         ..Default::default()
///     };
///
///     init_subscriber_with_config(config);
/// }
/// ```
pub fn init_subscriber_with_config(config: TracingConfig) {
    let result = tracing_subscriber::registry()
        .with(config.filter())
        .with(config.layer())
        .try_init();

    if let Err(e) = result {
        tracing::debug!(error = %e, "tracing subscriber already installed");
    }
}
