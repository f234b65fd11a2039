use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ObservabilityConfig;

/// Initialize structured logging based on configuration
///
/// `RUST_LOG` wins over the configured level when set. In production (when
/// `json` is true) logs are emitted as JSON for structured ingestion;
/// otherwise they use compact single-line formatting.
///
/// # Examples
///
/// ```no_run
/// use idlease_core::{config::ObservabilityConfig, logging};
///
/// let config = ObservabilityConfig { log_level: "info".to_string(), metrics_enabled: true };
///
/// logging::init(&config, false);
/// ```
pub fn init(config: &ObservabilityConfig, json: bool) {
    let env_filter = filter(config);

    if json {
        let fmt_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_span_list(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_filter(env_filter);

        tracing_subscriber::registry().with(fmt_layer).init();
    } else {
        let fmt_layer = fmt::layer()
            .compact()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_file(false)
            .with_line_number(false)
            .with_filter(env_filter);

        tracing_subscriber::registry().with(fmt_layer).init();
    }
}

/// Build the level filter: environment first, then config, then `info`
fn filter(config: &ObservabilityConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
