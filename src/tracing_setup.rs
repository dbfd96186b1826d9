use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LogFormat, LoggingConfig};

/// Install the global subscriber described by `config`.
///
/// `RUST_LOG`, when set, overrides `config.level`. Installing twice is an
/// error.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let env_filter = build_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok(), &config.level)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    match config.format {
        LogFormat::Json => Registry::default()
            .with(env_filter)
            .with(
                fmt_layer
                    .json()
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .try_init(),
        LogFormat::Pretty => Registry::default()
            .with(env_filter)
            .with(fmt_layer.pretty().with_ansi(true))
            .try_init(),
    }
    .wrap_err("Failed to install tracing subscriber")?;

    tracing::info!(level = %config.level, format = ?config.format, "logging initialized");
    Ok(())
}

fn build_filter(env_override: Option<String>, level: &str) -> Result<EnvFilter> {
    if let Some(directives) = env_override.filter(|d| !d.trim().is_empty()) {
        if let Ok(filter) = EnvFilter::try_new(&directives) {
            return Ok(filter);
        }
    }
    EnvFilter::try_new(level).wrap_err_with(|| format!("Invalid log level: {level}"))
}

/// Span covering the mediation of one message.
pub fn create_message_span(api: &str, method: &str, path: &str, message_id: &str) -> tracing::Span {
    tracing::info_span!(
        "message",
        api = api,
        http.method = method,
        http.path = path,
        message.id = message_id,
    )
}
