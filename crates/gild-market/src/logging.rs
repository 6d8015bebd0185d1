use crate::config::LoggingConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the logging system based on configuration.
///
/// `RUST_LOG` overrides the configured level when set. The subscriber is
/// process-global and installed once; embedders that already installed
/// their own subscriber should skip this entirely.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("gild={}", config.level)));

    let subscriber = tracing_subscriber::registry().with(filter);

    match config.format.as_str() {
        "json" => {
            // JSON format for machine parsing
            let json_layer = fmt::layer()
                .json()
                .with_current_span(true)
                .with_line_number(true)
                .with_file(true);

            if let Some(file_path) = &config.file_output {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(file_path)?;
                let file_layer = fmt::layer().json().with_writer(file).with_ansi(false);
                subscriber.with(json_layer).with(file_layer).init();
            } else {
                subscriber.with(json_layer).init();
            }
        }
        "compact" => {
            let compact_layer = fmt::layer()
                .compact()
                .with_target(false)
                .with_line_number(false)
                .with_file(false);

            if let Some(file_path) = &config.file_output {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(file_path)?;
                let file_layer = fmt::layer().compact().with_writer(file).with_ansi(false);
                subscriber.with(compact_layer).with(file_layer).init();
            } else {
                subscriber.with(compact_layer).init();
            }
        }
        _ => {
            // Default "pretty" format; source locations only at debug/trace.
            let show_location = matches!(config.level.as_str(), "debug" | "trace");
            let pretty_layer = fmt::layer()
                .with_target(show_location)
                .with_line_number(show_location)
                .with_file(show_location);

            if let Some(file_path) = &config.file_output {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(file_path)?;
                let file_layer = fmt::layer().with_writer(file).with_ansi(false);
                subscriber.with(pretty_layer).with(file_layer).init();
            } else {
                subscriber.with(pretty_layer).init();
            }
        }
    }

    Ok(())
}
