use std::path::Path;

use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer};

/// Initialize the global subscriber. Logs go to stdout, or to the configured
/// file when `path` is set.
pub fn init(max_level: Level, path: Option<&Path>) -> std::io::Result<()> {
    let filter = tracing_subscriber::filter::LevelFilter::from_level(max_level);

    match path {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .with_writer(std::sync::Mutex::new(file))
                        .with_ansi(false)
                        .with_target(true)
                        .with_filter(filter),
                )
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .with_writer(std::io::stdout)
                        .with_target(true)
                        .with_thread_names(true)
                        .with_filter(filter),
                )
                .init();
        }
    }
    Ok(())
}
