use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs the stderr subscriber. `RUST_LOG` wins over `level` when set;
/// stdout stays reserved for JSON output.
pub fn init_logging(level: Level) {
    let level = level.as_str().to_ascii_lowercase();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "tech_week_scrape_lib={level},tech_week_scrape={level}"
        ))
    });

    let console_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    // A second init (tests, embedding) is not an error worth surfacing.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .try_init();
}
