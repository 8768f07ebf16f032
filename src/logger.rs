use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::Result;

/// Initialize logging with the specified debug level.
///
/// `filter` accepts a `Targets` directive string such as
/// `"info,bridge_terminal::service=debug"` and overrides the debug flag.
pub fn init_logging(debug: bool, filter: Option<&str>) -> Result<()> {
    let level = if debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let targets = match filter {
        Some(directives) => directives.parse::<Targets>()?,
        None => Targets::new().with_default(level),
    };

    let subscriber = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_thread_ids(debug)
                .with_level(true)
                .with_target(true)
                .with_file(debug)
                .with_line_number(debug),
        )
        .with(targets);

    // A subscriber may already be installed by an embedding application
    if subscriber.try_init().is_err() {
        tracing::debug!("Global subscriber already set, keeping existing one");
        return Ok(());
    }

    tracing::info!("Logging initialized with level: {:?}", level);
    Ok(())
}
