use std::error::Error;
use std::fs::File;
use std::io::{IsTerminal, stdout};
use std::path::Path;

use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Log everything to `path`, without colour.
pub fn setup_logging_file(
    level: tracing::Level,
    path: &Path,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(File::create(path)?)
        .log_internal_errors(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(logging_targets(level))
        .try_init()?;
    Ok(())
}

/// Bare messages on stdout, coloured when it is a terminal.
pub fn setup_logging_stdio(level: tracing::Level) -> Result<(), Box<dyn Error + Send + Sync>> {
    let format = tracing_subscriber::fmt::format()
        .with_target(false)
        .with_line_number(false)
        .with_level(false)
        .without_time();

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_ansi(stdout().is_terminal())
        .event_format(format)
        .log_internal_errors(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(logging_targets(level))
        .try_init()?;
    Ok(())
}

fn logging_targets(level: tracing::Level) -> Targets {
    Targets::new().with_default(LevelFilter::from_level(level))
}
