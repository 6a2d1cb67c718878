//! Logging initialisation
//!
//! Log records go to stdout with coloured level tags, and to the session's log file without
//! colour. Every record is stamped with the seconds elapsed since the session epoch. Debug and
//! trace records also carry their target, so per-cycle output can be traced back to its module.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use colored::{ColoredString, Colorize};
use log::{info, Level, Record};
use std::fmt;
use thiserror::Error;

// Internal imports
use crate::session::{self, Session};

// Re-exports
pub use log::LevelFilter;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors associated with initialising the logger.
#[derive(Debug, Error)]
pub enum LoggerInitError {
    #[error("The minimum log level must include INFO, found `{0}`")]
    InvalidMinLogLevel(LevelFilter),

    #[error("Error opening the log file: {0}")]
    LogFileInitError(std::io::Error),

    #[error("A logger has already been set: {0}")]
    FernInitError(log::SetLoggerError),
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Initialise the logger for this execution.
///
/// `module_levels` overrides the level of individual log targets, for example to silence the
/// sweep tracker while keeping trace output elsewhere.
///
/// Must be called once only, after the session has been created. `min_level` must be at least
/// `Info`.
pub fn logger_init(
    min_level: LevelFilter,
    module_levels: &[(&'static str, LevelFilter)],
    session: &Session,
) -> Result<(), LoggerInitError> {
    if min_level < Level::Info {
        return Err(LoggerInitError::InvalidMinLogLevel(min_level));
    }

    let log_file = fern::log_file(&session.log_file_path)
        .map_err(LoggerInitError::LogFileInitError)?;

    let stdout = fern::Dispatch::new()
        .format(|out, message, record| write_record(out, message, record, true))
        .chain(std::io::stdout());

    let file = fern::Dispatch::new()
        .format(|out, message, record| write_record(out, message, record, false))
        .chain(log_file);

    module_levels
        .iter()
        .fold(fern::Dispatch::new().level(min_level), |d, (target, level)| {
            d.level_for(*target, *level)
        })
        .chain(stdout)
        .chain(file)
        .apply()
        .map_err(LoggerInitError::FernInitError)?;

    info!("Logging initialised");
    info!("    Session epoch: {}", session.epoch);
    info!("    Log level: {:?}", min_level);
    for (target, level) in module_levels {
        info!("    Log level for {}: {:?}", target, level);
    }
    info!("    Log file path: {:?}", session.log_file_path);

    Ok(())
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn write_record(out: fern::FormatCallback, message: &fmt::Arguments, record: &Record, colour: bool) {
    let elapsed_s = session::get_elapsed_seconds();
    let tag = level_tag(record.level(), colour);

    match record.level() > Level::Info {
        true => out.finish(format_args!(
            "[{:10.6} {}] {}: {}",
            elapsed_s,
            tag,
            record.target(),
            message
        )),
        false => out.finish(format_args!("[{:10.6} {}] {}", elapsed_s, tag, message)),
    }
}

/// Get the tag shown for a log level.
fn level_tag(level: Level, colour: bool) -> ColoredString {
    let tag = match level {
        Level::Trace => "TRC",
        Level::Debug => "DBG",
        Level::Info => "INF",
        Level::Warn => "WRN",
        Level::Error => "ERR",
    };

    if !colour {
        return tag.normal();
    }

    match level {
        Level::Trace => tag.dimmed().italic(),
        Level::Debug => tag.dimmed(),
        Level::Info => tag.normal(),
        Level::Warn => tag.yellow(),
        Level::Error => tag.red().bold(),
    }
}
