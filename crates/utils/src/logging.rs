//! provides logging helpers

use std::fs::File;
use std::io;
use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;

/// Destination of diagnostic output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    /// Nothing is installed, every event is dropped.
    Discard,
    Stdout,
    /// Truncated on open; falls back to stdout when it cannot be written.
    File(PathBuf),
}

impl LogTarget {
    /// Routes diagnostics according to the `--verbose` / `--log` switches.
    ///
    /// An explicit log file always wins, verbose alone means stdout and
    /// neither means silence.
    pub fn from_flags(verbose: bool, log_file: Option<PathBuf>) -> Self {
        match (log_file, verbose) {
            (Some(path), _) => LogTarget::File(path),
            (None, true) => LogTarget::Stdout,
            (None, false) => LogTarget::Discard,
        }
    }
}

#[derive(Debug)]
enum Sink {
    Stdout,
    File(File),
}

fn open_sink(target: &LogTarget) -> Option<Sink> {
    match target {
        LogTarget::Discard => None,
        LogTarget::Stdout => Some(Sink::Stdout),
        LogTarget::File(path) => match File::create(path) {
            Ok(file) => Some(Sink::File(file)),
            Err(err) => {
                eprintln!("Warning: writing to {} failed ({err})", path.display());
                Some(Sink::Stdout)
            }
        },
    }
}

/// initiate the global tracing subscriber
///
/// The returned guard flushes the non-blocking writer when dropped, so the
/// caller has to keep it alive until the process is about to exit.
pub fn init(target: &LogTarget) -> Option<WorkerGuard> {
    let sink = open_sink(target)?;

    let env_filter = filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy();

    let (writer, guard, ansi) = match sink {
        Sink::Stdout => {
            let (writer, guard) = tracing_appender::non_blocking(io::stdout());
            (writer, guard, true)
        }
        Sink::File(file) => {
            let (writer, guard) = tracing_appender::non_blocking(file);
            (writer, guard, false)
        }
    };

    let fmt_layer = layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(true)
        .with_filter(env_filter);

    registry().with(fmt_layer).init();
    Some(guard)
}
