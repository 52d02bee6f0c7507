//! Stderr logging for the command-line tools.
//!
//! The `-v` count picks the level: none for info, one for debug, two or more
//! for trace. Above info every line also names the module that logged it, so
//! detector and calibration output can be told apart.

use std::fmt;
use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{Level, LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::EnvFilter;

struct VerbosityLogger {
    level: LevelFilter,
    started: Instant,
}

impl Log for VerbosityLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let target = (self.level > LevelFilter::Info).then(|| record.target());
        let line = format_line(
            self.started.elapsed().as_secs_f64(),
            record.level(),
            target,
            record.args(),
        );
        let _ = writeln!(std::io::stderr().lock(), "{line}");
    }

    fn flush(&self) {}
}

static LOGGER: OnceLock<VerbosityLogger> = OnceLock::new();

fn level_for(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn format_line(elapsed: f64, level: Level, target: Option<&str>, args: &fmt::Arguments) -> String {
    match target {
        Some(target) => format!("[{elapsed:7.3}s {level:>5} {target}] {args}"),
        None => format!("[{elapsed:7.3}s {level:>5}] {args}"),
    }
}

/// Install the stderr logger for a `-v` count. Only the first call installs;
/// later ones keep the existing logger.
pub fn init_from_verbosity(verbose: u8) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_some() {
        return Ok(());
    }
    let level = level_for(verbose);
    let logger = LOGGER.get_or_init(|| VerbosityLogger {
        level,
        started: Instant::now(),
    });
    log::set_logger(logger)?;
    log::set_max_level(level);
    Ok(())
}

/// Install a tracing subscriber that reports closed spans. `RUST_LOG` wins
/// over the `-v` count when set.
#[cfg(feature = "tracing")]
pub fn init_tracing(verbose: u8, json: bool) {
    let default = level_for(verbose).to_string().to_lowercase();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE);
    let _ = if json {
        builder.json().flatten_event(true).finish().try_init()
    } else {
        builder
            .with_timer(tracing_subscriber::fmt::time::Uptime::default())
            .finish()
            .try_init()
    };
}
