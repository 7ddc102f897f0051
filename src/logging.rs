//! Stderr logger configured from `RINGSYNC_LOG`.
//!
//! The variable holds a default level and optional per-module overrides,
//! e.g. `info,ringsync::link=debug,ringsync::store=warn`.

use std::env;
use std::sync::OnceLock;

use chrono::Local;
use log::{LevelFilter, Metadata, Record};

/// Environment variable selecting log levels.
pub const LOG_ENV: &str = "RINGSYNC_LOG";

/// Default level plus per-target overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    default: LevelFilter,
    targets: Vec<(String, LevelFilter)>,
}

impl Default for LogFilter {
    fn default() -> Self {
        Self {
            default: LevelFilter::Info,
            targets: Vec::new(),
        }
    }
}

impl LogFilter {
    /// Parse `level` and `target=level` entries separated by commas.
    /// Entries that do not parse are skipped.
    pub fn parse(spec: &str) -> Self {
        let mut filter = Self::default();
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            match entry.split_once('=') {
                Some((target, level)) => {
                    if let Ok(level) = level.trim().parse() {
                        filter.targets.push((target.trim().to_string(), level));
                    }
                }
                None => {
                    if let Ok(level) = entry.parse() {
                        filter.default = level;
                    }
                }
            }
        }
        filter
    }

    /// Level for `target`; the longest matching module prefix wins.
    pub fn level_for(&self, target: &str) -> LevelFilter {
        self.targets
            .iter()
            .filter(|(prefix, _)| {
                target == prefix
                    || target
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| rest.starts_with("::"))
            })
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, level)| *level)
            .unwrap_or(self.default)
    }

    pub fn max_level(&self) -> LevelFilter {
        self.targets
            .iter()
            .map(|(_, level)| *level)
            .fold(self.default, Ord::max)
    }
}

static FILTER: OnceLock<LogFilter> = OnceLock::new();

struct StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        FILTER
            .get()
            .is_some_and(|f| metadata.level() <= f.level_for(metadata.target()))
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!(
                "{} {:<5} {} - {}",
                Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

/// Install the stderr logger. Without `RINGSYNC_LOG` everything at `info`
/// and above is printed.
pub fn init_logging() {
    let filter = env::var(LOG_ENV)
        .map(|spec| LogFilter::parse(&spec))
        .unwrap_or_default();
    let max = filter.max_level();
    if FILTER.set(filter).is_ok() {
        let _ = log::set_logger(&LOGGER).map(|()| log::set_max_level(max));
    }
}
