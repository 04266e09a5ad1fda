//! Tracing subscriber setup.
//!
//! Two output styles:
//! - **Pretty** for interactive runs: readable stdout with span close timings,
//!   so a slow evaluation or sync delivery shows up with its duration.
//! - **Json** for deployments: one JSON object per event on stdout and, when a
//!   log directory is set, in a daily rolling file. Fields of the enclosing
//!   span (`device_id`, `geofence`, `attempt`) are flattened into every line,
//!   so a retry warning can be grepped by device without joining spans.
//!
//! Everything is read from the environment:
//!
//! | Variable           | Meaning                                                   |
//! |--------------------|-----------------------------------------------------------|
//! | `BEACON_ENV`       | `production` or `development`; release builds default to production |
//! | `BEACON_LOG_LEVEL` | Level (`debug`) or full filter directive; `RUST_LOG` wins  |
//! | `BEACON_LOG_DIR`   | Directory for JSON log files                              |

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Dependencies that are chatty at `info`/`debug` but rarely useful here.
const QUIET_TARGETS: &str = "hyper=warn,hyper_util=warn,reqwest=warn";

/// Output style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable stdout.
    Pretty,
    /// Structured JSON lines.
    Json,
}

/// Resolved logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// Output style.
    pub format: LogFormat,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub directive: String,
    /// Where JSON files go; `None` logs to stdout only.
    pub file_dir: Option<PathBuf>,
}

impl LogSettings {
    /// Settings from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Settings from an arbitrary variable lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let production = lookup("BEACON_ENV").map_or(!cfg!(debug_assertions), |env| {
            env.trim().eq_ignore_ascii_case("production")
        });
        let directive = filter_directive(lookup("BEACON_LOG_LEVEL").as_deref());
        let file_dir = lookup("BEACON_LOG_DIR")
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from)
            .or_else(|| production.then(default_log_directory));

        Self {
            format: if production {
                LogFormat::Json
            } else {
                LogFormat::Pretty
            },
            directive,
            file_dir,
        }
    }

    fn env_filter(&self) -> anyhow::Result<EnvFilter> {
        Ok(EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&self.directive))?)
    }
}

/// A bare level gets the quiet dependency targets appended; anything that
/// already looks like a directive is used as given.
fn filter_directive(level: Option<&str>) -> String {
    match level.map(str::trim).filter(|l| !l.is_empty()) {
        None => format!("info,{QUIET_TARGETS}"),
        Some(directive) if directive.contains('=') || directive.contains(',') => {
            directive.to_string()
        }
        Some(level) => format!("{level},{QUIET_TARGETS}"),
    }
}

/// Keeps the background log writers alive. Hold it until exit so buffered
/// lines are flushed.
#[derive(Debug)]
#[must_use = "dropping the guard stops the log writers"]
pub struct LogGuard {
    _writers: Vec<WorkerGuard>,
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns an error if the filter directive is invalid, the log directory
/// cannot be created, or a subscriber is already installed.
pub fn init(settings: &LogSettings) -> anyhow::Result<LogGuard> {
    let env_filter = settings.env_filter()?;

    match settings.format {
        LogFormat::Pretty => {
            let layer = tracing_subscriber::fmt::layer()
                .pretty()
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::CLOSE);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(layer)
                .try_init()?;
            Ok(LogGuard {
                _writers: Vec::new(),
            })
        }
        LogFormat::Json => {
            let mut writers = Vec::new();

            let (stdout, guard) = tracing_appender::non_blocking(std::io::stdout());
            writers.push(guard);
            let stdout_layer = tracing_subscriber::fmt::layer()
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(false)
                .with_writer(stdout);

            let file_layer = match &settings.file_dir {
                Some(dir) => {
                    std::fs::create_dir_all(dir)?;
                    let appender = RollingFileAppender::new(Rotation::DAILY, dir, "beacon.log");
                    let (file, guard) = tracing_appender::non_blocking(appender);
                    writers.push(guard);
                    Some(
                        tracing_subscriber::fmt::layer()
                            .json()
                            .flatten_event(true)
                            .with_current_span(true)
                            .with_span_list(false)
                            .with_file(true)
                            .with_line_number(true)
                            .with_writer(file),
                    )
                }
                None => None,
            };

            tracing_subscriber::registry()
                .with(env_filter)
                .with(stdout_layer)
                .with(file_layer)
                .try_init()?;
            Ok(LogGuard { _writers: writers })
        }
    }
}

/// Platform default directory for JSON log files.
fn default_log_directory() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/beacon")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "beacon")
            .map_or_else(|| PathBuf::from("./logs"), |dirs| dirs.data_dir().join("logs"))
    }
}
