// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    env,
    io::IsTerminal,
    sync::{Arc, Mutex, Once, PoisonError},
};

use bon::Builder;
use once_cell::sync::{Lazy, OnceCell};
use serde::{Deserialize, Deserializer, Serialize, de};
use smart_default::SmartDefault;
use snafu::{OptionExt, ResultExt, Snafu};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{InitError, RollingFileAppender, Rotation},
};
use tracing_log::{LogTracer, log::SetLoggerError};
use tracing_subscriber::{
    EnvFilter, Layer, Registry, filter,
    fmt::MakeWriter,
    layer::{Layered, SubscriberExt},
    reload,
};

/// Deserializes a string value, using `Default::default()` if the string is
/// empty.
///
/// # Errors
/// Returns an error if the non-empty string does not parse as `T`.
pub fn empty_string_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    let s = String::deserialize(deserializer)?;
    if s.is_empty() {
        Ok(T::default())
    } else {
        T::deserialize(de::value::StrDeserializer::new(&s)).map_err(|e: de::value::Error| {
            de::Error::custom(format!("invalid value, expect empty string, err: {e}"))
        })
    }
}

/// The default directory name for log files when file logging is enabled.
pub const DEFAULT_LOGGING_DIR: &str = "logs";

/// Fallback filter when neither `LoggingOptions::level` nor `RUST_LOG` is
/// set.
const DEFAULT_LOG_TARGETS: &str = "info";

/// Handle for changing the level filter after initialization.
///
/// Populated by [`init_global_logging`]; see [`reload_level`].
static RELOAD_HANDLE: OnceCell<reload::Handle<filter::Targets, Registry>> = OnceCell::new();

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Invalid log level filter {level:?}"))]
    InvalidLevel {
        level:  String,
        source: filter::ParseError,
    },

    #[snafu(display("Failed to create rolling log file in {dir}"))]
    Appender { dir: String, source: InitError },

    #[snafu(display("Failed to install log compatibility layer"))]
    LogTracer { source: SetLoggerError },

    #[snafu(display("Failed to set global tracing subscriber"))]
    SetGlobal {
        source: tracing::subscriber::SetGlobalDefaultError,
    },

    #[snafu(display("Logging has not been initialized"))]
    NotInitialized,

    #[snafu(display("Failed to reload log level filter"))]
    Reload { source: reload::Error },
}

/// Configuration options for the logging system.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, SmartDefault, Builder)]
#[builder(on(String, into))]
#[serde(default)]
pub struct LoggingOptions {
    /// Directory for rotated log files. Empty disables file logging.
    #[default = ""]
    #[builder(default)]
    pub dir: String,

    /// Level filter such as `"info"` or `"info,stash_queue=debug"`. Falls back
    /// to `RUST_LOG`, then `"info"`.
    pub level: Option<String>,

    #[serde(default, deserialize_with = "empty_string_as_default")]
    #[builder(default)]
    pub log_format: LogFormat,

    /// Rotated files to keep per log stream. Files rotate hourly.
    #[default = 720]
    #[builder(default = 720)]
    pub max_log_files: usize,

    /// Also write to the console when file logging is enabled.
    #[default = true]
    #[builder(default = true)]
    pub append_stdout: bool,

    /// Send console output to stderr instead of stdout.
    #[default = false]
    #[builder(default)]
    pub stderr: bool,
}

/// Available log output formats.
#[derive(
    Clone, Debug, Copy, PartialEq, Eq, Serialize, Deserialize, Default, derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// One JSON object per event, with the current span and span list.
    #[display("json")]
    Json,

    /// Human-readable text, colored when writing to a terminal.
    #[default]
    #[display("text")]
    Text,
}

/// Initialize stdout logging with default options.
///
/// Returns the worker guards that must be kept alive for logs to flush.
pub fn init_tracing_subscriber(app_name: &str) -> Result<Vec<WorkerGuard>> {
    init_global_logging(app_name, &LoggingOptions::default())
}

static GLOBAL_UT_LOG_GUARD: Lazy<Arc<Mutex<Option<Vec<WorkerGuard>>>>> =
    Lazy::new(|| Arc::new(Mutex::new(None)));

/// Initialize logging for unit tests. Safe to call from every test.
///
/// Logs go to files under `UNITTEST_LOG_DIR` (default
/// `/tmp/__unittest_logs`) filtered by `UNITTEST_LOG_LEVEL` (default
/// `debug,sqlx=warn`).
pub fn init_default_ut_logging() {
    static START: Once = Once::new();

    START.call_once(|| {
        let mut g = GLOBAL_UT_LOG_GUARD
            .as_ref()
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let dir =
            env::var("UNITTEST_LOG_DIR").unwrap_or_else(|_| "/tmp/__unittest_logs".to_string());
        let level =
            env::var("UNITTEST_LOG_LEVEL").unwrap_or_else(|_| "debug,sqlx=warn".to_string());
        let opts = LoggingOptions {
            dir: dir.clone(),
            level: Some(level),
            append_stdout: false,
            ..Default::default()
        };

        match init_global_logging("unittest", &opts) {
            Ok(guards) => {
                *g = Some(guards);
                tracing::info!("logs dir = {}", dir);
            }
            Err(e) => eprintln!("unit test logging disabled: {e}"),
        }
    });
}

/// Install the global subscriber described by `opts`.
///
/// Only the first call in a process installs anything; later calls return
/// no guards. Rolling files are named after `app_name`, with errors also
/// written to a separate `<app_name>-err` stream.
pub fn init_global_logging(app_name: &str, opts: &LoggingOptions) -> Result<Vec<WorkerGuard>> {
    static START: Once = Once::new();
    let mut result = Ok(Vec::new());
    START.call_once(|| result = install(app_name, opts));
    result
}

/// Replace the level filter of the installed subscriber.
pub fn reload_level(level: &str) -> Result<()> {
    let targets = parse_targets(level)?;
    RELOAD_HANDLE
        .get()
        .context(NotInitializedSnafu)?
        .reload(targets)
        .context(ReloadSnafu)
}

fn parse_targets(level: &str) -> Result<filter::Targets> {
    level.parse().context(InvalidLevelSnafu { level })
}

type FilteredRegistry = Layered<reload::Layer<filter::Targets, Registry>, Registry>;
type BoxedLayer = Box<dyn Layer<FilteredRegistry> + Send + Sync>;

fn fmt_layer<W>(writer: W, format: LogFormat, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Json => tracing_subscriber::fmt::Layer::new()
            .json()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
        LogFormat::Text => tracing_subscriber::fmt::Layer::new()
            .with_writer(writer)
            .with_ansi(ansi)
            .boxed(),
    }
}

fn rolling_file(opts: &LoggingOptions, prefix: &str) -> Result<RollingFileAppender> {
    RollingFileAppender::builder()
        .rotation(Rotation::HOURLY)
        .filename_prefix(prefix)
        .max_log_files(opts.max_log_files)
        .build(&opts.dir)
        .context(AppenderSnafu { dir: &opts.dir })
}

fn install(app_name: &str, opts: &LoggingOptions) -> Result<Vec<WorkerGuard>> {
    let mut guards = vec![];
    let mut layers: Vec<BoxedLayer> = vec![];

    let file_logging = !opts.dir.is_empty();
    if opts.append_stdout || !file_logging {
        let (writer, guard) = if opts.stderr {
            tracing_appender::non_blocking(std::io::stderr())
        } else {
            tracing_appender::non_blocking(std::io::stdout())
        };
        let ansi = if opts.stderr {
            std::io::stderr().is_terminal()
        } else {
            std::io::stdout().is_terminal()
        };
        guards.push(guard);
        layers.push(fmt_layer(writer, opts.log_format, ansi));
    }

    if file_logging {
        let (writer, guard) = tracing_appender::non_blocking(rolling_file(opts, app_name)?);
        guards.push(guard);
        layers.push(fmt_layer(writer, opts.log_format, false));

        let (writer, guard) =
            tracing_appender::non_blocking(rolling_file(opts, &format!("{app_name}-err"))?);
        guards.push(guard);
        layers.push(
            fmt_layer(writer, opts.log_format, false)
                .with_filter(filter::LevelFilter::ERROR)
                .boxed(),
        );
    }

    let env_level = env::var(EnvFilter::DEFAULT_ENV).ok();
    let level = opts
        .level
        .as_deref()
        .or(env_level.as_deref())
        .unwrap_or(DEFAULT_LOG_TARGETS);
    let (dyn_filter, reload_handle) = reload::Layer::new(parse_targets(level)?);

    LogTracer::init().context(LogTracerSnafu)?;

    // Filter first so it gates every output layer.
    let subscriber = Registry::default().with(dyn_filter).with(layers);
    tracing::subscriber::set_global_default(subscriber).context(SetGlobalSnafu)?;

    // Only reachable once per process.
    let _ = RELOAD_HANDLE.set(reload_handle);
    Ok(guards)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_format_deserializes_to_default() {
        let opts: LoggingOptions =
            serde_json::from_str(r#"{"dir": "/var/log/stash", "log_format": ""}"#).unwrap();
        assert_eq!(opts.log_format, LogFormat::Text);
        assert_eq!(opts.dir, "/var/log/stash");
        assert_eq!(opts.max_log_files, 720);
        assert!(opts.append_stdout);
    }

    #[test]
    fn test_json_format_deserializes() {
        let opts: LoggingOptions = serde_json::from_str(r#"{"log_format": "json"}"#).unwrap();
        assert_eq!(opts.log_format, LogFormat::Json);
    }

    #[test]
    fn test_builder_matches_default() {
        assert_eq!(LoggingOptions::builder().build(), LoggingOptions::default());
    }

    #[test]
    fn test_invalid_level_is_rejected() {
        let err = parse_targets("info,stash=loud").unwrap_err();
        assert!(matches!(err, Error::InvalidLevel { .. }));
        assert!(parse_targets("debug,stash_queue=trace").is_ok());
    }

    #[test]
    fn test_reload_level_after_init() {
        init_default_ut_logging();
        reload_level("warn,stash_queue=debug").unwrap();
        let err = reload_level("info,stash=loud").unwrap_err();
        assert!(matches!(err, Error::InvalidLevel { .. }));
        reload_level("debug,sqlx=warn").unwrap();
    }
}
