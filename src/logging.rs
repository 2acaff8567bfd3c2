//! Logging
//!
//! The scanner, injector, instance loader and application context receive a
//! [`Logger`] instead of writing to a process-wide logger directly. A logger
//! is disabled by default; [`Logger::global`] forwards events to the global
//! `tracing` subscriber and [`Logger::with_dispatch`] to a specific one.
//!
//! Events use the `armature_di` target. The [`LoggingBuilder`] installs a
//! `tracing-subscriber` formatter for them.
//!
//! # Features
//!
//! - `logging` - Emit `tracing` events (default)
//! - `logging-json` - Use JSON structured output (recommended for production)
//! - `logging-pretty` - Use colorful pretty output (recommended for development)
//!
//! # Example
//!
//! ```rust,ignore
//! use armature_di::{ApplicationContext, ModuleReference, logging::{self, LogFormat}};
//!
//! let logger = logging::builder()
//!     .with_level(tracing::Level::DEBUG)
//!     .di_only()
//!     .format(LogFormat::Json)
//!     .init()?;
//!
//! let app = ApplicationContext::builder(ModuleReference::of::<AppModule>())
//!     .logger(logger)
//!     .build()
//!     .await?;
//! ```

use std::fmt;

/// Target of every event emitted by this crate
pub const LOG_TARGET: &str = "armature_di";

#[derive(Clone, Default)]
enum Sink {
    #[default]
    Disabled,
    Global,
    #[cfg(feature = "logging")]
    Dispatch(tracing::Dispatch),
}

/// Logging capability handed to the components that emit events
#[derive(Clone, Default)]
pub struct Logger {
    sink: Sink,
}

impl Logger {
    /// A logger that drops every event
    #[inline]
    pub fn disabled() -> Self {
        Self {
            sink: Sink::Disabled,
        }
    }

    /// A logger that emits to the global `tracing` subscriber
    #[inline]
    pub fn global() -> Self {
        Self { sink: Sink::Global }
    }

    /// A logger that emits to `dispatch` regardless of the global subscriber
    #[cfg(feature = "logging")]
    pub fn with_dispatch(dispatch: tracing::Dispatch) -> Self {
        Self {
            sink: Sink::Dispatch(dispatch),
        }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        !matches!(self.sink, Sink::Disabled)
    }

    /// Run `emit` against this logger's subscriber
    #[inline]
    pub fn emit(&self, emit: impl FnOnce()) {
        match &self.sink {
            Sink::Disabled => {}
            Sink::Global => emit(),
            #[cfg(feature = "logging")]
            Sink::Dispatch(dispatch) => tracing::dispatcher::with_default(dispatch, emit),
        }
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sink = match self.sink {
            Sink::Disabled => "disabled",
            Sink::Global => "global",
            #[cfg(feature = "logging")]
            Sink::Dispatch(_) => "dispatch",
        };
        f.debug_struct("Logger").field("sink", &sink).finish()
    }
}

/// Emit a `tracing` event at `$level` through a [`Logger`]
macro_rules! log_event {
    ($logger:expr, $level:ident, $($arg:tt)+) => {{
        #[cfg(feature = "logging")]
        $logger.emit(|| ::tracing::$level!(target: $crate::logging::LOG_TARGET, $($arg)+));
    }};
}

pub(crate) use log_event;

#[cfg(feature = "logging")]
use tracing::Level;

/// Output format of the subscriber installed by [`LoggingBuilder::init`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per event
    #[default]
    Json,
    /// Multi-line human readable output
    Pretty,
    /// Single-line output
    Compact,
}

/// Configures a `tracing-subscriber` formatter for container events.
///
/// The container itself only emits through a [`Logger`]; installing a
/// subscriber is left to the application. [`LoggingBuilder::init`] does both:
/// it installs the global subscriber and hands back [`Logger::global`] to pass
/// to `ApplicationContext::builder(..).logger(..)`.
#[cfg(feature = "logging")]
#[derive(Debug, Clone)]
pub struct LoggingBuilder {
    level: Level,
    format: LogFormat,
    target: Option<&'static str>,
    with_file: bool,
    with_line_number: bool,
}

#[cfg(feature = "logging")]
impl Default for LoggingBuilder {
    fn default() -> Self {
        Self {
            level: Level::DEBUG,
            format: LogFormat::default(),
            target: None,
            with_file: false,
            with_line_number: false,
        }
    }
}

#[cfg(feature = "logging")]
impl LoggingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum level
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Keep only events emitted by the container (scanner, injector, lifecycle)
    pub fn di_only(mut self) -> Self {
        self.target = Some(LOG_TARGET);
        self
    }

    /// Include source file and line of each event
    pub fn with_source_location(mut self) -> Self {
        self.with_file = true;
        self.with_line_number = true;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// `EnvFilter` directive for the configured level and target
    #[cfg_attr(
        not(any(feature = "logging-json", feature = "logging-pretty")),
        allow(dead_code)
    )]
    fn directive(&self) -> String {
        match self.target {
            Some(target) => format!("{}={}", target, self.level),
            None => self.level.to_string(),
        }
    }

    /// Install the global subscriber and return a [`Logger`] emitting into it.
    ///
    /// [`LogFormat::Json`] falls back to the default text output when the
    /// `logging-json` feature is off.
    #[cfg(any(feature = "logging-json", feature = "logging-pretty"))]
    pub fn init(self) -> std::result::Result<Logger, tracing_subscriber::util::TryInitError> {
        use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

        let base = fmt::layer()
            .with_file(self.with_file)
            .with_line_number(self.with_line_number)
            .with_target(true);
        let layer: Box<dyn Layer<Registry> + Send + Sync> = match self.format {
            #[cfg(feature = "logging-json")]
            LogFormat::Json => base.json().boxed(),
            #[cfg(not(feature = "logging-json"))]
            LogFormat::Json => base.boxed(),
            LogFormat::Pretty => base.pretty().boxed(),
            LogFormat::Compact => base.compact().boxed(),
        };

        tracing_subscriber::registry()
            .with(layer)
            .with(EnvFilter::new(self.directive()))
            .try_init()?;
        Ok(Logger::global())
    }
}

/// Create a new logging builder
#[cfg(feature = "logging")]
pub fn builder() -> LoggingBuilder {
    LoggingBuilder::new()
}

#[cfg(all(test, feature = "logging"))]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let builder = LoggingBuilder::default();
        assert_eq!(builder.level, Level::DEBUG);
        assert_eq!(builder.format, LogFormat::Json);
        assert!(builder.target.is_none());
    }

    #[test]
    fn test_builder_chain() {
        let builder = builder()
            .with_level(Level::TRACE)
            .format(LogFormat::Pretty)
            .with_source_location()
            .di_only();

        assert_eq!(builder.level, Level::TRACE);
        assert_eq!(builder.format, LogFormat::Pretty);
        assert!(builder.with_file);
        assert!(builder.with_line_number);
        assert_eq!(builder.target, Some(LOG_TARGET));
    }

    #[test]
    fn test_filter_directive() {
        assert_eq!(LoggingBuilder::default().directive(), "DEBUG");
        let directive = builder().with_level(Level::WARN).di_only().directive();
        assert_eq!(directive, format!("{LOG_TARGET}=WARN"));
    }

    #[test]
    fn test_logger_sinks() {
        assert!(!Logger::default().is_enabled());
        assert!(!Logger::disabled().is_enabled());
        assert!(Logger::global().is_enabled());

        let mut called = false;
        Logger::disabled().emit(|| called = true);
        assert!(!called);
        Logger::global().emit(|| called = true);
        assert!(called);
    }

    #[test]
    fn test_dispatch_sink_receives_events() {
        let logger = Logger::with_dispatch(tracing::Dispatch::none());
        assert!(logger.is_enabled());
        assert_eq!(format!("{logger:?}"), "Logger { sink: \"dispatch\" }");
        log_event!(logger, debug, module = "AppModule", "Module dependencies initialized");
    }
}
