//! Tracing subscriber setup for hosts embedding the capture stage

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Log level for the capture stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

impl LogLevel {
    /// Level after applying a `-v` style verbosity count
    pub fn with_verbosity(self, verbose_count: u8) -> Self {
        match verbose_count {
            0 => self,
            1 => LogLevel::Verbose,
            2 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    /// Filter directive for this level
    pub fn filter(&self) -> &'static str {
        match self {
            LogLevel::Error => "capture_stage=error",
            LogLevel::Warn => "capture_stage=warn",
            LogLevel::Info => "capture_stage=info",
            LogLevel::Verbose => "capture_stage=debug,capture_stage::video::acquisition=info",
            LogLevel::Debug => "capture_stage=debug",
            LogLevel::Trace => "capture_stage=trace",
        }
    }
}

/// Install a global subscriber
///
/// `RUST_LOG` takes priority over `level`. Calling this more than once is
/// harmless; later calls leave the first subscriber in place.
pub fn init_logging(level: LogLevel, verbose_count: u8) {
    let filter = level.with_verbosity(verbose_count).filter();

    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_thread_names(true))
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
