use std::sync::OnceLock;

use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

use crate::error::SyncError;

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

static INIT: OnceLock<()> = OnceLock::new();

/// Install the global subscriber. `BOARDCAST_LOG` overrides the level with a
/// full `EnvFilter` spec; dependency noise stays at warn otherwise.
pub fn init(level: LogLevel) -> Result<(), SyncError> {
    if INIT.get().is_some() {
        return Ok(());
    }

    let filter = match std::env::var("BOARDCAST_LOG") {
        Ok(spec) => EnvFilter::new(spec),
        Err(_) => EnvFilter::new(format!("warn,boardcast={}", level.as_str())),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_level(true)
        .with_target(level >= LogLevel::Debug)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| SyncError::Logging(err.to_string()))?;
    INIT.set(()).ok();
    Ok(())
}
