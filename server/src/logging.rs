//! Logging setup.
//!
//! The subscriber is installed before configuration is resolved so resolution
//! itself is logged. Its filter sits behind a reload layer: once configuration
//! is available, `log-level` may replace the default filter. `RUST_LOG`, when
//! set, always wins.

use tracing_subscriber::{
    EnvFilter, Registry, layer::SubscriberExt, reload, util::SubscriberInitExt,
};

use crate::config::{ConfigurationView, Property, StringProperty};

/// Log level applied when `RUST_LOG` is unset.
pub const LOG_LEVEL: StringProperty = StringProperty::new("log-level");

/// Filter used until configuration says otherwise.
pub const DEFAULT_FILTER: &str = "portico=info";

const LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

/// Handle for adjusting the installed filter after startup.
pub struct LogHandle {
    handle: reload::Handle<EnvFilter, Registry>,
    /// True when `RUST_LOG` provided the filter.
    from_environment: bool,
}

/// Install the global subscriber.
///
/// # Panics
///
/// Panics if a global subscriber is already installed.
#[must_use]
pub fn init() -> LogHandle {
    let env_filter = EnvFilter::try_from_default_env();
    let from_environment = env_filter.is_ok();
    let (filter, handle) =
        reload::Layer::new(env_filter.unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    LogHandle {
        handle,
        from_environment,
    }
}

impl LogHandle {
    /// Apply `log-level` from `config`.
    ///
    /// Returns the filter now in effect if it changed.
    pub fn apply(&self, config: &ConfigurationView) -> Option<String> {
        if self.from_environment {
            return None;
        }

        let level = config.get_or(&LOG_LEVEL, String::new());
        if level.is_empty() {
            return None;
        }

        let Some(filter) = level_filter(&level) else {
            tracing::warn!(
                "Ignoring invalid {} \"{level}\"; expected one of {}",
                LOG_LEVEL.name(),
                LEVELS.join(", ")
            );
            return None;
        };

        match self.handle.reload(EnvFilter::new(&filter)) {
            Ok(()) => {
                tracing::info!("Log level set to \"{level}\"");
                Some(filter)
            }
            Err(e) => {
                tracing::warn!("Unable to apply log level \"{level}\": {e}");
                None
            }
        }
    }
}

/// Filter directive for a `log-level` value.
fn level_filter(level: &str) -> Option<String> {
    let level = level.trim().to_ascii_lowercase();
    let level = if level == "warning" { "warn".to_string() } else { level };
    LEVELS
        .contains(&level.as_str())
        .then(|| format!("portico={level}"))
}
