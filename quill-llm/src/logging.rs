//! Optional `tracing` subscriber setup.
//!
//! The library only emits events; without a subscriber they are discarded.
//! Applications that want output call [`init`] once and keep the returned
//! [`LevelHandle`] to change the level later.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, fmt, reload};

use crate::config::LogLevel;
use crate::error::{LlmError, Result};

/// Changes the level of an installed subscriber at runtime.
#[derive(Clone)]
pub struct LevelHandle(reload::Handle<EnvFilter, Registry>);

impl LevelHandle {
    /// Replace the active filter with `level`. This also overrides any
    /// `RUST_LOG` directives the subscriber started with.
    ///
    /// # Errors
    /// [`LlmError::Config`] if the subscriber has been dropped.
    pub fn set_level(&self, level: LogLevel) -> Result<()> {
        self.0
            .reload(EnvFilter::new(level.as_filter()))
            .map_err(|e| LlmError::Config(format!("cannot change log level: {e}")))
    }
}

impl std::fmt::Debug for LevelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LevelHandle").finish_non_exhaustive()
    }
}

fn startup_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()))
}

fn reloadable(filter: EnvFilter) -> (reload::Layer<EnvFilter, Registry>, LevelHandle) {
    let (layer, handle) = reload::Layer::new(filter);
    (layer, LevelHandle(handle))
}

/// Install a formatted stderr subscriber at `level`.
///
/// `RUST_LOG` takes precedence when set. Returns `None` if a global
/// subscriber was already installed, in which case nothing changes.
pub fn init(level: LogLevel) -> Option<LevelHandle> {
    let (filter, handle) = reloadable(startup_filter(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .try_init()
        .ok()
        .map(|()| handle)
}

/// Like [`init`], but emits one JSON object per event.
pub fn init_json(level: LogLevel) -> Option<LevelHandle> {
    let (filter, handle) = reloadable(startup_filter(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().with_writer(std::io::stderr))
        .try_init()
        .ok()
        .map(|()| handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    use tracing::Level;

    #[test]
    fn handle_changes_level_at_runtime() {
        let (filter, handle) = reloadable(EnvFilter::new("info"));
        let subscriber = tracing_subscriber::registry().with(filter);

        tracing::subscriber::with_default(subscriber, || {
            assert!(tracing::enabled!(Level::INFO));
            assert!(!tracing::enabled!(Level::DEBUG));

            handle.set_level(LogLevel::Debug).expect("reload");
            assert!(tracing::enabled!(Level::DEBUG));

            handle.set_level(LogLevel::Off).expect("reload");
            assert!(!tracing::enabled!(Level::ERROR));
        });
    }

    #[test]
    fn dropped_subscriber_reports_config_error() {
        let (filter, handle) = reloadable(EnvFilter::new("warn"));
        drop(filter);

        let err = handle.set_level(LogLevel::Info).expect_err("dropped");
        assert!(matches!(err, LlmError::Config(_)));
    }
}
