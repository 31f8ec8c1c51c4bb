//! Tracing subscriber setup.
//!
//! The engine logs through `tracing` macros unconditionally; installing a
//! subscriber is the embedding application's call. With the `tracing-json`
//! feature, [`init_tracing`] installs a `fmt` subscriber filtered by
//! `SIFT_LOG` (falling back to `RUST_LOG`, then `info`).

/// Environment variable consulted first for the filter directive.
pub const LOG_ENV: &str = "SIFT_LOG";

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Install a global subscriber. Returns `false` if one was already set.
#[cfg(feature = "tracing-json")]
pub fn init_tracing(format: LogFormat) -> bool {
    use tracing_subscriber::EnvFilter;

    let filter = std::env::var(LOG_ENV)
        .ok()
        .and_then(|directive| EnvFilter::try_new(directive).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let installed = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.is_ok()
}
