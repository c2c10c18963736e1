#![forbid(unsafe_code)]

//! Optional subscriber installation for binaries and examples.
//!
//! Libraries should not install a global subscriber; this exists for
//! applications that embed courier and want its logs without wiring
//! `tracing-subscriber` themselves. The filter is read from `COURIER_LOG`
//! (same syntax as `RUST_LOG`) and defaults to `warn`.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

const ENV_LOG: &str = "COURIER_LOG";

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

fn filter() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .with_env_var(ENV_LOG)
        .from_env_lossy()
}

/// Install a global fmt subscriber. Returns `false` if one was already set.
pub fn init(format: LogFormat) -> bool {
    let builder = tracing_subscriber::fmt().with_env_filter(filter());
    let result = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.is_ok()
}
