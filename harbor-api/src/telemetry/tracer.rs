//! Tracing subscriber initialization.
//!
//! JSON lines on stdout, filtered by `RUST_LOG` when set and otherwise by the
//! `[log] level` setting.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogSettings;
use crate::error::{ApiError, ApiResult};

/// Filter used when `RUST_LOG` is not set.
pub fn default_filter(level: &str) -> String {
    format!("harbor_api={level},harbor_storage={level},tower_http=info,info")
}

/// Install the global subscriber. Call once, before anything logs.
pub fn init_tracing(settings: &LogSettings) -> ApiResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(&settings.level)));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .try_init()
        .map_err(|e| ApiError::internal_error(format!("Failed to initialize tracing: {}", e)))?;

    tracing::info!(level = %settings.level, "Tracing initialized");
    Ok(())
}
