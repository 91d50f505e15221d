use anyhow::{anyhow, Result};
use cascade_core::LoggingConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber. `RUST_LOG` wins over the configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| anyhow!("invalid log filter '{}': {}", config.level, e))?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.format.as_str() {
        "compact" => registry.with(fmt::layer().compact()).try_init(),
        "full" => registry.with(fmt::layer()).try_init(),
        _ => registry.with(fmt::layer().pretty()).try_init(),
    };
    installed.map_err(|e| anyhow!("failed to install tracing subscriber: {}", e))
}
