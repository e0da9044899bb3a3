use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

/// `KLINE_LOG` wins over `--log-level` so a single module can be turned up
/// without touching the command line.
pub fn init_tracing(log_level: &str, log_format: &str) -> Result<()> {
    let filter = std::env::var("KLINE_LOG").unwrap_or_else(|_| log_level.to_string());
    let env_filter =
        EnvFilter::try_new(&filter).map_err(|err| anyhow!("invalid log filter {filter:?}: {err}"))?;

    match log_format.trim().to_lowercase().as_str() {
        "json" => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .json()
            .init(),
        "text" => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init(),
        other => return Err(anyhow!("unsupported log format {other:?} (text|json)")),
    }
    Ok(())
}
