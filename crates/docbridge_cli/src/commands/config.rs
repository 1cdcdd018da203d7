//! `config` command.

use super::CommandError;
use docbridge_client::ClientConfig;
use serde_json::json;

/// Prints the resolved configuration as JSON, with the account key redacted.
pub fn run() -> Result<(), CommandError> {
    let config = ClientConfig::from_env()?;
    println!("{}", serde_json::to_string_pretty(&render(&config))?);
    Ok(())
}

fn render(config: &ClientConfig) -> serde_json::Value {
    json!({
        "endpoint": config.endpoint,
        "credential_source": config.credential_source.as_ref().map(|s| s.to_string()),
        "account_key": config.account_key.as_ref().map(|_| "<redacted>"),
        "database": config.database,
        "container": config.container,
        "connection_mode": config.connection_mode.to_string(),
        "max_retry_attempts": config.retry.max_attempts,
        "request_timeout_ms": config.retry.request_timeout.as_millis() as u64,
        "max_concurrency": config.max_concurrency,
        "batch_size_limit": config.batch_size_limit,
        "max_batch_bytes": config.max_batch_bytes,
        "page_size": config.page_size,
        "prefetch": config.prefetch,
        "startup_timeout_ms": config.startup_timeout.as_millis() as u64,
        "drain_timeout_ms": config.drain_timeout.as_millis() as u64,
    })
}
