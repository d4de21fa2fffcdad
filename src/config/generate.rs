pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# MCPWATCH CONFIGURATION
# =============================================================================
# Telemetry pipeline settings for an instrumented MCP server.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/mcpwatch/config.yml
#   3. /etc/mcpwatch/config.yml
#
# Any value may reference an environment variable with $env{NAME}.

# Required. Sent as a bearer token with every batch.
api_key: $env{MCPWATCH_API_KEY}

# Ingestion service base URL. Batches are POSTed to {endpoint}/v1/events.
endpoint: https://ingest.mcpwatch.dev

# Fraction of events to keep, clamped to [0, 1].
sample_rate: 1.0

# Records per batch; a full batch is flushed without waiting for the timer.
max_batch_size: 50

# Timer flush period.
flush_interval: 1s

# Verbose pipeline logging (drops, retries, quota transitions).
debug: false

# =============================================================================
# SERVER IDENTITY
# =============================================================================
# Reported with every batch.

server:
  name: my-mcp-server
  version: 0.1.0
  transport: stdio

# =============================================================================
# POLICY (optional)
# =============================================================================
# Every key below is optional and shows its default.

policy:
  # Queue capacity; defaults to max_batch_size * 20
  # max_queue_size: 1000
  # What to do when the queue is full: drop_newest or drop_oldest
  overflow: drop_newest
  # Retries after the first attempt for transient failures
  max_retries: 3
  backoff_base: 500ms
  backoff_max: 30s
  request_timeout: 10s
  # Drain budget when the pipeline is dropped without an explicit stop
  shutdown_timeout: 5s
  max_in_flight: 4
  max_attribute_bytes: 4096
  max_attributes: 64
  # remaining/limit ratio at or below which quota counts as approaching
  quota_warning_ratio: 0.1
  # Reduce the sample rate while quota is under pressure
  adaptive_sampling: false
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse::parse_config_str;

    #[test]
    fn test_starter_config_parses() {
        std::env::set_var("MCPWATCH_API_KEY", "mw_starter");
        let config = parse_config_str(&generate_starter_config()).unwrap();
        std::env::remove_var("MCPWATCH_API_KEY");

        assert_eq!(config.api_key, "mw_starter");
        assert_eq!(config.server.transport, "stdio");
        assert_eq!(config.policy.max_in_flight, 4);
    }
}
