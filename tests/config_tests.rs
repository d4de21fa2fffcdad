use mcpwatch::config::generate::generate_starter_config;
use mcpwatch::config::{load_config, resolve_config_path, ConfigError, OverflowPolicy};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", content).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_load_full_config() {
    let file = write_config(
        r#"
api_key: mw_file_key
endpoint: https://ingest.internal.example:8443
debug: true
sample_rate: 0.25
max_batch_size: 20
flush_interval: 2s

server:
  name: filesystem
  version: 3.1.4
  transport: stdio

policy:
  max_queue_size: 100
  overflow: drop_oldest
  max_retries: 5
  backoff_base: 250ms
  backoff_max: 10s
  request_timeout: 3s
  shutdown_timeout: 1s
  max_in_flight: 2
  quota_warning_ratio: 0.2
  adaptive_sampling: true
"#,
    );

    let config = load_config(file.path()).unwrap();
    assert_eq!(config.server.name, "filesystem");
    assert_eq!(config.server_info().version, "3.1.4");

    let pipeline = config.to_pipeline_config().unwrap();
    assert_eq!(pipeline.api_key(), "mw_file_key");
    assert_eq!(pipeline.endpoint().port(), Some(8443));
    assert!(pipeline.debug());
    assert_eq!(pipeline.sample_rate(), 0.25);
    assert_eq!(pipeline.max_batch_size(), 20);
    assert_eq!(pipeline.flush_interval(), Duration::from_secs(2));
    assert_eq!(pipeline.max_queue_size(), 100);

    let policy = pipeline.policy();
    assert_eq!(policy.overflow, OverflowPolicy::DropOldest);
    assert_eq!(policy.max_retries, 5);
    assert_eq!(policy.backoff_base, Duration::from_millis(250));
    assert_eq!(policy.request_timeout, Duration::from_secs(3));
    assert_eq!(policy.max_in_flight, 2);
    assert!(policy.adaptive_sampling);
    // Unset policy keys keep their defaults
    assert_eq!(policy.max_attributes, 64);
}

#[test]
fn test_env_expansion_from_file() {
    std::env::set_var("MCPWATCH_CONFIG_TEST_KEY", "mw_env_key");
    let file = write_config("api_key: $env{MCPWATCH_CONFIG_TEST_KEY}\n");

    let config = load_config(file.path());
    std::env::remove_var("MCPWATCH_CONFIG_TEST_KEY");

    let config = config.unwrap();
    assert_eq!(config.api_key, "mw_env_key");
    assert_eq!(config.to_pipeline_config().unwrap().api_key(), "mw_env_key");
}

#[test]
fn test_missing_api_key_field() {
    let file = write_config("endpoint: https://ingest.mcpwatch.dev\n");
    let err = load_config(file.path()).unwrap_err();
    assert!(err.to_string().contains("api_key"));
}

#[test]
fn test_validation_problems_are_listed() {
    let file = write_config(
        r#"
api_key: ""
endpoint: "ingest without scheme"
max_batch_size: 0
"#,
    );
    match load_config(file.path()).unwrap_err() {
        ConfigError::ValidationList(problems) => {
            assert_eq!(problems.len(), 3);
            assert!(problems.iter().any(|p| p.contains("api_key")));
            assert!(problems.iter().any(|p| p.contains("endpoint")));
            assert!(problems.iter().any(|p| p.contains("max_batch_size")));
        }
        other => panic!("expected validation list, got {:?}", other),
    }
}

#[test]
fn test_missing_file() {
    let err = load_config(std::path::Path::new("/nonexistent/mcpwatch.yml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
    assert!(err.to_string().contains("/nonexistent/mcpwatch.yml"));
}

#[test]
fn test_starter_config_round_trips_through_file() {
    std::env::set_var("MCPWATCH_API_KEY", "mw_starter_file");
    let file = write_config(&generate_starter_config());
    let config = load_config(file.path());
    std::env::remove_var("MCPWATCH_API_KEY");

    let config = config.unwrap();
    assert_eq!(config.to_pipeline_config().unwrap().max_queue_size(), 1000);
}

#[test]
fn test_resolve_explicit_path() {
    let file = write_config("api_key: k\n");
    assert_eq!(
        resolve_config_path(Some(file.path())),
        Some(file.path().to_path_buf())
    );
}
