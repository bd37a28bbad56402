//! Loading a full run configuration from disk.

use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;
use testbed_core::{ConfigError, NodeId, Registry, TestbedConfig, TopologySpec};

const RING16: &str = r#"
nodes:
  count: 16
  resource_api: "http://cadvisor:8080/"
topology:
  kind: ring
  degree: 4
convergence:
  deadline: 2m
  verification_retries: 2
collector:
  interval: 5s
  request_timeout: 2s
workload:
  seed: 7
  operations: 40
  mean_delay: 500ms
run:
  cooldown: 15s
"#;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_and_build_registry() {
    let file = write_config(RING16);
    let config = TestbedConfig::from_file(file.path()).unwrap();
    config.validate().unwrap();

    assert_eq!(config.topology, TopologySpec::Ring { degree: 4 });
    assert_eq!(config.convergence.deadline, Duration::from_secs(120));
    assert_eq!(config.workload.mean_delay, Duration::from_millis(500));
    assert_eq!(config.run.cooldown, Duration::from_secs(15));

    let registry = Registry::from_config(&config.nodes).unwrap();
    assert_eq!(registry.len(), 16);
    let last = registry.resolve(NodeId(15)).unwrap();
    assert_eq!(last.name, "ipfs15");
    assert_eq!(last.resource_endpoint, "http://cadvisor:8080");
}

#[test]
fn test_timeout_longer_than_interval_is_rejected() {
    let file = write_config(
        r#"
collector:
  interval: 1s
  request_timeout: 3s
"#,
    );
    let config = TestbedConfig::from_file(file.path()).unwrap();
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let result = TestbedConfig::from_file(&dir.path().join("absent.yaml"));
    assert!(matches!(result, Err(ConfigError::Io(_))));
}
