//! Output directory handling.

use run_log::{read_metrics, read_topology, read_workload, RunLogs};
use tempfile::TempDir;
use testbed_core::OutputConfig;

#[test]
fn test_create_makes_nested_output_dir() {
    let dir = TempDir::new().unwrap();
    let output = OutputConfig {
        dir: dir.path().join("runs").join("ring16"),
        ..Default::default()
    };
    let logs = RunLogs::create(&output).unwrap();
    drop(logs);

    assert!(read_metrics(output.metrics_path()).unwrap().is_empty());
    assert!(read_topology(output.topology_path()).unwrap().is_empty());
    assert!(read_workload(output.workload_path()).unwrap().is_empty());
}

#[test]
fn test_missing_log_is_an_error() {
    let dir = TempDir::new().unwrap();
    let err = read_metrics(dir.path().join("absent.csv")).unwrap_err();
    assert!(err.to_string().contains("absent.csv"));
}
