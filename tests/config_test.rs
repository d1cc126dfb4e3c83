//! Tests for configuration resolution and error reporting

use prometheus_bulk_runner::config::{ConfigLayers, JobConfig};
use prometheus_bulk_runner::core::{HookStage, JobError, PoolError, PoolPolicy};
use prometheus_bulk_runner::infra::QueueError;
use std::time::Duration;

#[test]
fn test_job_config_from_json() {
    let cfg = JobConfig::from_json_str(
        r#"{
            "thread_count": 8,
            "batch_size": 50,
            "endpoint_policy": "LOAD",
            "unit_retry_messages": ["XDMP-DEADLOCK"]
        }"#,
    )
    .expect("Failed to parse config");

    assert_eq!(cfg.thread_count, 8);
    assert_eq!(cfg.batch_size, 50);
    assert_eq!(cfg.endpoint_policy, PoolPolicy::Load);
    assert_eq!(cfg.batch_delimiter, ";");
    assert_eq!(cfg.retry_policy().retryable_messages, vec!["XDMP-DEADLOCK"]);
}

#[test]
fn test_job_config_from_json_rejects_invalid_values() {
    assert!(JobConfig::from_json_str(r#"{"thread_count": 0}"#).is_err());
    assert!(JobConfig::from_json_str(r#"{"batch_size": 2, "batch_delimiter": ""}"#).is_err());
    assert!(JobConfig::from_json_str("not json").is_err());
}

#[test]
fn test_layers_resolve_in_precedence_order() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let command_file = dir.path().join("job.properties");
    std::fs::write(
        &command_file,
        "THREAD-COUNT=2\nMONITOR-INTERVAL-MS=5000\nENDPOINT-POLICY=RANDOM\n",
    )
    .expect("Failed to write command file");

    let layers = ConfigLayers::new()
        .with_command_file(&command_file)
        .expect("Failed to read command file")
        .with_environment([("ENDPOINT_POLICY", "LOAD"), ("PATH", "/usr/bin")])
        .with_explicit("THREAD-COUNT", "16");

    let cfg = JobConfig::resolve(&layers).expect("Failed to resolve config");
    assert_eq!(cfg.thread_count, 16);
    assert_eq!(cfg.endpoint_policy, PoolPolicy::Load);
    assert_eq!(cfg.monitor_interval(), Duration::from_secs(5));
}

#[test]
fn test_missing_command_file_is_an_empty_layer() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let layers = ConfigLayers::new()
        .with_command_file(&dir.path().join("absent.properties"))
        .expect("Missing command file must not fail");
    assert_eq!(
        JobConfig::resolve(&layers).expect("Failed to resolve config"),
        JobConfig::default()
    );
}

#[test]
fn test_spill_directory_must_exist() {
    let layers = ConfigLayers::new()
        .with_explicit("SPILL-TO-DISK", "true")
        .with_explicit("SPILL-DIR", "/definitely/not/here");
    assert!(matches!(JobConfig::resolve(&layers), Err(JobError::Configuration(_))));
}

#[test]
fn test_error_display() {
    let err = JobError::UnitFailed {
        identifier: "doc-1".into(),
        detail: "rejected".into(),
    };
    assert_eq!(err.to_string(), "unit `doc-1` failed: rejected");

    let err = JobError::Hook {
        stage: HookStage::PostBatch,
        source: anyhow::anyhow!("disk full"),
    };
    assert_eq!(err.to_string(), "post-batch hook failed: disk full");

    let err: JobError = PoolError::PoolShutdown.into();
    assert!(matches!(err, JobError::Pool(PoolError::PoolShutdown)));

    let err: JobError = QueueError::Configuration("bad dir".into()).into();
    assert!(matches!(err, JobError::Configuration(_)));
    let err: JobError = QueueError::EmptyEntry.into();
    assert!(matches!(err, JobError::Queue(QueueError::EmptyEntry)));
}
