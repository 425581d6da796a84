//! Configuration loading from disk

use std::io::Write;
use std::time::Duration;
use streamshift::config::DeliveryPolicyKind;
use streamshift::ReplicatorConfig;

const FULL: &str = r#"
source:
  url: postgres://replicator@source-db:5432/source_db
  password: ${STREAMSHIFT_IT_SOURCE_PASSWORD:-changeme}
  schema: inventory
target:
  url: postgres://replicator@replica-db:5432/target_db
  connect_timeout_secs: 3
subscription:
  topic_pattern: 'dbserver1\.inventory\..*'
  group: replica-applier
delivery:
  policy: dead_letter
  dead_letter_path: /tmp/streamshift-dlq.jsonl
  retry:
    max_retries: 5
    initial_backoff_ms: 50
    max_backoff_ms: 2000
catalog:
  lenient_table_lookup: true
workers: 8
"#;

#[test]
fn test_load_full_config_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(FULL.as_bytes()).unwrap();

    let config = ReplicatorConfig::from_file(file.path()).unwrap();

    assert_eq!(config.source.schema, "inventory");
    assert_eq!(
        config.source.password.as_ref().map(|p| p.expose_secret()),
        Some("changeme")
    );
    assert!(config.target.password.is_none());
    assert_eq!(config.target.schema, "public");
    assert_eq!(config.subscription.group, "replica-applier");
    assert_eq!(config.delivery.policy, DeliveryPolicyKind::DeadLetter);
    assert!(config.catalog.lenient_table_lookup);
    assert_eq!(config.workers, 8);

    let retry = config.delivery.retry.to_retry_config();
    assert_eq!(retry.max_retries, 5);
    assert_eq!(retry.initial_delay, Duration::from_millis(50));
    assert_eq!(retry.max_delay, Duration::from_millis(2000));

    let conn = config.target.connection_config();
    assert_eq!(conn.connect_timeout_ms, 3000);
}

#[test]
fn test_password_is_redacted_in_debug_output() {
    let config = ReplicatorConfig::from_yaml(FULL).unwrap();
    let debug = format!("{:?}", config.source);
    assert!(!debug.contains("changeme"), "{debug}");
}

#[test]
fn test_missing_file_is_reported() {
    let err = ReplicatorConfig::from_file(std::path::Path::new("/nonexistent/streamshift.yaml"))
        .unwrap_err();
    assert!(err.to_string().contains("/nonexistent/streamshift.yaml"));
}

#[tokio::test]
async fn test_dead_letter_policy_opens_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dlq.jsonl");
    let yaml = format!(
        "delivery:\n  policy: dead_letter\n  dead_letter_path: {}\n",
        path.display()
    );

    let config = ReplicatorConfig::from_yaml(&yaml).unwrap();
    let policy = config.delivery.build_policy().await.unwrap();

    assert_eq!(policy.name(), "dead_letter");
    assert!(path.exists());
}
