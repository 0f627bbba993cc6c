use meal_config::{load_layered_yaml_from_strings, report_unused_keys, ConfigConsumer, UnusedKeyPolicy};

const YAML: &str = r#"
daemon:
  bind_addr: "127.0.0.1:9000"
store:
  retry:
    max_attempts: 5
    backoff_ms: 10
legacy:
  socket_io_path: "/socket.io"
"#;

#[test]
fn warn_reports_unused_without_error() {
    let loaded = load_layered_yaml_from_strings(&[YAML]).unwrap();
    let report = report_unused_keys(ConfigConsumer::Daemon, &loaded.config_json, UnusedKeyPolicy::Warn)
        .expect("warn policy must not error");

    assert_eq!(report.unused_leaf_pointers, vec!["/legacy/socket_io_path".to_string()]);
    assert_eq!(report.consumer, "DAEMON");
}

#[test]
fn fail_errors_on_unused_keys() {
    let loaded = load_layered_yaml_from_strings(&[YAML]).unwrap();
    let err = report_unused_keys(ConfigConsumer::Daemon, &loaded.config_json, UnusedKeyPolicy::Fail)
        .unwrap_err();
    assert!(format!("{err:?}").contains("CONFIG_UNUSED_KEYS"));
}

#[test]
fn cli_does_not_consume_daemon_keys() {
    let loaded = load_layered_yaml_from_strings(&[YAML]).unwrap();
    let report = report_unused_keys(ConfigConsumer::Cli, &loaded.config_json, UnusedKeyPolicy::Warn).unwrap();

    assert!(report.unused_leaf_pointers.contains(&"/daemon/bind_addr".to_string()));
    assert!(!report.unused_leaf_pointers.contains(&"/store/retry/max_attempts".to_string()));
}
