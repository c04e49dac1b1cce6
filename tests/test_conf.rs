use flow_connector::conf::{ConfigError, KafkaConfig, SecurityProtocol};

use std::io::Write;

use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_test_config() {
    let config = KafkaConfig::load("tests/config.test.yaml").unwrap();
    assert_eq!(config.brokers, "127.0.0.1:1");
    assert_eq!(config.security_protocol, SecurityProtocol::Plaintext);
    assert_eq!(config.channel_length, 0);
    assert!(!config.verify_connection);
    assert_eq!(config.metadata_timeout_secs, 1);
    // unset keys keep their defaults
    assert_eq!(config.sasl_mechanism, "PLAIN");
    assert_eq!(config.session_timeout_ms, 6000);
}

#[test]
fn test_missing_kafka_section_uses_defaults() {
    let file = write_config("other: 1\n");
    let config = KafkaConfig::load(file.path().to_str().unwrap()).unwrap();
    assert_eq!(config.security_protocol, SecurityProtocol::SaslSsl);
    assert_eq!(config.ssl_ca_location.as_deref(), Some("probe"));
}

#[test]
fn test_placeholders_are_expanded() {
    std::env::set_var("FLOW_CONF_TEST_BROKERS", "kafka-1:9093,kafka-2:9093");
    let file = write_config(
        "kafka:\n  brokers: ${FLOW_CONF_TEST_BROKERS}\n  debug: ${FLOW_CONF_TEST_DEBUG:-cgrp}\n",
    );
    let config = KafkaConfig::load(file.path().to_str().unwrap()).unwrap();
    assert_eq!(config.brokers, "kafka-1:9093,kafka-2:9093");
    assert_eq!(config.debug.as_deref(), Some("cgrp"));
}

#[test]
fn test_missing_placeholder_variable() {
    let file = write_config("kafka:\n  brokers: ${FLOW_CONF_TEST_UNSET_VARIABLE}\n");
    let result = KafkaConfig::load(file.path().to_str().unwrap());
    assert!(matches!(result, Err(ConfigError::EnvExpansion(_))));
}

#[test]
fn test_environment_overrides_file() {
    std::env::set_var("FLOW__KAFKA__FLUSH_TIMEOUT_SECS", "45");
    let file = write_config("kafka:\n  flush_timeout_secs: 30\n");
    let config = KafkaConfig::load(file.path().to_str().unwrap()).unwrap();
    std::env::remove_var("FLOW__KAFKA__FLUSH_TIMEOUT_SECS");
    assert_eq!(config.flush_timeout_secs, 45);
}

#[test]
fn test_invalid_security_protocol() {
    let file = write_config("kafka:\n  security_protocol: carrier_pigeon\n");
    let result = KafkaConfig::load(file.path().to_str().unwrap());
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_missing_file() {
    let result = KafkaConfig::load("tests/does-not-exist.yaml");
    assert!(matches!(result, Err(ConfigError::ConfigFileNotFound(_))));
}
