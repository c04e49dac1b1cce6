//! Connector lifecycle tests. None of them needs a running broker: sessions
//! are started against an unreachable plaintext address with connection
//! verification switched off, which librdkafka accepts and retries in the
//! background.
use flow_connector::{
    conf::{KafkaConfig, SecurityProtocol},
    kafka::{Connector, ConnectorError, InitialOffset},
};

use std::time::Duration;

const UNREACHABLE: &str = "127.0.0.1:1";

fn offline_config() -> KafkaConfig {
    KafkaConfig {
        security_protocol: SecurityProtocol::Plaintext,
        verify_connection: false,
        metadata_timeout_secs: 1,
        flush_timeout_secs: 1,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_close_without_sessions() {
    let mut connector = Connector::new();
    connector.close_consumer().await;
    connector.close_producer().await;
    connector.close().await;
    connector.close().await;
    assert!(!connector.consumer_running());
    assert!(!connector.producer_running());
}

#[tokio::test]
async fn test_sasl_without_credentials_fails() {
    let mut connector = Connector::new();
    let result = connector
        .start_consumer(UNREACHABLE, &["flows"], "flow-tests", InitialOffset::Latest)
        .await;
    assert!(matches!(result, Err(ConnectorError::MissingCredentials)));
    assert!(!connector.consumer_running());

    let result = connector.start_producer(UNREACHABLE, "flows-out").await;
    assert!(matches!(result, Err(ConnectorError::MissingCredentials)));
    assert!(!connector.producer_running());
}

#[tokio::test]
async fn test_empty_brokers_and_topics_fail() {
    let mut connector = Connector::from_config(offline_config());
    let result = connector
        .start_consumer(" , ", &["flows"], "flow-tests", InitialOffset::Latest)
        .await;
    assert!(matches!(result, Err(ConnectorError::NoBrokers)));

    let result = connector
        .start_consumer(UNREACHABLE, &[], "flow-tests", InitialOffset::Latest)
        .await;
    assert!(matches!(result, Err(ConnectorError::NoTopics)));
    assert!(!connector.consumer_running());
}

#[tokio::test]
async fn test_unreachable_cluster_fails_verification() {
    let mut connector = Connector::from_config(KafkaConfig {
        verify_connection: true,
        ..offline_config()
    });
    connector.set_auth_anon();
    let result = connector
        .start_consumer(UNREACHABLE, &["flows"], "flow-tests", InitialOffset::Earliest)
        .await;
    assert!(matches!(result, Err(ConnectorError::Kafka(_))));
    assert!(!connector.consumer_running());
    assert!(!connector.consumer_logger_running());
    assert!(connector.consumer_channel().is_none());
}

#[tokio::test]
async fn test_manual_mode_before_start_spawns_no_logger() {
    let mut connector = Connector::from_config(offline_config());
    connector.enable_manual_error_handling().await;

    connector
        .start_consumer(UNREACHABLE, &["flows"], "flow-tests", InitialOffset::Latest)
        .await
        .unwrap();
    connector.start_producer(UNREACHABLE, "flows-out").await.unwrap();

    assert!(connector.consumer_running());
    assert!(!connector.consumer_logger_running());
    assert!(!connector.producer_logger_running());
    assert!(connector.consumer_errors().is_some());
    assert!(connector.consumer_notifications().is_some());
    assert!(connector.producer_errors().is_some());

    connector.close().await;
    assert!(!connector.consumer_running());
    assert!(!connector.producer_running());
}

#[tokio::test]
async fn test_manual_mode_after_start_takes_over_events() {
    let mut connector = Connector::from_config(offline_config());
    connector
        .start_consumer(UNREACHABLE, &["flows"], "flow-tests", InitialOffset::Latest)
        .await
        .unwrap();
    assert!(connector.consumer_logger_running());
    assert!(connector.consumer_errors().is_none());

    connector.enable_manual_error_handling().await;
    assert!(!connector.consumer_logger_running());
    assert!(connector.consumer_errors().is_some());

    connector.close().await;
}

#[tokio::test]
async fn test_consumer_channel_closes_with_session() {
    let mut connector = Connector::from_config(offline_config());
    connector
        .start_consumer(UNREACHABLE, &["flows"], "flow-tests", InitialOffset::Latest)
        .await
        .unwrap();
    let mut flows = connector.take_consumer_channel().unwrap();
    assert!(connector.take_consumer_channel().is_none());

    connector.close_consumer().await;
    assert_eq!(flows.recv().await, None);
}

#[tokio::test]
async fn test_restart_replaces_sessions() {
    let mut connector = Connector::from_config(offline_config());
    connector.start_producer(UNREACHABLE, "flows-out").await.unwrap();
    let first = connector.producer_channel().unwrap();

    connector.start_producer(UNREACHABLE, "flows-out").await.unwrap();
    let second = connector.producer_channel().unwrap();

    assert!(first.is_closed());
    assert!(!second.is_closed());

    connector.close_producer().await;
    assert!(second.is_closed());
    assert!(!connector.producer_running());
}

#[tokio::test]
async fn test_unreachable_cluster_fails_producer_verification() {
    let mut connector = Connector::from_config(KafkaConfig {
        verify_connection: true,
        ..offline_config()
    });
    let result = connector.start_producer(UNREACHABLE, "flows-out").await;
    assert!(matches!(result, Err(ConnectorError::Kafka(_))));
    assert!(!connector.producer_running());
    assert!(!connector.producer_logger_running());
    assert!(connector.producer_channel().is_none());
}

#[tokio::test]
async fn test_dropped_connector_closes_sessions() {
    let mut connector = Connector::from_config(offline_config());
    connector
        .start_consumer(UNREACHABLE, &["flows"], "flow-tests", InitialOffset::Latest)
        .await
        .unwrap();
    connector.start_producer(UNREACHABLE, "flows-out").await.unwrap();
    let mut flows = connector.take_consumer_channel().unwrap();
    let output = connector.producer_channel().unwrap();

    drop(connector);

    tokio::time::timeout(Duration::from_secs(10), async {
        assert_eq!(flows.recv().await, None);
        output.closed().await;
    })
    .await
    .unwrap();
}
