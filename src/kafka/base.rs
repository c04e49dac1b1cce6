use crate::{conf::KafkaConfig, kafka::auth::Credentials};

use std::time::Duration;

use rdkafka::{config::ClientConfig, error::KafkaError};

/// Capacity of the error and notification channels.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("error from rdkafka")]
    Kafka(#[from] KafkaError),
    #[error("no credentials set for SASL authentication")]
    MissingCredentials,
    #[error("setting SASL credentials from KAFKA_SASL_USER and KAFKA_SASL_PASS failed")]
    MissingEnvCredentials,
    #[error("no brokers given")]
    NoBrokers,
    #[error("no topics given")]
    NoTopics,
    #[error("background task failed")]
    Join(#[from] tokio::task::JoinError),
}

/// Where a consumer group without committed offsets starts reading.
///
/// A group that already committed offsets resumes from them regardless.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InitialOffset {
    Earliest,
    #[default]
    Latest,
}

impl InitialOffset {
    pub fn as_str(&self) -> &'static str {
        match self {
            InitialOffset::Earliest => "earliest",
            InitialOffset::Latest => "latest",
        }
    }
}

impl std::str::FromStr for InitialOffset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "earliest" | "oldest" => Ok(InitialOffset::Earliest),
            "latest" | "newest" => Ok(InitialOffset::Latest),
            _ => Err(format!("invalid offset '{}', use earliest or latest", s)),
        }
    }
}

/// Normalize a comma-separated broker list.
pub fn parse_brokers(brokers: &str) -> Result<String, ConnectorError> {
    let brokers: Vec<&str> = brokers
        .split(',')
        .map(str::trim)
        .filter(|broker| !broker.is_empty())
        .collect();
    if brokers.is_empty() {
        return Err(ConnectorError::NoBrokers);
    }
    Ok(brokers.join(","))
}

/// Build the client configuration shared by consumers and producers.
pub fn client_config(
    brokers: &str,
    settings: &KafkaConfig,
    credentials: Option<&Credentials>,
) -> Result<ClientConfig, ConnectorError> {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", parse_brokers(brokers)?)
        .set("security.protocol", settings.security_protocol.as_str());

    if let Some(debug) = &settings.debug {
        client_config.set("debug", debug);
    }

    if settings.security_protocol.uses_tls() {
        if let Some(ca_location) = &settings.ssl_ca_location {
            client_config.set("ssl.ca.location", ca_location);
        }
    }

    if settings.security_protocol.uses_sasl() {
        let credentials = credentials.ok_or(ConnectorError::MissingCredentials)?;
        client_config
            .set("sasl.mechanisms", &settings.sasl_mechanism)
            .set("sasl.username", &credentials.user)
            .set("sasl.password", &credentials.password);
    }

    Ok(client_config)
}

pub(crate) fn metadata_timeout(settings: &KafkaConfig) -> Duration {
    Duration::from_secs(settings.metadata_timeout_secs)
}

pub(crate) fn flush_timeout(settings: &KafkaConfig) -> Duration {
    Duration::from_secs(settings.flush_timeout_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conf::SecurityProtocol;

    #[test]
    fn test_parse_brokers() {
        assert_eq!(
            parse_brokers(" kafka-1:9093, kafka-2:9093,,").unwrap(),
            "kafka-1:9093,kafka-2:9093"
        );
        assert!(matches!(parse_brokers(" , "), Err(ConnectorError::NoBrokers)));
    }

    #[test]
    fn test_client_config_sasl_ssl() {
        let settings = KafkaConfig::default();
        let credentials = Credentials::new("flows", "hunter2");
        let config = client_config("kafka-1:9093", &settings, Some(&credentials)).unwrap();
        assert_eq!(config.get("bootstrap.servers"), Some("kafka-1:9093"));
        assert_eq!(config.get("security.protocol"), Some("SASL_SSL"));
        assert_eq!(config.get("sasl.mechanisms"), Some("PLAIN"));
        assert_eq!(config.get("sasl.username"), Some("flows"));
        assert_eq!(config.get("sasl.password"), Some("hunter2"));
        assert_eq!(config.get("ssl.ca.location"), Some("probe"));
    }

    #[test]
    fn test_client_config_requires_credentials_for_sasl() {
        let settings = KafkaConfig::default();
        let result = client_config("kafka-1:9093", &settings, None);
        assert!(matches!(result, Err(ConnectorError::MissingCredentials)));
    }

    #[test]
    fn test_client_config_plaintext() {
        let settings = KafkaConfig {
            security_protocol: SecurityProtocol::Plaintext,
            debug: Some("consumer,cgrp".to_string()),
            ..Default::default()
        };
        let config = client_config("localhost:9092", &settings, None).unwrap();
        assert_eq!(config.get("security.protocol"), Some("PLAINTEXT"));
        assert_eq!(config.get("sasl.username"), None);
        assert_eq!(config.get("ssl.ca.location"), None);
        assert_eq!(config.get("debug"), Some("consumer,cgrp"));
    }

    #[test]
    fn test_initial_offset_parsing() {
        assert_eq!("earliest".parse::<InitialOffset>(), Ok(InitialOffset::Earliest));
        assert_eq!("newest".parse::<InitialOffset>(), Ok(InitialOffset::Latest));
        assert!("stored".parse::<InitialOffset>().is_err());
    }
}
