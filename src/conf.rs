use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::sync::LazyLock;

use config::{Config, Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

// Matches ${VAR_NAME} and ${VAR_NAME:-default}
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([^}:]+)(?::-(.*?))?\}").expect("placeholder pattern is valid")
});

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to load config")]
    InvalidConfig(#[from] config::ConfigError),
    #[error("could not read config file")]
    Read(#[from] std::io::Error),
    #[error("could not find config file {0}")]
    ConfigFileNotFound(String),
    #[error("environment variable expansion error")]
    EnvExpansion(#[from] ExpandError),
}

#[derive(thiserror::Error, Debug)]
pub enum ExpandError {
    #[error("Missing environment variable '{var_name}' for placeholder '{placeholder}'")]
    MissingVariable {
        var_name: String,
        placeholder: String,
    },
}

/// Loads environment variables from a .env file if it exists.
///
/// Looks in the current working directory first, then in its parent. Finding
/// neither is not an error: the variables may come from the system.
pub fn load_dotenv() {
    for candidate in [".env", "../.env"] {
        if !Path::new(candidate).exists() {
            continue;
        }
        match dotenvy::from_path(candidate) {
            Ok(_) => info!("Loaded environment variables from {} file", candidate),
            Err(e) => warn!("Found {} file but failed to load it: {}", candidate, e),
        }
        return;
    }
    debug!("No .env file found, using system environment variables only");
}

/// Expands environment variable placeholders in a string.
///
/// - `${KAFKA_SASL_PASS}` reads from `KAFKA_SASL_PASS`
/// - `${KAFKA_BROKERS:-localhost:9092}` falls back to `localhost:9092`
pub fn expand_env_vars(input: &str) -> Result<String, ExpandError> {
    expand_with(input, |name| env::var(name).ok())
}

fn expand_with<F>(input: &str, lookup: F) -> Result<String, ExpandError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut output = String::with_capacity(input.len());
    let mut resolved: HashMap<&str, String> = HashMap::new();
    let mut last_end = 0;

    for capture in PLACEHOLDER.captures_iter(input) {
        let (Some(whole), Some(var_name)) = (capture.get(0), capture.get(1)) else {
            continue;
        };
        output.push_str(&input[last_end..whole.start()]);
        last_end = whole.end();

        if let Some(value) = resolved.get(whole.as_str()) {
            output.push_str(value);
            continue;
        }

        let value = match lookup(var_name.as_str()) {
            Some(value) => {
                debug!(
                    "Expanded environment variable: {} = [REDACTED]",
                    var_name.as_str()
                );
                value
            }
            None => match capture.get(2) {
                Some(default) => {
                    warn!(
                        "Environment variable {} not found, using default value",
                        var_name.as_str()
                    );
                    default.as_str().to_string()
                }
                None => {
                    return Err(ExpandError::MissingVariable {
                        var_name: var_name.as_str().to_string(),
                        placeholder: whole.as_str().to_string(),
                    })
                }
            },
        };
        output.push_str(&value);
        resolved.insert(whole.as_str(), value);
    }
    output.push_str(&input[last_end..]);

    Ok(output)
}

// Read a config file with its environment placeholders expanded.
fn read_expanded(filepath: &str) -> Result<String, ConfigError> {
    let path = Path::new(filepath);
    if !path.exists() {
        return Err(ConfigError::ConfigFileNotFound(filepath.to_string()));
    }
    let file_content = std::fs::read_to_string(path)?;
    Ok(expand_env_vars(&file_content)?)
}

/// librdkafka `security.protocol`.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SecurityProtocol {
    Plaintext,
    Ssl,
    SaslPlaintext,
    #[default]
    SaslSsl,
}

impl SecurityProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityProtocol::Plaintext => "PLAINTEXT",
            SecurityProtocol::Ssl => "SSL",
            SecurityProtocol::SaslPlaintext => "SASL_PLAINTEXT",
            SecurityProtocol::SaslSsl => "SASL_SSL",
        }
    }

    pub fn uses_sasl(&self) -> bool {
        matches!(
            self,
            SecurityProtocol::SaslPlaintext | SecurityProtocol::SaslSsl
        )
    }

    pub fn uses_tls(&self) -> bool {
        matches!(self, SecurityProtocol::Ssl | SecurityProtocol::SaslSsl)
    }
}

/// Connection settings shared by consumer and producer sessions.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// Comma-separated broker list, used by the relay binary.
    pub brokers: String,
    pub security_protocol: SecurityProtocol,
    pub sasl_mechanism: String,
    /// CA bundle path, or `probe` to use the system certificate store.
    pub ssl_ca_location: Option<String>,
    /// Capacity of the flow channels, raised to 1 if set to 0.
    pub channel_length: usize,
    pub manual_error_handling: bool,
    /// Fetch cluster metadata while starting a session so that bad credentials
    /// or unreachable brokers fail the `start_*` call.
    pub verify_connection: bool,
    pub metadata_timeout_secs: u64,
    pub flush_timeout_secs: u64,
    pub session_timeout_ms: u64,
    /// librdkafka debug contexts, e.g. "consumer,cgrp,topic,fetch".
    pub debug: Option<String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            security_protocol: SecurityProtocol::SaslSsl,
            sasl_mechanism: "PLAIN".to_string(),
            ssl_ca_location: Some("probe".to_string()),
            channel_length: 1,
            manual_error_handling: false,
            verify_connection: true,
            metadata_timeout_secs: 10,
            flush_timeout_secs: 30,
            session_timeout_ms: 6000,
            debug: None,
        }
    }
}

// Deserialization helper for the top-level document
#[derive(Debug, Default, Deserialize)]
struct FullConfig {
    #[serde(default)]
    kafka: KafkaConfig,
}

impl KafkaConfig {
    /// Load the `kafka` section of a config file.
    ///
    /// Values can be overridden by environment variables such as
    /// `FLOW__KAFKA__BROKERS`.
    #[instrument(err)]
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let expanded_content = read_expanded(path)?;
        let full_config: FullConfig = Config::builder()
            .add_source(File::from_str(&expanded_content, FileFormat::Yaml))
            .add_source(
                Environment::with_prefix("FLOW")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(full_config.kafka)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "KAFKA_SASL_USER" => Some("flows".to_string()),
            "KAFKA_SASL_PASS" => Some("s3cret".to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_expand_plain_placeholder() {
        let expanded = expand_with("user: ${KAFKA_SASL_USER}", lookup).unwrap();
        assert_eq!(expanded, "user: flows");
    }

    #[test]
    fn test_expand_repeated_and_default() {
        let expanded = expand_with(
            "${KAFKA_SASL_USER}/${KAFKA_SASL_USER} @ ${KAFKA_BROKERS:-localhost:9093}",
            lookup,
        )
        .unwrap();
        assert_eq!(expanded, "flows/flows @ localhost:9093");
    }

    #[test]
    fn test_expand_default_ignored_when_set() {
        let expanded = expand_with("${KAFKA_SASL_PASS:-fallback}", lookup).unwrap();
        assert_eq!(expanded, "s3cret");
    }

    #[test]
    fn test_expand_missing_variable() {
        let err = expand_with("password: ${KAFKA_NOPE}", lookup).unwrap_err();
        match err {
            ExpandError::MissingVariable {
                var_name,
                placeholder,
            } => {
                assert_eq!(var_name, "KAFKA_NOPE");
                assert_eq!(placeholder, "${KAFKA_NOPE}");
            }
        }
    }

    #[test]
    fn test_expand_without_placeholders() {
        let input = "kafka:\n  brokers: localhost:9092\n";
        assert_eq!(expand_with(input, lookup).unwrap(), input);
    }

    #[test]
    fn test_security_protocol_names() {
        assert_eq!(SecurityProtocol::SaslSsl.as_str(), "SASL_SSL");
        assert!(SecurityProtocol::SaslSsl.uses_sasl());
        assert!(SecurityProtocol::SaslSsl.uses_tls());
        assert!(!SecurityProtocol::Plaintext.uses_sasl());
        assert!(!SecurityProtocol::SaslPlaintext.uses_tls());
    }

    #[test]
    fn test_default_config() {
        let config = KafkaConfig::default();
        assert_eq!(config.security_protocol, SecurityProtocol::SaslSsl);
        assert_eq!(config.sasl_mechanism, "PLAIN");
        assert_eq!(config.ssl_ca_location.as_deref(), Some("probe"));
        assert_eq!(config.channel_length, 1);
        assert!(config.verify_connection);
        assert!(!config.manual_error_handling);
    }
}
