mod auth;
mod base;
mod connector;
mod consumer;
mod context;
mod logger;
mod producer;

pub use auth::{Credentials, SASL_PASS_VAR, SASL_USER_VAR};
pub use base::{client_config, parse_brokers, ConnectorError, InitialOffset, EVENT_CHANNEL_CAPACITY};
pub use connector::Connector;
pub use context::{
    ConsumerEventContext, ConsumerEvents, Notification, ProducerError, ProducerEventContext,
    ProducerEvents, TopicPartition,
};
