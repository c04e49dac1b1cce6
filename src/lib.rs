//! Kafka connector for bwNetFlow flow records.
//!
//! A [`Connector`](kafka::Connector) opens TLS/SASL-authenticated consumer and
//! producer sessions against a Kafka cluster and exposes them as bounded tokio
//! channels of [`FlowMessage`](flow::FlowMessage).
pub mod conf;
pub mod flow;
pub mod kafka;
pub mod utils;

pub use flow::{FlowMessage, FlowType};
pub use kafka::{Connector, ConnectorError, Credentials, InitialOffset};
