//! rdkafka client contexts that turn librdkafka callbacks into channel events.
//!
//! The callbacks run on librdkafka's polling threads and must not block, so
//! events are handed over with `try_send`. When nobody drains a channel and it
//! fills up, further events are dropped and logged.
use crate::kafka::base::EVENT_CHANNEL_CAPACITY;

use rdkafka::{
    client::ClientContext,
    consumer::{BaseConsumer, ConsumerContext, Rebalance},
    error::KafkaError,
    message::Message,
    producer::{DeliveryResult, ProducerContext},
    TopicPartitionList,
};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

/// Consumer group rebalance event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    /// Partitions claimed by this consumer.
    Assigned(Vec<TopicPartition>),
    /// Partitions released by this consumer.
    Revoked(Vec<TopicPartition>),
    Failed(String),
}

fn topic_partitions(tpl: &TopicPartitionList) -> Vec<TopicPartition> {
    tpl.elements()
        .iter()
        .map(|elem| TopicPartition {
            topic: elem.topic().to_string(),
            partition: elem.partition(),
        })
        .collect()
}

impl Notification {
    pub fn from_rebalance(rebalance: &Rebalance<'_>) -> Self {
        match rebalance {
            Rebalance::Assign(tpl) => Notification::Assigned(topic_partitions(tpl)),
            Rebalance::Revoke(tpl) => Notification::Revoked(topic_partitions(tpl)),
            Rebalance::Error(error) => Notification::Failed(error.to_string()),
        }
    }
}

/// Error reported while producing.
///
/// `topic` is set for failed deliveries and unset for client-level errors.
#[derive(Clone, Debug)]
pub struct ProducerError {
    pub topic: Option<String>,
    pub error: KafkaError,
}

pub(crate) fn forward<T>(sender: &mpsc::Sender<T>, event: T, kind: &str) {
    match sender.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            warn!(channel = kind, "event channel full, dropping event")
        }
        Err(TrySendError::Closed(_)) => {
            debug!(channel = kind, "event channel closed, dropping event")
        }
    }
}

/// Receiving ends of a consumer session's event channels.
#[derive(Debug)]
pub struct ConsumerEvents {
    pub errors: mpsc::Receiver<KafkaError>,
    pub notifications: mpsc::Receiver<Notification>,
}

pub struct ConsumerEventContext {
    errors: mpsc::Sender<KafkaError>,
    notifications: mpsc::Sender<Notification>,
}

impl ConsumerEventContext {
    pub fn new() -> (Self, ConsumerEvents) {
        let (errors_tx, errors_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (notifications_tx, notifications_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let context = Self {
            errors: errors_tx,
            notifications: notifications_tx,
        };
        let events = ConsumerEvents {
            errors: errors_rx,
            notifications: notifications_rx,
        };
        (context, events)
    }

    /// A sender for errors observed outside of librdkafka callbacks.
    pub fn error_sender(&self) -> mpsc::Sender<KafkaError> {
        self.errors.clone()
    }
}

impl ClientContext for ConsumerEventContext {
    fn error(&self, error: KafkaError, reason: &str) {
        debug!(error.message = %error, reason, "consumer client error");
        forward(&self.errors, error, "consumer_errors");
    }
}

impl ConsumerContext for ConsumerEventContext {
    fn post_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        forward(
            &self.notifications,
            Notification::from_rebalance(rebalance),
            "consumer_notifications",
        );
    }
}

/// Receiving end of a producer session's error channel.
#[derive(Debug)]
pub struct ProducerEvents {
    pub errors: mpsc::Receiver<ProducerError>,
}

pub struct ProducerEventContext {
    errors: mpsc::Sender<ProducerError>,
}

impl ProducerEventContext {
    pub fn new() -> (Self, ProducerEvents) {
        let (errors_tx, errors_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        (Self { errors: errors_tx }, ProducerEvents { errors: errors_rx })
    }

    pub fn error_sender(&self) -> mpsc::Sender<ProducerError> {
        self.errors.clone()
    }
}

impl ClientContext for ProducerEventContext {
    fn error(&self, error: KafkaError, reason: &str) {
        debug!(error.message = %error, reason, "producer client error");
        forward(
            &self.errors,
            ProducerError { topic: None, error },
            "producer_errors",
        );
    }
}

impl ProducerContext for ProducerEventContext {
    type DeliveryOpaque = ();

    fn delivery(&self, delivery_result: &DeliveryResult<'_>, _delivery_opaque: Self::DeliveryOpaque) {
        if let Err((error, message)) = delivery_result {
            forward(
                &self.errors,
                ProducerError {
                    topic: Some(message.topic().to_string()),
                    error: error.clone(),
                },
                "producer_errors",
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdkafka::types::RDKafkaErrorCode;

    #[test]
    fn test_rebalance_to_notification() {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition("flows", 0);
        tpl.add_partition("flows", 3);
        let expected = vec![
            TopicPartition {
                topic: "flows".to_string(),
                partition: 0,
            },
            TopicPartition {
                topic: "flows".to_string(),
                partition: 3,
            },
        ];
        assert_eq!(
            Notification::from_rebalance(&Rebalance::Assign(&tpl)),
            Notification::Assigned(expected.clone())
        );
        assert_eq!(
            Notification::from_rebalance(&Rebalance::Revoke(&tpl)),
            Notification::Revoked(expected)
        );
    }

    #[test]
    fn test_client_errors_are_forwarded() {
        let (context, mut events) = ConsumerEventContext::new();
        context.error(
            KafkaError::Global(RDKafkaErrorCode::AllBrokersDown),
            "all brokers down",
        );
        let error = events.errors.try_recv().unwrap();
        assert_eq!(error, KafkaError::Global(RDKafkaErrorCode::AllBrokersDown));
    }

    #[test]
    fn test_full_channel_does_not_block() {
        let (context, mut events) = ProducerEventContext::new();
        for _ in 0..EVENT_CHANNEL_CAPACITY + 10 {
            context.error(
                KafkaError::Global(RDKafkaErrorCode::BrokerTransportFailure),
                "transport failure",
            );
        }
        let mut received = 0;
        while let Ok(event) = events.errors.try_recv() {
            assert!(event.topic.is_none());
            received += 1;
        }
        assert_eq!(received, EVENT_CHANNEL_CAPACITY);
    }

    #[test]
    fn test_closed_channel_is_ignored() {
        let (context, events) = ConsumerEventContext::new();
        drop(events);
        context.error(
            KafkaError::Global(RDKafkaErrorCode::AllBrokersDown),
            "all brokers down",
        );
    }
}
