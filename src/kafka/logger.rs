use crate::kafka::context::{ConsumerEvents, Notification, ProducerEvents};

use tokio::sync::watch;
use tracing::{info, instrument, warn};

// Drain consumer errors and notifications into the log until the channels
// close or the shutdown signal fires. The channels are handed back so that a
// caller switching to manual error handling can take them over.
#[instrument(name = "consumer_logger", skip_all)]
pub(crate) async fn log_consumer_events(
    mut events: ConsumerEvents,
    mut shutdown: watch::Receiver<()>,
) -> ConsumerEvents {
    info!("spawned a consumer logger, no manual error handling");
    loop {
        tokio::select! {
            error = events.errors.recv() => match error {
                Some(error) => warn!(error.message = %error, error.details = ?error, "kafka consumer error"),
                None => break,
            },
            notification = events.notifications.recv() => match notification {
                Some(Notification::Failed(reason)) => warn!(reason, "kafka consumer rebalance failed"),
                Some(notification) => info!(?notification, "kafka consumer notification"),
                None => break,
            },
            _ = shutdown.changed() => break,
        }
    }
    info!("consumer logger terminated");
    events
}

#[instrument(name = "producer_logger", skip_all)]
pub(crate) async fn log_producer_events(
    mut events: ProducerEvents,
    mut shutdown: watch::Receiver<()>,
) -> ProducerEvents {
    info!("spawned a producer logger, no manual error handling");
    loop {
        tokio::select! {
            error = events.errors.recv() => match error {
                Some(producer_error) => warn!(
                    error.message = %producer_error.error,
                    topic = ?producer_error.topic,
                    "kafka producer error"
                ),
                None => break,
            },
            _ = shutdown.changed() => break,
        }
    }
    info!("producer logger terminated");
    events
}
