use crate::{
    conf::KafkaConfig,
    flow::FlowMessage,
    kafka::{
        auth::Credentials,
        base::{client_config, metadata_timeout, ConnectorError, InitialOffset},
        context::{forward, ConsumerEventContext, ConsumerEvents},
    },
    log_error, log_warning,
    utils::o11y::logging::as_error,
};

use std::sync::Arc;

use futures::{Stream, StreamExt};
use rdkafka::{
    config::ClientConfig,
    consumer::{Consumer, StreamConsumer},
    error::{KafkaError, KafkaResult},
    message::Message,
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, instrument, trace};

type FlowConsumer = StreamConsumer<ConsumerEventContext>;

/// A running consumer: the rdkafka client, its decoding task and the channels
/// it feeds.
pub(crate) struct ConsumerSession {
    consumer: Arc<FlowConsumer>,
    shutdown: watch::Sender<()>,
    decoder: JoinHandle<()>,
    pub(crate) flows: Option<mpsc::Receiver<FlowMessage>>,
    pub(crate) events: Option<ConsumerEvents>,
    pub(crate) logger: Option<JoinHandle<ConsumerEvents>>,
}

impl ConsumerSession {
    #[instrument(skip(settings, credentials), err)]
    pub(crate) async fn start(
        brokers: &str,
        topics: &[&str],
        group_id: &str,
        offset: InitialOffset,
        settings: &KafkaConfig,
        credentials: Option<&Credentials>,
        channel_length: usize,
    ) -> Result<Self, ConnectorError> {
        if topics.is_empty() {
            return Err(ConnectorError::NoTopics);
        }

        let mut client_config = client_config(brokers, settings, credentials)?;
        client_config
            .set("group.id", group_id)
            // only used when the group has no committed offset yet
            .set("auto.offset.reset", offset.as_str())
            .set("enable.auto.commit", "true")
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", settings.session_timeout_ms.to_string());

        let (context, events) = ConsumerEventContext::new();
        let errors = context.error_sender();

        info!(
            user = credentials.map(|c| c.user.as_str()),
            protocol = settings.security_protocol.as_str(),
            "trying to connect to kafka"
        );
        let consumer = connect(&client_config, context, topics, settings).await?;
        info!("kafka connection established");

        let (flows_tx, flows_rx) = mpsc::channel(channel_length.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let source = Arc::clone(&consumer);
        let decoder = tokio::spawn(async move {
            let messages = source.stream();
            tokio::pin!(messages);
            decode_messages(messages, flows_tx, errors, shutdown_rx).await;
        });

        Ok(Self {
            consumer,
            shutdown: shutdown_tx,
            decoder,
            flows: Some(flows_rx),
            events: Some(events),
            logger: None,
        })
    }

    /// Stop decoding, leave the group and wait for the logger to drain.
    pub(crate) async fn close(self) {
        self.shutdown.send_replace(());
        if let Err(error) = self.decoder.await {
            log_error!(error, "consumer decoder task failed");
        }
        release(self.consumer).await;
        if let Some(logger) = self.logger {
            if let Err(error) = logger.await {
                log_error!(error, "consumer logger task failed");
            }
        }
    }
}

// Create the client, verify it and subscribe. On failure the client is
// released before returning, which drops `context` with it.
async fn connect(
    client_config: &ClientConfig,
    context: ConsumerEventContext,
    topics: &[&str],
    settings: &KafkaConfig,
) -> Result<Arc<FlowConsumer>, ConnectorError> {
    let consumer: FlowConsumer = client_config
        .create_with_context(context)
        .inspect_err(as_error!("failed to create consumer"))?;
    let consumer = Arc::new(consumer);

    if settings.verify_connection {
        if let Err(error) = verify_connection(&consumer, settings).await {
            release(consumer).await;
            return Err(error);
        }
    }

    if let Err(error) = consumer.subscribe(topics) {
        log_error!(error, "failed to subscribe to topics");
        release(consumer).await;
        return Err(error.into());
    }
    Ok(consumer)
}

// Fetching metadata is the first request that needs a working, authenticated
// connection, so it surfaces TLS and SASL failures before anything is spawned.
async fn verify_connection(
    consumer: &Arc<FlowConsumer>,
    settings: &KafkaConfig,
) -> Result<(), ConnectorError> {
    let client = Arc::clone(consumer);
    let timeout = metadata_timeout(settings);
    let brokers = tokio::task::spawn_blocking(move || {
        client
            .fetch_metadata(None, timeout)
            .map(|metadata| metadata.brokers().len())
    })
    .await?
    .inspect_err(as_error!("failed to fetch cluster metadata"))?;
    debug!(brokers, "cluster metadata fetched");
    Ok(())
}

// Dropping the consumer leaves the group, which blocks.
async fn release(consumer: Arc<FlowConsumer>) {
    let result = tokio::task::spawn_blocking(move || {
        consumer.unsubscribe();
        drop(consumer);
    })
    .await;
    match result {
        Ok(()) => info!("kafka consumer connection closed"),
        Err(error) => log_error!(error, "failed to close kafka consumer"),
    }
}

// Decode wire messages into flows until the stream ends, the flow receiver is
// dropped or the shutdown signal fires.
//
// Broken payloads are logged and skipped. Errors from the stream go to the
// error channel. Sending into the bounded flow channel waits for the reader,
// which is what pushes back on the consumer.
#[instrument(name = "decoder", skip_all)]
pub(crate) async fn decode_messages<S, M>(
    mut messages: S,
    flows: mpsc::Sender<FlowMessage>,
    errors: mpsc::Sender<KafkaError>,
    mut shutdown: watch::Receiver<()>,
) where
    S: Stream<Item = KafkaResult<M>> + Unpin,
    M: Message,
{
    let mut decoded: u64 = 0;
    let mut dropped: u64 = 0;
    loop {
        let next = tokio::select! {
            _ = shutdown.changed() => break,
            next = messages.next() => next,
        };
        let flow = match next {
            None => {
                debug!("message stream ended");
                break;
            }
            Some(Err(error)) => {
                trace!(error.message = %error, "error from message stream");
                forward(&errors, error, "consumer_errors");
                continue;
            }
            Some(Ok(message)) => match decode_payload(&message) {
                Some(flow) => flow,
                None => {
                    dropped += 1;
                    continue;
                }
            },
        };
        tokio::select! {
            _ = shutdown.changed() => break,
            sent = flows.send(flow) => {
                if sent.is_err() {
                    debug!("flow receiver dropped");
                    break;
                }
                decoded += 1;
            }
        }
    }
    info!(decoded, dropped, "decoder terminated");
}

fn decode_payload<M: Message>(message: &M) -> Option<FlowMessage> {
    let Some(payload) = message.payload() else {
        trace!(
            topic = message.topic(),
            partition = message.partition(),
            offset = message.offset(),
            "empty payload, skipping"
        );
        return None;
    };
    FlowMessage::decode(payload)
        .inspect_err(|error| {
            log_warning!(
                error,
                topic = message.topic(),
                partition = message.partition(),
                offset = message.offset(),
                "received broken message"
            )
        })
        .ok()
}
