use crate::{
    conf::KafkaConfig,
    flow::FlowMessage,
    kafka::{
        auth::Credentials,
        base::{client_config, flush_timeout, metadata_timeout, ConnectorError},
        context::{forward, ProducerError, ProducerEventContext, ProducerEvents},
    },
    log_error, log_warning,
    utils::o11y::logging::as_error,
};

use std::{sync::Arc, time::Duration};

use rdkafka::{
    config::ClientConfig,
    error::KafkaResult,
    producer::{BaseRecord, Producer, ThreadedProducer},
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, instrument};

/// Destination for encoded flows.
pub(crate) trait PayloadSink: Send + Sync + 'static {
    fn topic(&self) -> &str;

    /// Enqueue one payload. Delivery failures are reported later through the
    /// producer's error channel.
    fn send_payload(&self, payload: &[u8]) -> KafkaResult<()>;
}

/// A producer bound to a single topic.
pub(crate) struct TopicProducer {
    producer: ThreadedProducer<ProducerEventContext>,
    topic: String,
}

impl TopicProducer {
    fn flush(&self, timeout: Duration) -> KafkaResult<()> {
        self.producer.flush(timeout)
    }
}

impl PayloadSink for TopicProducer {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn send_payload(&self, payload: &[u8]) -> KafkaResult<()> {
        let record = BaseRecord::<(), [u8]>::to(&self.topic).payload(payload);
        self.producer.send(record).map_err(|(error, _record)| error)
    }
}

pub(crate) struct ProducerSession {
    producer: Arc<TopicProducer>,
    shutdown: watch::Sender<()>,
    encoder: JoinHandle<()>,
    flush_timeout: Duration,
    pub(crate) flows: mpsc::Sender<FlowMessage>,
    pub(crate) events: Option<ProducerEvents>,
    pub(crate) logger: Option<JoinHandle<ProducerEvents>>,
}

impl ProducerSession {
    #[instrument(skip(settings, credentials), err)]
    pub(crate) async fn start(
        brokers: &str,
        topic: &str,
        settings: &KafkaConfig,
        credentials: Option<&Credentials>,
        channel_length: usize,
    ) -> Result<Self, ConnectorError> {
        let client_config = client_config(brokers, settings, credentials)?;
        let (context, events) = ProducerEventContext::new();
        let errors = context.error_sender();

        info!(
            user = credentials.map(|c| c.user.as_str()),
            protocol = settings.security_protocol.as_str(),
            "trying to connect to kafka"
        );
        let producer = connect(&client_config, context, topic, settings).await?;
        info!("kafka connection established");

        let (flows_tx, flows_rx) = mpsc::channel(channel_length.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let encoder = tokio::spawn(encode_messages(
            Arc::clone(&producer),
            flows_rx,
            errors,
            shutdown_rx,
        ));

        Ok(Self {
            producer,
            shutdown: shutdown_tx,
            encoder,
            flush_timeout: flush_timeout(settings),
            flows: flows_tx,
            events: Some(events),
            logger: None,
        })
    }

    /// Publish what is still queued, flush outstanding writes and release the
    /// client.
    pub(crate) async fn close(self) {
        self.shutdown.send_replace(());
        if let Err(error) = self.encoder.await {
            log_error!(error, "producer encoder task failed");
        }
        drop(self.flows);

        let producer = Arc::clone(&self.producer);
        let timeout = self.flush_timeout;
        match tokio::task::spawn_blocking(move || producer.flush(timeout)).await {
            Ok(Ok(())) => debug!("producer flushed"),
            Ok(Err(error)) => log_warning!(error, "failed to flush producer"),
            Err(error) => log_error!(error, "producer flush task failed"),
        }
        release(self.producer).await;

        if let Some(logger) = self.logger {
            if let Err(error) = logger.await {
                log_error!(error, "producer logger task failed");
            }
        }
    }
}

// Create the client and verify it. On failure the client is released before
// returning, which drops `context` with it.
async fn connect(
    client_config: &ClientConfig,
    context: ProducerEventContext,
    topic: &str,
    settings: &KafkaConfig,
) -> Result<Arc<TopicProducer>, ConnectorError> {
    let producer: ThreadedProducer<ProducerEventContext> = client_config
        .create_with_context(context)
        .inspect_err(as_error!("failed to create producer"))?;
    let producer = Arc::new(TopicProducer {
        producer,
        topic: topic.to_string(),
    });

    if settings.verify_connection {
        if let Err(error) = verify_connection(&producer, settings).await {
            release(producer).await;
            return Err(error);
        }
    }
    Ok(producer)
}

async fn verify_connection(
    producer: &Arc<TopicProducer>,
    settings: &KafkaConfig,
) -> Result<(), ConnectorError> {
    let client = Arc::clone(producer);
    let timeout = metadata_timeout(settings);
    let brokers = tokio::task::spawn_blocking(move || {
        client
            .producer
            .client()
            .fetch_metadata(None, timeout)
            .map(|metadata| metadata.brokers().len())
    })
    .await?
    .inspect_err(as_error!("failed to fetch cluster metadata"))?;
    debug!(brokers, "cluster metadata fetched");
    Ok(())
}

// Dropping a threaded producer joins its polling thread.
async fn release(producer: Arc<TopicProducer>) {
    match tokio::task::spawn_blocking(move || drop(producer)).await {
        Ok(()) => info!("kafka producer connection closed"),
        Err(error) => log_error!(error, "failed to close kafka producer"),
    }
}

// Encode flows from the input channel and hand them to the sink until every
// sender is gone or the shutdown signal fires. On shutdown the flows already
// queued are still published.
#[instrument(name = "encoder", skip_all, fields(topic = sink.topic()))]
pub(crate) async fn encode_messages<P: PayloadSink>(
    sink: Arc<P>,
    mut flows: mpsc::Receiver<FlowMessage>,
    errors: mpsc::Sender<ProducerError>,
    mut shutdown: watch::Receiver<()>,
) {
    let mut published: u64 = 0;
    loop {
        tokio::select! {
            flow = flows.recv() => match flow {
                Some(flow) => {
                    if publish(sink.as_ref(), &flow, &errors) {
                        published += 1;
                    }
                }
                None => break,
            },
            _ = shutdown.changed() => {
                flows.close();
                while let Some(flow) = flows.recv().await {
                    if publish(sink.as_ref(), &flow, &errors) {
                        published += 1;
                    }
                }
                break;
            }
        }
    }
    info!(published, "encoder terminated");
}

fn publish<P: PayloadSink>(
    sink: &P,
    flow: &FlowMessage,
    errors: &mpsc::Sender<ProducerError>,
) -> bool {
    let payload = match flow.encode() {
        Ok(payload) => payload,
        Err(error) => {
            log_warning!(error, "failed to encode flow, skipping");
            return false;
        }
    };
    match sink.send_payload(&payload) {
        Ok(()) => true,
        Err(error) => {
            debug!(error.message = %error, "failed to enqueue flow");
            forward(
                errors,
                ProducerError {
                    topic: Some(sink.topic().to_string()),
                    error,
                },
                "producer_errors",
            );
            false
        }
    }
}
