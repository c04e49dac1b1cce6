use crate::{
    conf::KafkaConfig,
    flow::FlowMessage,
    kafka::{
        auth::Credentials,
        base::{ConnectorError, InitialOffset},
        consumer::ConsumerSession,
        context::{Notification, ProducerError},
        logger::{log_consumer_events, log_producer_events},
        producer::ProducerSession,
    },
    log_error, log_warning,
};

use rdkafka::error::KafkaError;
use tokio::sync::{mpsc, watch};
use tracing::{info, instrument, warn};

/// Holds the credentials and settings for a Kafka cluster and at most one
/// consumer and one producer session against it.
///
/// Unless manual error handling is enabled, each session gets a background
/// task that logs its errors and notifications. In manual mode the caller
/// reads them through [`Connector::consumer_errors`],
/// [`Connector::consumer_notifications`] and [`Connector::producer_errors`],
/// and has to keep up with them: events that do not fit into the channels
/// are dropped.
///
/// Call [`Connector::close`] before dropping the connector. Sessions still
/// running on drop are closed on a detached task of the current runtime, or
/// dropped without a flush when there is no runtime.
pub struct Connector {
    settings: KafkaConfig,
    credentials: Option<Credentials>,
    channel_length: usize,
    manual_error_handling: bool,
    logger_shutdown: watch::Sender<()>,
    consumer: Option<ConsumerSession>,
    producer: Option<ProducerSession>,
}

impl Default for Connector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector {
    pub fn new() -> Self {
        Self::from_config(KafkaConfig::default())
    }

    pub fn from_config(settings: KafkaConfig) -> Self {
        let (logger_shutdown, _) = watch::channel(());
        Self {
            channel_length: settings.channel_length.max(1),
            manual_error_handling: settings.manual_error_handling,
            settings,
            credentials: None,
            logger_shutdown,
            consumer: None,
            producer: None,
        }
    }

    pub fn settings(&self) -> &KafkaConfig {
        &self.settings
    }

    pub fn set_auth(&mut self, user: impl Into<String>, password: impl Into<String>) {
        self.credentials = Some(Credentials::new(user, password));
    }

    /// Use the login from `KAFKA_SASL_USER` and `KAFKA_SASL_PASS`. The current
    /// credentials are kept when either variable is unset or empty.
    pub fn set_auth_from_env(&mut self) -> Result<(), ConnectorError> {
        let credentials = Credentials::from_env()
            .inspect_err(|error| log_warning!(error, "failed to read kafka credentials"))?;
        info!(user = %credentials.user, "read kafka credentials from environment");
        self.credentials = Some(credentials);
        Ok(())
    }

    pub fn set_auth_anon(&mut self) {
        self.credentials = Some(Credentials::anonymous());
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Capacity of the flow channels of sessions started from now on.
    pub fn set_channel_length(&mut self, length: usize) {
        self.channel_length = length.max(1);
    }

    pub fn channel_length(&self) -> usize {
        self.channel_length
    }

    /// Stop logging errors and notifications internally and hand them to the
    /// caller instead. Loggers of sessions that are already running are
    /// stopped and their channels become available through the accessors.
    pub async fn enable_manual_error_handling(&mut self) {
        self.manual_error_handling = true;
        self.logger_shutdown.send_replace(());

        if let Some(session) = self.consumer.as_mut() {
            if let Some(logger) = session.logger.take() {
                match logger.await {
                    Ok(events) => session.events = Some(events),
                    Err(error) => log_error!(error, "consumer logger task failed"),
                }
            }
        }
        if let Some(session) = self.producer.as_mut() {
            if let Some(logger) = session.logger.take() {
                match logger.await {
                    Ok(events) => session.events = Some(events),
                    Err(error) => log_error!(error, "producer logger task failed"),
                }
            }
        }
    }

    pub fn manual_error_handling(&self) -> bool {
        self.manual_error_handling
    }

    /// Join `group_id` on the given topics and start decoding flows into the
    /// consumer channel. A running consumer is closed first.
    ///
    /// `offset` only matters for a group without committed offsets.
    #[instrument(skip(self), err)]
    pub async fn start_consumer(
        &mut self,
        brokers: &str,
        topics: &[&str],
        group_id: &str,
        offset: InitialOffset,
    ) -> Result<(), ConnectorError> {
        if self.consumer.is_some() {
            info!("restarting kafka consumer");
            self.close_consumer().await;
        }
        let mut session = ConsumerSession::start(
            brokers,
            topics,
            group_id,
            offset,
            &self.settings,
            self.credentials.as_ref(),
            self.channel_length,
        )
        .await?;
        if !self.manual_error_handling {
            if let Some(events) = session.events.take() {
                let shutdown = self.logger_shutdown.subscribe();
                session.logger = Some(tokio::spawn(log_consumer_events(events, shutdown)));
            }
        }
        self.consumer = Some(session);
        Ok(())
    }

    /// Start publishing flows sent to the producer channel to `topic`. A
    /// running producer is closed first.
    #[instrument(skip(self), err)]
    pub async fn start_producer(&mut self, brokers: &str, topic: &str) -> Result<(), ConnectorError> {
        if self.producer.is_some() {
            info!("restarting kafka producer");
            self.close_producer().await;
        }
        let mut session = ProducerSession::start(
            brokers,
            topic,
            &self.settings,
            self.credentials.as_ref(),
            self.channel_length,
        )
        .await?;
        if !self.manual_error_handling {
            if let Some(events) = session.events.take() {
                let shutdown = self.logger_shutdown.subscribe();
                session.logger = Some(tokio::spawn(log_producer_events(events, shutdown)));
            }
        }
        self.producer = Some(session);
        Ok(())
    }

    /// Close whatever sessions are running.
    pub async fn close(&mut self) {
        if let Some(session) = self.consumer.take() {
            session.close().await;
        }
        if let Some(session) = self.producer.take() {
            session.close().await;
        }
    }

    pub async fn close_consumer(&mut self) {
        match self.consumer.take() {
            Some(session) => session.close().await,
            None => warn!("requested to close consumer, but no consumer is running"),
        }
    }

    pub async fn close_producer(&mut self) {
        match self.producer.take() {
            Some(session) => session.close().await,
            None => warn!("requested to close producer, but no producer is running"),
        }
    }

    /// Decoded flows. Yields `None` once the session is closed.
    pub fn consumer_channel(&mut self) -> Option<&mut mpsc::Receiver<FlowMessage>> {
        self.consumer.as_mut()?.flows.as_mut()
    }

    /// Take ownership of the decoded flows, e.g. to move them into another
    /// task. Later calls return `None` until the consumer is restarted.
    pub fn take_consumer_channel(&mut self) -> Option<mpsc::Receiver<FlowMessage>> {
        self.consumer.as_mut()?.flows.take()
    }

    pub fn producer_channel(&self) -> Option<mpsc::Sender<FlowMessage>> {
        self.producer.as_ref().map(|session| session.flows.clone())
    }

    /// `None` while a logger owns the consumer events.
    pub fn consumer_errors(&mut self) -> Option<&mut mpsc::Receiver<KafkaError>> {
        Some(&mut self.consumer.as_mut()?.events.as_mut()?.errors)
    }

    /// `None` while a logger owns the consumer events.
    pub fn consumer_notifications(&mut self) -> Option<&mut mpsc::Receiver<Notification>> {
        Some(&mut self.consumer.as_mut()?.events.as_mut()?.notifications)
    }

    /// `None` while a logger owns the producer events.
    pub fn producer_errors(&mut self) -> Option<&mut mpsc::Receiver<ProducerError>> {
        Some(&mut self.producer.as_mut()?.events.as_mut()?.errors)
    }

    pub fn consumer_running(&self) -> bool {
        self.consumer.is_some()
    }

    pub fn producer_running(&self) -> bool {
        self.producer.is_some()
    }

    pub fn consumer_logger_running(&self) -> bool {
        self.consumer
            .as_ref()
            .and_then(|session| session.logger.as_ref())
            .is_some_and(|logger| !logger.is_finished())
    }

    pub fn producer_logger_running(&self) -> bool {
        self.producer
            .as_ref()
            .and_then(|session| session.logger.as_ref())
            .is_some_and(|logger| !logger.is_finished())
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        let consumer = self.consumer.take();
        let producer = self.producer.take();
        if consumer.is_none() && producer.is_none() {
            return;
        }
        warn!("connector dropped without close, closing sessions in the background");
        // destroying the clients blocks, so it must not happen on this thread
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Some(session) = consumer {
                        session.close().await;
                    }
                    if let Some(session) = producer {
                        session.close().await;
                    }
                });
            }
            Err(error) => log_warning!(error, "no runtime to close kafka sessions on"),
        }
    }
}
