use flow_connector::{
    conf::{load_dotenv, KafkaConfig},
    kafka::{Connector, InitialOffset},
    utils::o11y::{build_subscriber, logging::log_error},
};

use clap::Parser;
use tracing::{info, info_span, instrument, warn, Instrument};

/// Consume flows from Kafka topics and republish them to another topic.
#[derive(Parser)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, value_name = "FILE", default_value = "config.yaml")]
    config: String,

    /// Comma-separated topics to consume from
    #[arg(long, value_delimiter = ',', required = true)]
    topics: Vec<String>,

    /// Consumer group to join
    #[arg(long)]
    group_id: String,

    /// Topic the flows are republished to
    #[arg(long)]
    output_topic: String,

    /// Where to start when the group has no committed offset
    #[arg(long, default_value = "latest")]
    offset: InitialOffset,

    /// Authenticate as the anonymous user instead of reading
    /// KAFKA_SASL_USER and KAFKA_SASL_PASS
    #[arg(long)]
    anon: bool,
}

#[instrument(skip_all, fields(group_id = %args.group_id, output_topic = %args.output_topic))]
async fn run(args: Cli, config: KafkaConfig) -> Result<(), flow_connector::ConnectorError> {
    let brokers = config.brokers.clone();
    let uses_sasl = config.security_protocol.uses_sasl();
    let mut connector = Connector::from_config(config);
    if args.anon {
        connector.set_auth_anon();
    } else if uses_sasl {
        connector.set_auth_from_env()?;
    }

    let topics: Vec<&str> = args.topics.iter().map(String::as_str).collect();
    connector
        .start_consumer(&brokers, &topics, &args.group_id, args.offset)
        .await?;
    if let Err(error) = connector.start_producer(&brokers, &args.output_topic).await {
        connector.close().await;
        return Err(error);
    }

    let (Some(mut flows), Some(output)) =
        (connector.take_consumer_channel(), connector.producer_channel())
    else {
        connector.close().await;
        return Ok(());
    };

    let shutdown = tokio::signal::ctrl_c().instrument(info_span!("sigint handler"));
    tokio::pin!(shutdown);

    let mut relayed: u64 = 0;
    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(error) = result {
                    log_error!(error, "failed to listen for ctrl-c event");
                }
                info!("received ctrl-c, shutting down");
                break;
            }
            flow = flows.recv() => {
                let Some(flow) = flow else {
                    warn!("consumer channel closed");
                    break;
                };
                if output.send(flow).await.is_err() {
                    warn!("producer channel closed");
                    break;
                }
                relayed += 1;
                if relayed % 10_000 == 0 {
                    info!(relayed, "relaying flows");
                }
            }
        }
    }

    drop(output);
    connector.close().await;
    info!(relayed, "relay stopped");
    Ok(())
}

#[tokio::main]
async fn main() {
    load_dotenv();

    let args = Cli::parse();

    let subscriber = build_subscriber().expect("failed to build subscriber");
    tracing::subscriber::set_global_default(subscriber).expect("failed to install subscriber");

    let config = KafkaConfig::load(&args.config).expect("failed to load configuration");

    if let Err(error) = run(args, config).await {
        log_error!(error, "flow relay failed");
        std::process::exit(1);
    }
}
