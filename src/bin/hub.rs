use anyhow::Context;
use clap::Parser;
use health_trends::{
    ActorSettings, ActorSystem, HealthTrendService,
    actors::{AggregatorOptions, HealthCheckEvent},
    config::read_config_file,
    probe::ProbeRegistry,
    storage::open_backend,
    util::{get_config_path, get_log_level},
};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file (falls back to HEALTH_TRENDS_CONFIG)
    #[arg(short)]
    file: Option<String>,
}

fn init() {
    let level = get_log_level();
    let filter = filter::Targets::new().with_targets(vec![
        ("health_trends", level),
        ("health_trends_hub", level),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let path = args
        .file
        .or_else(get_config_path)
        .context("no config file given (use -f or HEALTH_TRENDS_CONFIG)")?;
    let config = read_config_file(&path)?;

    let store = open_backend(config.storage.as_ref())
        .await
        .context("failed to open state store")?;

    let system = ActorSystem::new(
        store,
        ProbeRegistry::with_defaults(),
        config.trends,
        ActorSettings::default(),
    );
    let events = system.subscribe();
    system.start().await?;

    let aggregator = system.aggregator();
    for service in &config.services {
        if let Err(e) = aggregator.register_service(service.clone()).await {
            error!(service = %service.id, "failed to register service: {:#}", e);
        }
    }
    aggregator
        .initialize(AggregatorOptions::from(&config.trends))
        .await?;

    let service = HealthTrendService::new(system.clone(), config.services.clone());
    info!(services = service.list_services().await.len(), "hub running");

    tokio::select! {
        _ = log_events(events) => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("failed to listen for ctrl-c: {e}");
            }
        }
    }

    info!("shutting down");
    system.shutdown().await;
    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<HealthCheckEvent>) {
    loop {
        match events.recv().await {
            Ok(HealthCheckEvent { service_id, record }) => {
                debug!(
                    service = %service_id,
                    status = ?record.status,
                    response_time = ?record.response_time,
                    error = record.error_message.as_deref().unwrap_or(""),
                    "health check"
                );
            }
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "event log lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}
