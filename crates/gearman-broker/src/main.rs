use axum::{extract::State, http::StatusCode, routing::get, Router};
use clap::Parser;
use gearman_broker::{Broker, BrokerConfig};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "gm-broker")]
#[command(about = "Job queue broker", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Listen host
    #[arg(long)]
    host: Option<String>,

    /// Job server port
    #[arg(short, long)]
    port: Option<u16>,

    /// Hostname embedded in job handles
    #[arg(long)]
    hostname: Option<String>,

    /// Prometheus metrics port
    #[arg(long)]
    metrics_port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let config_missing = !std::path::Path::new(&args.config).exists();
    let mut config = if config_missing {
        BrokerConfig::default()
    } else {
        BrokerConfig::from_file(&args.config)?
    };

    // Override with CLI args
    if let Some(host) = args.host {
        config.broker.host = host;
    }
    if let Some(port) = args.port {
        config.broker.port = port;
    }
    if let Some(hostname) = args.hostname {
        config.broker.hostname = Some(hostname);
    }
    if let Some(metrics_port) = args.metrics_port {
        config.monitoring.prometheus_port = Some(metrics_port);
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.monitoring.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if config_missing {
        tracing::warn!("Config file {} not found, using defaults", args.config);
    }
    tracing::info!("Starting broker with config: {:?}", config);

    let broker = Arc::new(Broker::new(config.clone())?);

    if let Some(port) = config.monitoring.prometheus_port {
        let metrics_broker = broker.clone();
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(metrics_broker, port).await {
                tracing::error!("Metrics server error: {}", e);
            }
        });
    }

    let signal_broker = broker.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_broker.shutdown();
        }
    });

    broker.run().await?;

    Ok(())
}

async fn start_metrics_server(broker: Arc<Broker>, port: u16) -> anyhow::Result<()> {
    async fn metrics_handler(
        State(broker): State<Arc<Broker>>,
    ) -> Result<String, (StatusCode, String)> {
        broker
            .metrics()
            .render()
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
    }

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(broker);

    let addr = format!("0.0.0.0:{}", port);
    tracing::info!("Metrics server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
