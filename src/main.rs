//! Edge API gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────────┐
//!                      │                     API GATEWAY                       │
//!                      │                                                      │
//!   Client Request     │  ┌────────┐   ┌──────────┐   ┌────────────┐          │
//!   ───────────────────┼─▶│  http  │──▶│   auth   │──▶│  dispatch  │          │
//!                      │  │ server │   │ + limits │   │ (routing)  │          │
//!                      │  └────────┘   └──────────┘   └─────┬──────┘          │
//!                      │                                    │                 │
//!                      │                 ┌──────────────────┴─────┐           │
//!                      │                 ▼                        ▼           │
//!                      │         ┌──────────────┐        ┌──────────────┐     │
//!   Client Response    │         │    proxy     │        │   producer   │     │
//!   ◀──────────────────┼─────────│  forwarder   │        │ (202 accept) │     │
//!                      │         └──────┬───────┘        └──────┬───────┘     │
//!                      │                │                       ▼             │
//!                      │                │               ┌──────────────┐      │
//!                      │                │               │    broker    │      │
//!                      │                │               └──────┬───────┘      │
//!                      │                │                      ▼              │
//!                      │                │               ┌──────────────┐      │
//!                      │                │               │    worker    │      │
//!                      │                │               │ retry / DLQ  │      │
//!                      │                │               └──────────────┘      │
//!                      └────────────────┼─────────────────────────────────────┘
//!                                       ▼
//!                                 Backend services
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use api_gateway::broker::{Broker, InMemoryBroker};
use api_gateway::config::{load_config, ConfigWatcher, GatewayConfig};
use api_gateway::http::HttpServer;
use api_gateway::lifecycle::{wait_for_shutdown_signal, Shutdown};
use api_gateway::observability::{logging, metrics};
use api_gateway::routing::{RouteTable, RouteTarget};
use api_gateway::worker::{
    dead_letter_queue_name, CommandConsumer, ConsumerSettings, HandlerRegistry,
    InMemoryEventData, RewardRequestHandler, CREATE_REWARD_REQUEST,
};

#[derive(Parser)]
#[command(name = "api-gateway")]
#[command(about = "Edge API gateway: reverse proxy and async command dispatch", long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config/gateway.toml")]
    config: PathBuf,

    /// Print the compiled route table and exit
    #[arg(long)]
    print_routes: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = load_config(&args.config)?;

    if args.check {
        println!("{}: ok ({} routes)", args.config.display(), config.routes.len());
        return Ok(());
    }
    if args.print_routes {
        print_routes(&config)?;
        return Ok(());
    }

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "api-gateway starting");
    tracing::info!(
        config = %args.config.display(),
        bind_address = %config.listener.bind_address,
        routes = config.routes.len(),
        queue = %config.broker.queue,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();

    // Broker and worker
    let broker = InMemoryBroker::with_capacity(config.broker.queue_capacity);
    broker
        .declare_queue(&config.broker.queue, config.broker.durable)
        .await?;
    let settings = ConsumerSettings::from_config(config.broker.queue.clone(), &config.consumer);
    if let Some(dlq) = &settings.dead_letter_queue {
        broker.declare_queue(dlq, true).await?;
    }

    let mut consumer_task = None;
    if config.consumer.enabled {
        let handlers = HandlerRegistry::new().register(
            CREATE_REWARD_REQUEST,
            Arc::new(RewardRequestHandler::new(Arc::new(InMemoryEventData::new()))),
        );
        let source = broker.consume(&config.broker.queue, settings.no_ack).await?;
        let consumer = Arc::new(CommandConsumer::new(
            Arc::new(broker.clone()),
            Arc::new(handlers),
            settings,
        ));
        consumer_task = Some(tokio::spawn(consumer.run(source, shutdown.subscribe())));
    } else {
        tracing::warn!(
            queue = %config.broker.queue,
            dead_letter_queue = %dead_letter_queue_name(&config.broker.queue),
            "Command consumer disabled; commands will accumulate"
        );
    }

    // Hot reload
    let (_watcher, config_updates) = if config.reload.watch_config {
        let (watcher, updates) = ConfigWatcher::new(&args.config);
        match watcher.run() {
            Ok(handle) => (Some(handle), updates),
            Err(e) => {
                tracing::error!(error = %e, "Config watcher failed to start; reload disabled");
                (None, updates)
            }
        }
    } else {
        let (_, updates) = mpsc::unbounded_channel();
        (None, updates)
    };

    // Listener last
    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::new(config, Arc::new(broker))?;
    let server_task = tokio::spawn(server.run(listener, config_updates, shutdown.subscribe()));

    wait_for_shutdown_signal().await;
    shutdown.trigger();

    server_task.await??;
    if let Some(task) = consumer_task {
        task.await?;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

fn print_routes(config: &GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    let table = RouteTable::from_config(&config.routes)?;
    println!("{:<45} {:<24} {:<5} {:<24} TARGET", "PATTERN", "METHODS", "AUTH", "ROLES");
    for route in table.routes() {
        let methods = if route.methods.is_empty() {
            "*".to_string()
        } else {
            route
                .methods
                .iter()
                .map(|m| m.as_str())
                .collect::<Vec<_>>()
                .join(",")
        };
        let target = match &route.target {
            RouteTarget::Proxy { base_url } => format!("proxy {base_url}"),
            RouteTarget::Command(command) => format!("command {}", command.pattern),
        };
        println!(
            "{:<45} {:<24} {:<5} {:<24} {}",
            route.pattern(),
            methods,
            if route.require_auth { "yes" } else { "no" },
            route.required_roles.join(","),
            target
        );
    }
    Ok(())
}
