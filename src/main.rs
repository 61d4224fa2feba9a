//! Enterprise Mock Server - CLI Entry Point

use anyhow::Result;
use clap::Parser;
use enterprise_mock_server::{HandlerCatalog, MockServer, MockServerConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "enterprise-mock-server",
    about = "Mock server for enterprise backend systems - layered mock data and failure simulation",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "mock-server.yaml")]
    config: PathBuf,

    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    listen: SocketAddr,

    /// Override the data root from the configuration file
    #[arg(short, long, value_name = "DIR")]
    data_root: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,

    /// Load systems and bind endpoints before accepting requests
    #[arg(long)]
    eager: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.print_config {
        let default_config = include_str!("../demos/default-config.yaml");
        println!("{}", default_config);
        return Ok(());
    }

    let mut config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        MockServerConfig::from_file(&args.config)?
    } else if args.validate {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        warn!(path = ?args.config, "Configuration file not found, starting with no systems");
        MockServerConfig::default()
    };

    if let Some(data_root) = args.data_root {
        config.settings.data_root = data_root;
    }

    if args.validate {
        config.validate()?;
        println!(
            "Configuration is valid ({} systems, {} endpoints defined)",
            config.systems.len(),
            config.endpoint_count()
        );
        return Ok(());
    }

    info!(
        data_root = %config.settings.data_root.display(),
        systems = config.systems.len(),
        profile = ?config.settings.profile,
        "Starting mock server"
    );

    let server = Arc::new(MockServer::from_config(config, HandlerCatalog::new())?);
    if args.eager {
        let routes = server.route_table().await?;
        info!(routes = routes.len(), "Endpoints bound at startup");
    }

    let listener = TcpListener::bind(args.listen).await?;
    server.run(listener).await?;

    Ok(())
}
