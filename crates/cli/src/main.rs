use std::{path::PathBuf, sync::Arc};

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use furrow_gateway::services::GatewayServices;

#[derive(Parser)]
#[command(name = "furrow", about = "Furrow — field equipment gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway.
    Gateway {
        /// Config file to load (skips discovery).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override the TCP bind address.
        #[arg(long)]
        bind: Option<String>,
        /// Override the TCP port.
        #[arg(long)]
        port: Option<u16>,
        /// Force the route simulator on.
        #[arg(long, default_value_t = false)]
        simulate: bool,
    },
    /// Print the resolved implement profile.
    Profile {
        /// Profile file to load instead of the configured one.
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

async fn run_gateway(
    config_path: Option<PathBuf>,
    bind: Option<String>,
    port: Option<u16>,
    simulate: bool,
) -> anyhow::Result<()> {
    let mut config = match config_path {
        Some(path) => furrow_config::load_config(&path)?,
        None => furrow_config::discover_and_load(),
    };
    if let Some(bind) = bind {
        config.gateway.tcp_bind = bind;
    }
    if let Some(port) = port {
        config.gateway.tcp_port = port;
    }
    if simulate {
        config.simulator.enabled = true;
    }

    let services = GatewayServices::production(&config.update.service_unit);
    let gateway = furrow_gateway::server::start_gateway(&config, services).await?;

    if config.simulator.enabled {
        let profile =
            furrow_config::load_implement_profile(config.implement.profile_path.as_deref())?;
        furrow_sim::RouteSimulator::new(&config.simulator, &profile)
            .spawn(Arc::clone(&gateway.state));
        info!("route simulator enabled");
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "furrow starting");

    match cli.command {
        Commands::Gateway {
            config,
            bind,
            port,
            simulate,
        } => run_gateway(config, bind, port, simulate).await,
        Commands::Profile { path } => {
            let profile = furrow_config::load_implement_profile(path.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&profile.to_payload())?);
            Ok(())
        },
    }
}
