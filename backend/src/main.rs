use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tree_host::config::{self, apply_overrides, load_config, save_config};
use tree_host::registry::{ViewRegistry, open_configured_views};
use tree_host::ws_server::{WsRemote, start_server};

#[derive(Parser)]
#[command(name = "tree-host")]
#[command(about = "Serve directory trees to a WebSocket tree renderer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the WebSocket server for the configured views
    Serve {
        /// Config file (defaults to the platform config dir)
        #[arg(long, short)]
        config: Option<PathBuf>,

        #[arg(long)]
        port: Option<u16>,

        /// Serve this directory as an additional view. Repeatable.
        #[arg(long)]
        root: Vec<PathBuf>,
    },
    /// Write a config file with one view per --root
    Init {
        #[arg(long, short)]
        config: Option<PathBuf>,

        #[arg(long)]
        root: Vec<PathBuf>,
    },
    /// Print the effective config
    PrintConfig {
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve { config, port, root } => serve(config, port, root).await,
        Commands::Init { config, root } => init(config, root),
        Commands::PrintConfig { config } => print_config(config),
    };

    if let Err(e) = result {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

fn config_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    explicit
        .or_else(config::default_config_path)
        .context("No config directory on this platform, pass --config")
}

async fn serve(config: Option<PathBuf>, port: Option<u16>, roots: Vec<PathBuf>) -> Result<()> {
    let path = config_path(config)?;
    let mut config = load_config(&path)?;
    apply_overrides(&mut config, port, &roots);
    if config.views.is_empty() {
        bail!(
            "No views configured in {}; add [[views]] entries or pass --root",
            path.display()
        );
    }

    let remote = WsRemote::new();
    let registry = ViewRegistry::new(remote.clone(), &config);
    if open_configured_views(&registry, &config).await == 0 {
        bail!("None of the configured views could be opened");
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let result = tokio::select! {
        result = start_server(&addr, registry.clone(), remote) => result,
        _ = tokio::signal::ctrl_c() => {
            log::info!("Shutting down");
            Ok(())
        }
    };
    registry.shutdown().await;
    result
}

fn init(config: Option<PathBuf>, roots: Vec<PathBuf>) -> Result<()> {
    let path = config_path(config)?;
    let mut config = load_config(&path)?;
    apply_overrides(&mut config, None, &roots);
    save_config(&path, &config)?;
    log::info!("Wrote {} view(s) to {}", config.views.len(), path.display());
    Ok(())
}

fn print_config(config: Option<PathBuf>) -> Result<()> {
    let path = config_path(config)?;
    let config = load_config(&path)?;
    print!("{}", config.to_toml_string().context("Failed to serialize config")?);
    Ok(())
}
