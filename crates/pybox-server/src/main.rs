//! pybox server binary
//!
//! Loads configuration, connects to Docker, makes sure the executor image
//! exists and serves the execution API until interrupted.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::LevelFilter;
use pybox_core::config::SandboxConfig;
use pybox_core::runtime::{ensure_image, BuildContext, DockerRuntime, RuntimeClient};
use pybox_core::{ConfigLoader, ExecutionOrchestrator};
use pybox_server::{shutdown_signal, AppState, SandboxServer, ServerConfig};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[clap(author, version, about = "pybox - sandboxed Python execution service")]
struct Cli {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(long, short, help = "Optional YAML configuration file; environment variables override it")]
    config: Option<PathBuf>,

    #[clap(long, help = "Bind address, overrides API_HOST/API_PORT")]
    bind_addr: Option<String>,

    #[clap(long, short, help = "Log level, overrides LOG_LEVEL")]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the execution server (default command)
    Run {
        #[clap(long, help = "Disable CORS headers")]
        no_cors: bool,
    },
    /// Build the executor image and exit
    BuildImage {
        #[clap(long, help = "Rebuild even if the image already exists")]
        force: bool,
    },
    /// Validate the configuration and print it
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::load(cli.config.as_deref())
        .await
        .context("Failed to load configuration")?;

    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    let log_level_filter = level.parse().unwrap_or(LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(log_level_filter)
        .init();

    match cli.command {
        None => run_server(config, cli.bind_addr, true).await,
        Some(Commands::Run { no_cors }) => run_server(config, cli.bind_addr, !no_cors).await,
        Some(Commands::BuildImage { force }) => build_image(config, force).await,
        Some(Commands::CheckConfig) => {
            let rendered = serde_json::to_string_pretty(&config)?;
            println!("{}", rendered);
            Ok(())
        }
    }
}

fn build_context(config: &SandboxConfig) -> BuildContext {
    BuildContext {
        context_dir: config.executor.build_context.clone(),
        dockerfile: config.executor.dockerfile_path.clone(),
    }
}

async fn run_server(config: SandboxConfig, bind_addr: Option<String>, cors: bool) -> Result<()> {
    log::info!("Starting pybox server...");
    log::info!("Configuration:");
    log::info!("  Executor image: {}", config.executor.image_name);
    log::info!(
        "  Limits: memory {}, cpu quota {}/{}, default timeout {}s",
        config.container.memory_limit,
        config.container.cpu_quota,
        pybox_core::config::CPU_PERIOD_MICROS,
        config.container.default_timeout_secs
    );
    log::info!(
        "  Run as '{}', network disabled: {}",
        config.container.user,
        config.container.network_disabled
    );
    log::info!("  Allowed work_dir root: {}", config.workspace.allowed_work_dir_root);

    let docker = DockerRuntime::connect(&config.docker)
        .await
        .context("Docker is not reachable")?;
    let runtime: Arc<dyn RuntimeClient> = Arc::new(docker.clone());

    // A missing image leaves the server up but degraded.
    if let Err(e) = ensure_image(runtime.as_ref(), &config.executor.image_name, &build_context(&config)).await
    {
        log::error!(
            "Executor image '{}' is not available: {}",
            config.executor.image_name,
            e
        );
    }

    let orchestrator = Arc::new(
        ExecutionOrchestrator::new(runtime.clone(), &config)
            .context("Invalid container configuration")?,
    );

    let bind_addr = bind_addr.unwrap_or_else(|| config.api.bind_addr());
    let server_config = ServerConfig::new()
        .with_bind_addr_str(&bind_addr)?
        .with_cors(cors);

    let server = SandboxServer::with_config(AppState::new(orchestrator, runtime), server_config);
    server.serve_with_shutdown(shutdown_signal()).await?;

    docker.close();
    Ok(())
}

async fn build_image(config: SandboxConfig, force: bool) -> Result<()> {
    let docker = DockerRuntime::connect(&config.docker)
        .await
        .context("Docker is not reachable")?;
    let context = build_context(&config);
    let image = &config.executor.image_name;

    if force {
        log::info!("Rebuilding executor image '{}'", image);
        docker.build_image(image, &context).await?;
    } else if !ensure_image(&docker, image, &context).await? {
        println!("Executor image '{}' already exists (use --force to rebuild)", image);
    }

    println!("Executor image '{}' is ready", image);
    docker.close();
    Ok(())
}
