use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use synapse_gateway::{
    RouterError,
    adapters::{ArtifactDeployer, RouterService},
    config::{GatewayConfig, ServerConfigValidator, load_or_default},
    core::{Position, artifacts::ApiParser},
    tracing_setup,
    utils::GracefulShutdown,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    /// Configuration file; built-in defaults are used when omitted
    #[clap(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Start the gateway server (default)
    Serve,
    /// Load and validate the configuration file
    Validate,
    /// Parse API artifacts and print their resources
    CheckApi {
        /// API artifact files
        #[clap(required = true)]
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let config_path = args.config.as_deref();

    match args.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config_path).await,
        Commands::Validate => validate_config_command(config_path),
        Commands::CheckApi { files } => check_api_command(&files),
    }
}

fn load_validated(config_path: Option<&Path>) -> Result<GatewayConfig> {
    let config = load_or_default(config_path)?;
    ServerConfigValidator::validate(&config).context("Invalid configuration")?;
    Ok(config)
}

async fn serve(config_path: Option<&Path>) -> Result<()> {
    let config = load_validated(config_path)?;
    tracing_setup::init_tracing(&config.logging)
        .map_err(|e| eyre!("Failed to initialize tracing: {e}"))?;

    match config_path {
        Some(path) => tracing::info!(config = %path.display(), "configuration loaded"),
        None => tracing::info!("no configuration file given, using defaults"),
    }

    let graceful_shutdown = Arc::new(GracefulShutdown::new());
    let router = RouterService::new(config.server.clone(), graceful_shutdown.clone());

    if let Some(dir) = &config.deployment.artifacts_dir {
        let parser = ApiParser::default();
        let deployed = ArtifactDeployer::new(&parser, &router)
            .deploy_directory(dir)
            .await
            .with_context(|| format!("Failed to deploy artifacts from {}", dir.display()))?;
        tracing::info!(deployed, "artifact deployment finished");
    }

    // Serve `/livez` even when nothing was deployed.
    let address = router
        .start_server()
        .await
        .context("Failed to start HTTP server")?;
    tracing::info!(%address, "gateway ready");

    graceful_shutdown.run_signal_handler().await;

    // Connections still open after the drain window are aborted.
    match router.shutdown(config.server.shutdown_timeout()).await {
        Ok(()) => tracing::info!("gateway stopped"),
        Err(RouterError::ShutdownTimeout(deadline)) => {
            tracing::warn!(?deadline, "gateway stopped with requests still in flight");
        }
        Err(e) => return Err(e).context("Graceful shutdown did not complete"),
    }
    Ok(())
}

fn validate_config_command(config_path: Option<&Path>) -> Result<()> {
    let source = config_path.map_or_else(|| "<defaults>".to_string(), |p| p.display().to_string());
    println!("Validating configuration: {source}");

    let config = load_or_default(config_path)?;
    println!("Configuration parsing: OK");

    if let Err(e) = ServerConfigValidator::validate(&config) {
        eprintln!("Configuration validation failed:");
        eprintln!("{e}");
        std::process::exit(1);
    }

    println!("Configuration validation: OK");
    println!();
    println!("Configuration summary:");
    println!("  listen address:   {}", config.server.listen_address());
    println!("  auto start:       {}", config.server.auto_start);
    println!("  shutdown timeout: {}", config.server.shutdown_timeout);
    println!(
        "  default CORS:     {}",
        config.server.cors.as_ref().is_some_and(|c| c.enabled)
    );
    println!("  log level:        {}", config.logging.level);
    if let Some(dir) = &config.deployment.artifacts_dir {
        println!("  artifacts dir:    {}", dir.display());
    }
    Ok(())
}

fn check_api_command(files: &[PathBuf]) -> Result<()> {
    let parser = ApiParser::default();
    let mut failures = 0;

    for file in files {
        let xml = std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let file_name = file.display().to_string();

        match parser.unmarshal(&xml, &Position::new(file_name, 1)) {
            Ok(api) => {
                println!("{}: API '{}' at {}", file.display(), api.name, api.base_path());
                for resource in &api.resources {
                    let methods = if resource.methods.is_empty() {
                        "*".to_string()
                    } else {
                        resource
                            .methods
                            .iter()
                            .map(|m| m.as_str())
                            .collect::<Vec<_>>()
                            .join(",")
                    };
                    println!(
                        "  {methods:<12} {:<32} in={} fault={}",
                        resource.uri_template.full_template,
                        resource.in_sequence.len(),
                        resource.fault_sequence.len()
                    );
                }
            }
            Err(e) => {
                failures += 1;
                eprintln!("{e}");
            }
        }
    }

    if failures > 0 {
        return Err(eyre!("{failures} of {} artifacts failed to parse", files.len()));
    }
    Ok(())
}
