use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[cfg(feature = "integration_elvia")]
use anyhow::Context;
use clap::Parser;
use clap::Subcommand;
#[cfg(feature = "integration_elvia")]
use tariffd::config::ElviaConfig;
#[cfg(feature = "integration_elvia")]
use tariffd::integrations::elvia;
use tariffd::Config;
use tariffd::Engine;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(version, about = "Grid tariff sensors from the Elvia API")]
struct Cli {
    /// Config file; repeat to merge several files
    #[arg(short, long = "config", default_value = "tariffd.toml")]
    config: Vec<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon (default)
    Run,
    /// Validate the config and the Elvia API key
    Check,
    /// Refresh once and print the Elvia diagnostics
    #[cfg(feature = "integration_elvia")]
    Diagnostics,
    /// List the tariff types the API offers
    #[cfg(feature = "integration_elvia")]
    TariffTypes,
    /// Print the prices of a tariff
    #[cfg(feature = "integration_elvia")]
    TariffQuery {
        tariff_key: String,
        #[arg(long, default_value = "today")]
        range: elvia::TariffRange,
    },
}

fn init_logging(config: &Config) {
    let targets = config
        .logging
        .overrides
        .iter()
        .fold(
            Targets::new().with_default(LevelFilter::from(config.logging.level)),
            |targets, (target, level)| targets.with_target(target.clone(), LevelFilter::from(*level)),
        );

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(targets)
        .init();
}

#[cfg(feature = "integration_elvia")]
fn elvia_config(config: &Config) -> anyhow::Result<&ElviaConfig> {
    config
        .integrations
        .elvia
        .as_ref()
        .context("No [integrations.elvia] section in config")
}

#[cfg(feature = "integration_elvia")]
async fn check_integrations(config: &Config) -> anyhow::Result<()> {
    if let Some(elvia_config) = &config.integrations.elvia {
        elvia::check(elvia_config).await?;
        println!("Elvia API key accepted");
    }
    Ok(())
}

#[cfg(not(feature = "integration_elvia"))]
async fn check_integrations(_config: &Config) -> anyhow::Result<()> {
    Ok(())
}

async fn run(config: Config) -> anyhow::Result<()> {
    tracing::info!("tariffd starting");

    let engine = Arc::new(Engine::new());
    engine.register_integrations_from_config(&config);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let api = config.api.clone().map(|api_config| {
        let engine = engine.clone();
        tokio::spawn(async move { tariffd::api::serve(api_config, engine, shutdown_rx).await })
    });

    let runner = engine.clone();
    tokio::select! {
        _ = runner.run() => {
            tracing::warn!("Engine stopped unexpectedly");
        }
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => tracing::info!("Received shutdown signal"),
                Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
            }
        }
    }

    let _ = shutdown_tx.send(());
    if let Some(api) = api {
        match api.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("HTTP API server failed: {:#}", e),
            Err(e) => tracing::error!("HTTP API task ended abnormally: {}", e),
        }
    }

    engine.shutdown().await;
    tracing::info!("tariffd shutdown complete");
    Ok(())
}

async fn execute(cli: Cli, config: Config) -> anyhow::Result<()> {
    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Check => {
            check_integrations(&config).await?;
            println!("Configuration OK");
            Ok(())
        }
        #[cfg(feature = "integration_elvia")]
        Command::Diagnostics => {
            let diagnostics = elvia::fetch_diagnostics(elvia_config(&config)?).await?;
            println!("{}", serde_json::to_string_pretty(&diagnostics)?);
            Ok(())
        }
        #[cfg(feature = "integration_elvia")]
        Command::TariffTypes => {
            for tariff_type in elvia::tariff_types(elvia_config(&config)?).await? {
                println!(
                    "{}\t{}\t{} min\t{}",
                    tariff_type.tariff_key,
                    tariff_type.title,
                    tariff_type.resolution,
                    tariff_type.description
                );
            }
            Ok(())
        }
        #[cfg(feature = "integration_elvia")]
        Command::TariffQuery { tariff_key, range } => {
            let query = elvia::TariffQuery::new(tariff_key).range(range);
            let tariff = elvia::tariff_query(elvia_config(&config)?, &query).await?;
            println!("{}", serde_json::to_string_pretty(&tariff)?);
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let (config, warnings) = match Config::from_files(&cli.config) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config);
    if !warnings.0.is_empty() {
        eprint!("{}", warnings);
    }

    match execute(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
