mod cli;
mod config;
mod prompt;
mod records;
mod storage;
mod vault;

use crate::cli::ConfigCommand;
use carelog_core::storage::KeyValueStore;
use clap::Parser;
use color_eyre::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Entry point wiring the CLI to the encryption manager.
#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    let prompt = prompt::TerminalPrompt::from_env();
    match cli.command.unwrap_or(cli::Command::Status) {
        cli::Command::Version => print_version(),
        cli::Command::Health => run_health_check(&config).await?,
        cli::Command::Config(ConfigCommand::Init) => init_config(&config)?,
        cli::Command::Status => vault::status(&config).await?,
        cli::Command::Enable => vault::enable(&config, &prompt).await?,
        cli::Command::Disable => vault::disable(&config, &prompt).await?,
        cli::Command::ChangePassword => vault::change_password(&config, &prompt).await?,
        cli::Command::Reset { force } => vault::reset(&config, force).await?,
        cli::Command::Read { category } => records::read(category, &config, &prompt).await?,
        cli::Command::Write { category, value } => {
            records::write(category, value, &config, &prompt).await?
        }
    }

    Ok(())
}

fn init_tracing() {
    // Logs go to stderr so `carelog read` output stays pipeable.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("carelog {}", env!("CARGO_PKG_VERSION"));
}

/// Runs a quick round trip against the record directory.
async fn run_health_check(config: &config::Config) -> Result<()> {
    let store = storage::store_from_config(config)?;
    run_store_health(&store).await?;
    println!("Storage: ok");
    Ok(())
}

async fn run_store_health<S: KeyValueStore>(store: &S) -> Result<()> {
    let probe_key = "health/probe";
    let payload = "ok";
    store.set(probe_key, payload).await?;
    let round_trip = store.get(probe_key).await?;
    store.remove(probe_key).await?;

    if round_trip.as_deref() != Some(payload) {
        color_eyre::eyre::bail!("storage round-trip failed");
    }
    Ok(())
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}
