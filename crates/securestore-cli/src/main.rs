mod cli;
mod config;
mod entries;
mod storage;

use std::io;

use crate::cli::{Command, ConfigCommand};
use clap::Parser;
use color_eyre::Result;
use securestore_core::SecureStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    match cli.command {
        Command::Entry(cmd) => {
            let store = storage::store_from_config(&config)?;
            entries::handle(&store, cmd, &mut io::stdin().lock(), &mut io::stdout().lock())?
        }
        Command::Version => print_version(),
        Command::Health => run_health_check(&config)?,
        Command::Config(ConfigCommand::Init) => init_config(&config)?,
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info; logs go to stderr so
    // they never mix with printed values.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("securestore {}", env!("CARGO_PKG_VERSION"));
}

/// Runs a quick health check of the configured secure store.
fn run_health_check(config: &config::Config) -> Result<()> {
    let store = storage::store_from_config(config)?;
    run_store_health(&store)?;
    println!("Storage: ok ({})", store.path().display());
    Ok(())
}

fn run_store_health<S: SecureStore + ?Sized>(store: &S) -> Result<()> {
    let (section, subsection, name) = ("securestore", Some("health"), "probe");
    let payload = "ok";
    store
        .set(section, subsection, name, Some(payload))
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
    let round_trip = store
        .get(section, subsection, name)
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
    store
        .unset(section, subsection, name)
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;

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
