//! chainregistry CLI — replicate an on-chain member registry.
//!
//! Usage:
//! ```bash
//! chainregistry --network mainnet --db registry.db bootstrap
//! chainregistry --network mainnet --db registry.db follow
//! chainregistry verify --uri https://example.org/doc.json --hash 0x…
//! chainregistry networks
//! ```

mod app;
mod tracing_setup;

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;

use chainregistry_core::RegistryConfig;
use chainregistry_sync::BatchReport;

use app::Replica;

#[derive(Parser)]
#[command(name = "chainregistry", version)]
#[command(about = "Replicate an on-chain member registry into a local record store")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "chainregistry.toml", env = "CHAINREGISTRY_CONFIG")]
    config: String,

    /// Network name from the configuration file
    #[arg(short, long, default_value = "mainnet", env = "CHAINREGISTRY_NETWORK")]
    network: String,

    /// SQLite database path; records are kept in memory when omitted
    #[arg(long, env = "CHAINREGISTRY_DB")]
    db: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Walk every segment and synchronize all members once
    Bootstrap,
    /// Apply live registry events, with one bootstrap pass alongside
    Follow,
    /// Fetch one document and check it against a commitment
    Verify {
        #[arg(long)]
        uri: String,
        /// Expected content hash (0x-prefixed hex)
        #[arg(long)]
        hash: Option<String>,
    },
    /// List configured networks
    Networks,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = if Path::new(&cli.config).exists() {
        RegistryConfig::load(&cli.config)?
    } else {
        RegistryConfig::default()
    };
    tracing_setup::init_tracing(&config.logging);
    tracing::debug!(config = %cli.config, network = %cli.network, "starting");

    match cli.command {
        Command::Bootstrap => cmd_bootstrap(&config, &cli.network, cli.db.as_deref()).await,
        Command::Follow => cmd_follow(&config, &cli.network, cli.db.as_deref()).await,
        Command::Verify { uri, hash } => cmd_verify(&config, &cli.network, &uri, hash.as_deref()).await,
        Command::Networks => {
            cmd_networks(&config);
            Ok(())
        }
    }
}

async fn cmd_bootstrap(config: &RegistryConfig, network: &str, db: Option<&str>) -> anyhow::Result<()> {
    let net = config.network(network)?;
    let store = app::open_store(db).await?;
    let replica = Replica::build(config, net, store)?;

    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received");
            let _ = tx.send(true);
        }
    });

    let index = replica
        .walker
        .enumerate_members()
        .await
        .context("walking registry segments")?;
    let report = replica.synchronizer.sync_all(&index, rx).await;
    print_report(&report);

    replica.supervisor.shutdown().await;
    Ok(())
}

async fn cmd_follow(config: &RegistryConfig, network: &str, db: Option<&str>) -> anyhow::Result<()> {
    let net = config.network(network)?;
    let store = app::open_store(db).await?;
    let replica = Replica::build(config, net, store)?;
    let (tx, rx) = watch::channel(false);

    let applier = replica.applier.clone();
    let applier_rx = rx.clone();
    let mut applier_task = tokio::spawn(async move { applier.run(applier_rx).await });

    let walker = replica.walker;
    let synchronizer = replica.synchronizer.clone();
    let bootstrap_rx = rx.clone();
    let bootstrap_task = tokio::spawn(async move {
        match walker.enumerate_members().await {
            Ok(index) => print_report(&synchronizer.sync_all(&index, bootstrap_rx).await),
            Err(e) => tracing::error!(error = %e, "bootstrap walk failed"),
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received, shutting down");
        }
        result = &mut applier_task => {
            // The applier only stops on its own for fatal errors.
            result??;
        }
    }

    let _ = tx.send(true);
    let grace = config.sync.shutdown_grace() + Duration::from_secs(1);
    if tokio::time::timeout(grace, bootstrap_task).await.is_err() {
        tracing::warn!("bootstrap pass did not stop within the grace period");
    }
    if !applier_task.is_finished() {
        if let Ok(result) = tokio::time::timeout(grace, &mut applier_task).await {
            result??;
        }
    }

    replica.supervisor.shutdown().await;
    Ok(())
}

async fn cmd_verify(config: &RegistryConfig, network: &str, uri: &str, hash: Option<&str>) -> anyhow::Result<()> {
    let verifier = app::verifier(config, config.networks.get(network))?;
    let resolution = verifier.resolve(uri, hash).await;

    println!("status:    {}", resolution.status.label());
    println!("verified:  {}", resolution.verified);
    println!("algorithm: {:?}", verifier.algorithm());
    if let Some(content) = &resolution.content {
        println!("{}", serde_json::to_string_pretty(content)?);
    }
    Ok(())
}

fn cmd_networks(config: &RegistryConfig) {
    if config.networks.is_empty() {
        println!("no networks configured");
        return;
    }
    for (name, net) in &config.networks {
        println!("{name}");
        println!("  ws:         {}", net.ws_url);
        if let Some(http) = &net.http_url {
            println!("  http:       {http}");
        }
        println!("  entrypoint: {}", net.entrypoint);
        println!("  from block: {}", net.deployment_block);
        println!("  hash:       {:?}", net.hash_algorithm);
    }
}

fn print_report(report: &BatchReport) {
    println!(
        "synced {} / {} members ({} failed, {} not attempted{})",
        report.synced,
        report.total(),
        report.failed.len(),
        report.not_attempted,
        if report.interrupted { ", interrupted" } else { "" },
    );
    for (address, error) in &report.failed {
        println!("  {address}: {error}");
    }
}
