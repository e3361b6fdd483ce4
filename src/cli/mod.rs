//! CLI commands for hiernet using clap.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{self, Settings};
use crate::core::MessageRouter;
use crate::network::{
    CapabilityRegistry, EchoNetwork, NetworkCapability, NetworkHandle, NetworkMetadata,
    NetworkType,
};
use crate::protocol::{Message, MessageType};

/// hiernet - messaging substrate for a hierarchy of cooperating networks.
#[derive(Parser)]
#[command(name = "hiernet")]
#[command(version = "0.1.0")]
#[command(about = "hiernet - route messages between cooperating networks", long_about = None)]
pub struct Commands {
    /// Settings file (defaults to ~/.hiernet/settings.json)
    #[arg(long, global = true, env = "HIERNET_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the router and idle until Ctrl-C
    Run {
        /// Seconds between statistics log lines (0 disables)
        #[arg(long, default_value_t = 60)]
        stats_interval: u64,
    },

    /// Attach echo agents and fan a query out to them
    Demo {
        /// Capability the agents advertise and the query targets
        #[arg(long, default_value = "search")]
        capability: String,

        /// Number of echo agents
        #[arg(long, default_value_t = 3)]
        agents: usize,

        /// Query text sent to the agents
        #[arg(long, default_value = "ping")]
        query: String,
    },

    /// Print the effective settings as JSON
    Config {
        /// Print the settings file path instead
        #[arg(long)]
        path: bool,
    },
}

impl Commands {
    /// Load settings from `--config` or the default location, falling back to defaults.
    pub fn settings(&self) -> Result<Settings> {
        match &self.config {
            Some(path) => Ok(config::load_settings_from(path)?),
            None => Ok(config::load_settings_or_default()),
        }
    }

    /// Run the command.
    pub async fn run(&self, settings: &Settings) -> Result<()> {
        match &self.command {
            Command::Run { stats_interval } => cmd_run(settings, *stats_interval).await,
            Command::Demo {
                capability,
                agents,
                query,
            } => cmd_demo(settings, capability, *agents, query).await,
            Command::Config { path } => cmd_config(settings, self.config.as_ref(), *path),
        }
    }
}

async fn cmd_run(settings: &Settings, stats_interval: u64) -> Result<()> {
    let router = MessageRouter::with_settings(settings.router.clone());
    router.start().await;
    tracing::info!("Router running, press Ctrl-C to stop");

    if stats_interval == 0 {
        tokio::signal::ctrl_c().await?;
    } else {
        let mut ticker = tokio::time::interval(Duration::from_secs(stats_interval));
        ticker.tick().await;
        loop {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    result?;
                    break;
                }
                _ = ticker.tick() => {
                    let stats = router.get_statistics().await;
                    tracing::info!(
                        networks = stats.registered_networks,
                        logged = stats.messages_logged,
                        routed = stats.routed,
                        undeliverable = stats.undeliverable,
                        queued = stats.queued.total,
                        "Router statistics"
                    );
                }
            }
        }
    }

    tracing::info!("Shutting down");
    router.stop().await;
    println!("{}", router.get_statistics().await);
    Ok(())
}

async fn cmd_demo(settings: &Settings, capability: &str, agents: usize, query: &str) -> Result<()> {
    let router = MessageRouter::with_settings(settings.router.clone());
    router.start().await;

    let master = Arc::new(EchoNetwork::new(
        NetworkMetadata::new("master", NetworkType::Master)
            .with_name("Master")
            .with_description("Fans queries out to specialists"),
    ));
    let master = NetworkHandle::attach(master, &router).await?;

    // Later agents are slower, so they rank lower in the registry.
    let mut registry = CapabilityRegistry::new();
    for n in 1..=agents {
        let metadata = NetworkMetadata::new(format!("agent-{}", n), NetworkType::Specialist)
            .with_capability(capability);
        let details = NetworkCapability::new(capability).with_processing_time(n as f64 * 400.0);
        let network = EchoNetwork::new(metadata).with_capability_details(vec![details]);

        let worker = NetworkHandle::attach(Arc::new(network), &router).await?;
        worker.register_capabilities(&mut registry);
        master.register_sub_network(worker).await;
    }

    println!("Providers of '{}' by quality:", capability);
    for provider in registry.find_networks_by_capability(capability, 0.0) {
        println!("  {} quality={:.3}", provider.network_id, provider.quality_score());
    }
    println!();

    let request = settings
        .protocol
        .apply(Message::new(MessageType::Query, ""))
        .with_field("query", query);
    println!("Fanning out '{}' to capability '{}'...", query, capability);

    let mut responses = master.query_capability(request, capability).await;
    responses.sort_by(|a, b| a.sender_id.cmp(&b.sender_id));

    println!("Responses ({}/{}):", responses.len(), agents);
    for response in &responses {
        println!(
            "  {} -> {}",
            response.sender_id,
            serde_json::to_string(&response.payload)?
        );
    }
    println!();
    println!("{}", master.get_metrics().await);
    println!();
    println!("{}", router.get_statistics().await);

    master.detach().await;
    router.stop().await;
    Ok(())
}

fn cmd_config(settings: &Settings, explicit: Option<&PathBuf>, show_path: bool) -> Result<()> {
    if show_path {
        let path = match explicit {
            Some(path) => path.clone(),
            None => config::get_settings_path()?,
        };
        println!("{}", path.display());
        return Ok(());
    }

    println!("{}", serde_json::to_string_pretty(settings)?);
    Ok(())
}
