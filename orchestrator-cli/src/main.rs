mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use orchestrator_core::config::AppConfig;

#[derive(Parser)]
#[command(name = "orchestrator-cli")]
#[command(about = "Operator CLI for the local multi-model LLM orchestrator")]
#[command(version = "0.3.0")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan the configured model directory and rebuild the registry
    Discover,
    /// Rescan, preserving user overrides for models still present
    Rescan,
    /// Print the current registry
    Registry,
    /// Enable or disable a model
    SetEnabled {
        model_id: String,
        #[arg(long)]
        enabled: bool,
    },
    /// Override a model's assigned tier
    SetTier { model_id: String, tier: String },
    /// Override a model's thinking-mode flag
    SetThinking {
        model_id: String,
        #[arg(long)]
        enabled: bool,
    },
    /// Update the discovery port range
    SetPortRange { lo: u16, hi: u16 },
    /// Enable or disable a batch of models at once
    BulkSetEnabled {
        model_ids: Vec<String>,
        #[arg(long)]
        enabled: bool,
    },
    /// Start every enabled model's inference server
    ServersStartAll,
    /// Stop every tracked inference server
    ServersStopAll,
    /// Stop then restart every enabled model's inference server
    ServersRestartAll,
    /// List configured instances
    InstancesList,
    /// Create a new instance of a base model
    InstancesCreate {
        base_model_id: String,
        display_name: String,
        #[arg(long)]
        system_prompt: Option<String>,
        #[arg(long, default_value_t = false)]
        web_search: bool,
    },
    /// Start an instance's inference server
    InstancesStart { instance_id: String },
    /// Stop an instance's inference server
    InstancesStop { instance_id: String },
    /// Delete a stopped instance
    InstancesDelete { instance_id: String },
    /// Submit a query (mode: simple|two-stage|council|benchmark)
    Query {
        text: String,
        #[arg(long, default_value = "simple")]
        mode: String,
        #[arg(long, default_value_t = false)]
        use_context: bool,
        #[arg(long, default_value_t = false)]
        use_web_search: bool,
    },
    /// Print a summary for one metric over a time range (1h|6h|24h|7d|30d)
    MetricsSummary { metric: String, #[arg(long, default_value = "1h")] range: String },
    /// Print the (possibly downsampled) time series for one metric
    MetricsTimeSeries { metric: String, #[arg(long, default_value = "1h")] range: String },
    /// Print the current topology health snapshot
    TopologySnapshot,
    /// Subscribe to the event stream for a fixed duration
    EventsWatch {
        #[arg(long, default_value_t = 30)]
        duration_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load()?;

    match cli.command {
        Commands::Discover => commands::discover(&config).await,
        Commands::Rescan => commands::rescan(&config).await,
        Commands::Registry => commands::show_registry(&config).await,
        Commands::SetEnabled { model_id, enabled } => commands::set_enabled(&config, &model_id, enabled).await,
        Commands::SetTier { model_id, tier } => commands::set_tier_override(&config, &model_id, &tier).await,
        Commands::SetThinking { model_id, enabled } => commands::set_thinking_override(&config, &model_id, enabled).await,
        Commands::SetPortRange { lo, hi } => commands::set_port_range(&config, lo, hi).await,
        Commands::BulkSetEnabled { model_ids, enabled } => commands::bulk_set_enabled(&config, &model_ids, enabled).await,
        Commands::ServersStartAll => commands::servers_start_all(&config).await,
        Commands::ServersStopAll => commands::servers_stop_all(&config).await,
        Commands::ServersRestartAll => commands::servers_restart_all(&config).await,
        Commands::InstancesList => commands::instances_list(&config).await,
        Commands::InstancesCreate { base_model_id, display_name, system_prompt, web_search } => {
            commands::instances_create(&config, &base_model_id, &display_name, system_prompt, web_search).await
        }
        Commands::InstancesStart { instance_id } => commands::instances_start(&config, &instance_id).await,
        Commands::InstancesStop { instance_id } => commands::instances_stop(&config, &instance_id).await,
        Commands::InstancesDelete { instance_id } => commands::instances_delete(&config, &instance_id).await,
        Commands::Query { text, mode, use_context, use_web_search } => {
            commands::query(&config, &mode, &text, use_context, use_web_search).await
        }
        Commands::MetricsSummary { metric, range } => commands::metrics_summary(&metric, &range).await,
        Commands::MetricsTimeSeries { metric, range } => commands::metrics_time_series(&metric, &range).await,
        Commands::TopologySnapshot => commands::topology_snapshot(&config).await,
        Commands::EventsWatch { duration_secs } => commands::events_watch(duration_secs).await,
    }
}
