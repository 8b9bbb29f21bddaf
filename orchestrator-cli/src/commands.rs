//! Operator-facing command implementations (spec §6).
//!
//! Each command builds the core services it needs directly from `AppConfig`
//! and exits after one operation; there is no long-lived daemon.

use anyhow::{anyhow, Context, Result};
use orchestrator_core::config::AppConfig;
use orchestrator_core::event_bus::EventBus;
use orchestrator_core::instance_manager::InstanceManager;
use orchestrator_core::metrics_aggregator::{MetricsAggregator, TagFilter};
use orchestrator_core::orchestrator::QueryOrchestrator;
use orchestrator_core::selector::ModelSelector;
use orchestrator_core::server_manager::ServerManager;
use orchestrator_core::topology_tracker::TopologyTracker;
use orchestrator_core::{discovery, registry};
use orchestrator_types::{
    ModelRegistry, ModelTier, QueryMode, QueryRequest, ServerKey,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;

fn parse_tier(raw: &str) -> Result<ModelTier> {
    match raw.to_ascii_lowercase().as_str() {
        "fast" => Ok(ModelTier::Fast),
        "balanced" => Ok(ModelTier::Balanced),
        "powerful" => Ok(ModelTier::Powerful),
        other => Err(anyhow!("unknown tier `{other}`, expected fast|balanced|powerful")),
    }
}

fn parse_mode(raw: &str) -> Result<QueryMode> {
    match raw.to_ascii_lowercase().as_str() {
        "simple" => Ok(QueryMode::Simple),
        "two-stage" | "twostage" => Ok(QueryMode::TwoStage),
        "council" => Ok(QueryMode::Council),
        "benchmark" => Ok(QueryMode::Benchmark),
        other => Err(anyhow!("unknown mode `{other}`, expected simple|two-stage|council|benchmark")),
    }
}

async fn load_registry(config: &AppConfig) -> Result<ModelRegistry> {
    let path = config.registry_path()?;
    if path.exists() {
        Ok(registry::load(&path)?)
    } else {
        let scan_dir = config.model_dirs()?.into_iter().next().ok_or_else(|| anyhow!("no model_dirs configured"))?;
        Ok(discovery::discover(&scan_dir, config.discovery.port_range, config.discovery.powerful_threshold, config.discovery.fast_threshold)?)
    }
}

async fn save_registry(config: &AppConfig, reg: &ModelRegistry) -> Result<()> {
    let path = config.registry_path()?;
    registry::save(reg, &path)?;
    Ok(())
}

pub async fn discover(config: &AppConfig) -> Result<()> {
    let scan_dir = config.model_dirs()?.into_iter().next().ok_or_else(|| anyhow!("no model_dirs configured"))?;
    let reg = discovery::discover(&scan_dir, config.discovery.port_range, config.discovery.powerful_threshold, config.discovery.fast_threshold)?;
    info!(count = reg.models.len(), "discovered models");
    save_registry(config, &reg).await?;
    print_registry(&reg);
    Ok(())
}

pub async fn rescan(config: &AppConfig) -> Result<()> {
    let existing = load_registry(config).await?;
    let scan_dir = config.model_dirs()?.into_iter().next().ok_or_else(|| anyhow!("no model_dirs configured"))?;
    let updated = discovery::rescan_and_update(&existing, &scan_dir, config.discovery.powerful_threshold, config.discovery.fast_threshold)?;
    save_registry(config, &updated).await?;
    print_registry(&updated);
    Ok(())
}

pub async fn show_registry(config: &AppConfig) -> Result<()> {
    print_registry(&load_registry(config).await?);
    Ok(())
}

fn print_registry(reg: &ModelRegistry) {
    let mut ids: Vec<&String> = reg.models.keys().collect();
    ids.sort();
    for id in ids {
        let model = &reg.models[id];
        println!(
            "{:<40} tier={:<9} enabled={:<5} port={:?}",
            id,
            model.effective_tier().to_string(),
            model.enabled,
            model.port
        );
    }
}

pub async fn set_enabled(config: &AppConfig, model_id: &str, enabled: bool) -> Result<()> {
    let mut reg = load_registry(config).await?;
    let model = reg.models.get_mut(model_id).ok_or_else(|| anyhow!("no such model: {model_id}"))?;
    model.enabled = enabled;
    save_registry(config, &reg).await
}

pub async fn set_tier_override(config: &AppConfig, model_id: &str, tier: &str) -> Result<()> {
    let mut reg = load_registry(config).await?;
    let tier = parse_tier(tier)?;
    let model = reg.models.get_mut(model_id).ok_or_else(|| anyhow!("no such model: {model_id}"))?;
    model.tier_override = Some(tier);
    save_registry(config, &reg).await
}

pub async fn set_thinking_override(config: &AppConfig, model_id: &str, thinking: bool) -> Result<()> {
    let mut reg = load_registry(config).await?;
    let model = reg.models.get_mut(model_id).ok_or_else(|| anyhow!("no such model: {model_id}"))?;
    model.thinking_override = Some(thinking);
    save_registry(config, &reg).await
}

pub async fn set_port_range(config: &AppConfig, lo: u16, hi: u16) -> Result<()> {
    if lo >= hi {
        return Err(anyhow!("port range lower bound must be below the upper bound"));
    }
    let mut reg = load_registry(config).await?;
    reg.port_range = (lo, hi);
    save_registry(config, &reg).await
}

pub async fn bulk_set_enabled(config: &AppConfig, model_ids: &[String], enabled: bool) -> Result<()> {
    let mut reg = load_registry(config).await?;
    for id in model_ids {
        if let Some(model) = reg.models.get_mut(id) {
            model.enabled = enabled;
        } else {
            eprintln!("warning: no such model: {id}");
        }
    }
    save_registry(config, &reg).await
}

fn build_server_manager(config: &AppConfig) -> Arc<ServerManager> {
    Arc::new(ServerManager::new(config.server.clone()))
}

pub async fn servers_start_all(config: &AppConfig) -> Result<()> {
    let reg = load_registry(config).await?;
    let manager = build_server_manager(config);
    let models: Vec<_> = reg.enabled_models().cloned().collect();
    let results = manager.start_all(models).await;
    for (model_id, result) in results {
        match result {
            Ok(process) => println!("{model_id}: started on port {}", process.port),
            Err(e) => eprintln!("{model_id}: failed to start: {e}"),
        }
    }
    Ok(())
}

pub async fn servers_stop_all(config: &AppConfig) -> Result<()> {
    let manager = build_server_manager(config);
    manager.stop_all(Duration::from_secs(10)).await;
    println!("all tracked servers stopped");
    Ok(())
}

pub async fn servers_restart_all(config: &AppConfig) -> Result<()> {
    servers_stop_all(config).await?;
    servers_start_all(config).await
}

async fn build_instance_manager(config: &AppConfig) -> Result<InstanceManager> {
    let registry = Arc::new(RwLock::new(load_registry(config).await?));
    let server_manager = build_server_manager(config);
    let manager = InstanceManager::load(registry, server_manager, config.instances_path()?, config.instances.port_range).await?;
    Ok(manager)
}

pub async fn instances_list(config: &AppConfig) -> Result<()> {
    let manager = build_instance_manager(config).await?;
    for instance in manager.list().await {
        println!("{} (base={}, port={:?})", instance.instance_id, instance.base_model_id, instance.port);
    }
    Ok(())
}

pub async fn instances_create(config: &AppConfig, base_model_id: &str, display_name: &str, system_prompt: Option<String>, web_search: bool) -> Result<()> {
    let manager = build_instance_manager(config).await?;
    let instance = manager.create(base_model_id, display_name, system_prompt, web_search).await?;
    println!("created instance {}", instance.instance_id);
    Ok(())
}

pub async fn instances_start(config: &AppConfig, instance_id: &str) -> Result<()> {
    let manager = build_instance_manager(config).await?;
    manager.start(instance_id).await?;
    println!("instance {instance_id} started");
    Ok(())
}

pub async fn instances_stop(config: &AppConfig, instance_id: &str) -> Result<()> {
    let manager = build_instance_manager(config).await?;
    manager.stop(instance_id).await?;
    println!("instance {instance_id} stopped");
    Ok(())
}

pub async fn instances_delete(config: &AppConfig, instance_id: &str) -> Result<()> {
    let manager = build_instance_manager(config).await?;
    manager.delete(instance_id).await?;
    println!("instance {instance_id} deleted");
    Ok(())
}

pub async fn query(config: &AppConfig, mode: &str, text: &str, use_context: bool, use_web_search: bool) -> Result<()> {
    let mode = parse_mode(mode)?;
    let reg = load_registry(config).await?;
    let registry = Arc::new(RwLock::new(reg));
    let selector = Arc::new(ModelSelector::new(Arc::clone(&registry)));
    let server_manager = build_server_manager(config);

    {
        let reg = registry.read().await;
        let enabled: Vec<_> = reg.enabled_models().cloned().collect();
        drop(reg);
        for model in &enabled {
            server_manager.start(ServerKey::Base(model.model_id.clone()), model.clone()).await.ok();
        }
    }

    let event_bus = EventBus::new();
    let metrics = Arc::new(MetricsAggregator::new());
    let topology = Arc::new(TopologyTracker::new(event_bus.clone()));

    let orchestrator = QueryOrchestrator::new(
        registry,
        selector,
        server_manager,
        event_bus,
        metrics,
        topology,
        None,
        None,
        config.server.host.clone(),
    );

    let request = QueryRequest {
        query: text.to_string(),
        mode,
        use_context,
        use_web_search,
        max_tokens: 1024,
        temperature: 0.7,
        council: Default::default(),
        benchmark: Default::default(),
        instance_system_prompt: None,
    };

    let response = orchestrator.process(request).await.context("query failed")?;
    println!("{}", response.response);
    println!("\n--- metadata ---");
    for (key, value) in &response.metadata {
        println!("{key}: {value}");
    }
    println!("total_time_ms: {}", response.total_time_ms);
    Ok(())
}

pub async fn metrics_summary(metric: &str, range: &str) -> Result<()> {
    let aggregator = MetricsAggregator::new();
    let range = parse_range(range)?;
    let summary = aggregator.summary(metric, range).await;
    println!("{summary:#?}");
    Ok(())
}

pub async fn metrics_time_series(metric: &str, range: &str) -> Result<()> {
    let aggregator = MetricsAggregator::new();
    let range = parse_range(range)?;
    let result = aggregator.time_series(metric, range, &TagFilter::default()).await;
    for point in &result.points {
        println!("{} {}", point.timestamp, point.value);
    }
    Ok(())
}

fn parse_range(raw: &str) -> Result<orchestrator_types::MetricRange> {
    use orchestrator_types::MetricRange;
    match raw {
        "1h" => Ok(MetricRange::OneHour),
        "6h" => Ok(MetricRange::SixHours),
        "24h" | "1d" => Ok(MetricRange::OneDay),
        "7d" => Ok(MetricRange::SevenDays),
        "30d" => Ok(MetricRange::ThirtyDays),
        other => Err(anyhow!("unknown range `{other}`, expected 1h|6h|24h|7d|30d")),
    }
}

pub async fn topology_snapshot(config: &AppConfig) -> Result<()> {
    let event_bus = EventBus::new();
    let tracker = TopologyTracker::new(event_bus);
    let _ = config;
    let snapshot = tracker.health_snapshot().await;
    println!("{snapshot:#?}");
    Ok(())
}

pub async fn events_watch(duration_secs: u64) -> Result<()> {
    use orchestrator_types::EventFilter;
    let bus = EventBus::new();
    let mut subscription = bus.subscribe(EventFilter::default()).await;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(duration_secs);
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => break,
            event = subscription.rx.recv() => {
                match event {
                    Some(event) => println!("{} [{:?}] {}", event.timestamp, event.event_type, event.message),
                    None => break,
                }
            }
        }
    }
    Ok(())
}
