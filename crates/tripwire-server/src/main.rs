use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use tripwire_common::types::{OwnerContext, Rule, Severity};
use tripwire_engine::cooldown::MemoryCooldownStore;
use tripwire_engine::runner::{EvaluationLoop, LoopConfig};
use tripwire_notify::dispatcher::NotificationDispatcher;
use tripwire_notify::plugin::ChannelRegistry;
use tripwire_notify::ChannelAdapter;
use tripwire_server::config::{ChannelsConfig, RulesSeedFile, ServerConfig};
use tripwire_store::SqliteStore;

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  tripwire-server [config.toml]                         Start the daemon");
    eprintln!("  tripwire-server init-rules <config.toml> <seed.json>  Seed alert rules from a JSON file");
}

#[tokio::main]
async fn main() -> Result<()> {
    tripwire_common::id::init(1, 1);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("tripwire=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("init-rules") => {
            let config_path = args.get(2).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("init-rules requires <config.toml> and <seed.json> arguments")
            })?;
            let seed_path = args.get(3).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("init-rules requires <seed.json> argument")
            })?;
            run_init_rules(config_path, seed_path)
        }
        Some("--help" | "-h") => {
            print_usage();
            Ok(())
        }
        _ => {
            let config_path = args
                .get(1)
                .map(|s| s.as_str())
                .unwrap_or("config/server.toml");
            run_server(config_path).await
        }
    }
}

fn open_store(config: &ServerConfig) -> Result<SqliteStore> {
    std::fs::create_dir_all(&config.data_dir)?;
    let path = Path::new(&config.data_dir).join("tripwire.db");
    Ok(SqliteStore::open(&path)?)
}

/// Instantiate one adapter per configured channel through the plugin
/// registry. Email is unconditional; the rest honor their `enabled` flags.
fn build_adapters(
    registry: &ChannelRegistry,
    channels: &ChannelsConfig,
) -> Result<Vec<Arc<dyn ChannelAdapter>>> {
    let mut adapters = Vec::new();

    let email_cfg = serde_json::to_value(&channels.email)?;
    adapters.push(registry.create_adapter("email", &email_cfg)?);

    if let Some(slack) = &channels.slack {
        if slack.enabled {
            adapters.push(registry.create_adapter("slack", &serde_json::to_value(slack)?)?);
        }
    }
    if let Some(discord) = &channels.discord {
        if discord.enabled {
            adapters.push(registry.create_adapter("discord", &serde_json::to_value(discord)?)?);
        }
    }
    if let Some(teams) = &channels.teams {
        if teams.enabled {
            adapters.push(registry.create_adapter("teams", &serde_json::to_value(teams)?)?);
        }
    }
    if let Some(webhook) = &channels.webhook {
        if webhook.enabled {
            adapters.push(registry.create_adapter("webhook", &serde_json::to_value(webhook)?)?);
        }
    }

    Ok(adapters)
}

async fn run_server(config_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    let store = Arc::new(open_store(&config)?);

    let registry = ChannelRegistry::default();
    let adapters = build_adapters(&registry, &config.channels)?;
    let channel_names: Vec<String> = adapters
        .iter()
        .map(|a| a.channel_name().to_string())
        .collect();

    let owner = OwnerContext {
        owner_id: config.owner.id.clone(),
        email: config.owner.email.clone(),
    };
    let dispatcher = Arc::new(NotificationDispatcher::new(
        adapters,
        owner,
        Duration::from_secs(config.channel_timeout_secs),
    ));

    let cooldowns = Arc::new(MemoryCooldownStore::new());
    let loop_config = LoopConfig {
        tick_interval: Duration::from_secs(config.evaluation_interval_secs),
        rule_timeout: Duration::from_secs(config.rule_timeout_secs),
        lookback_window: Duration::from_secs(config.lookback_window_secs),
        max_concurrent: config.max_concurrent_evaluations,
    };
    let eval_loop = EvaluationLoop::new(
        store.clone(),
        store.clone(),
        cooldowns,
        store,
        dispatcher,
        loop_config,
    );

    tracing::info!(
        config = %config_path,
        channels = ?channel_names,
        "tripwire-server started"
    );

    let loop_handle = tokio::spawn(async move { eval_loop.run().await });

    signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, stopping evaluation loop");
    loop_handle.abort();
    Ok(())
}

/// Seed alert rules from a JSON file, skipping names that already exist.
fn run_init_rules(config_path: &str, seed_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    let store = open_store(&config)?;

    let seed_content = std::fs::read_to_string(seed_path)
        .map_err(|e| anyhow::anyhow!("Failed to read seed file '{}': {}", seed_path, e))?;
    let seed: RulesSeedFile = serde_json::from_str(&seed_content)
        .map_err(|e| anyhow::anyhow!("Failed to parse seed file '{}': {}", seed_path, e))?;

    let mut created = 0u32;
    let mut skipped = 0u32;

    for seed_rule in &seed.rules {
        if store.rule_exists_by_name(&seed_rule.name)? {
            tracing::warn!(name = %seed_rule.name, "Rule already exists, skipping");
            skipped += 1;
            continue;
        }

        let severity: Severity = seed_rule
            .severity
            .parse()
            .map_err(|e| anyhow::anyhow!("Rule '{}': {}", seed_rule.name, e))?;
        let rule = Rule {
            id: tripwire_common::id::next_id(),
            name: seed_rule.name.clone(),
            series_ref: seed_rule.series_ref.clone(),
            condition: seed_rule.condition.clone(),
            severity,
            cooldown_secs: seed_rule.cooldown_secs,
            active: seed_rule.active,
        };
        store.insert_rule(&rule)?;
        tracing::info!(name = %rule.name, id = %rule.id, "Rule created");
        created += 1;
    }

    tracing::info!(created, skipped, "Rule seeding finished");
    Ok(())
}
