//! `ironloop strategies`: List recovery strategies in selection order.

use ironloop_config::{AppConfig, StrategySettings};
use ironloop_core::{StrategyKind, TracingSink};
use ironloop_recovery::{RecoveryManager, SystemResourceMonitor};
use std::path::Path;
use std::sync::Arc;

use super::load_config;

pub fn run(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(path).map_err(|e| format!("Failed to load config: {e}"))?;
    let manager = RecoveryManager::from_config(
        &config.recovery,
        Arc::new(TracingSink),
        Arc::new(SystemResourceMonitor::new()),
    )?;

    println!("🛟 Recovery strategies ({})", if manager.is_enabled() { "enabled" } else { "disabled" });
    println!(
        "   global: max_attempts={} timeout_ms={}",
        config.recovery.global_max_attempts, config.recovery.global_timeout_ms
    );
    println!();
    for line in describe(&config, &manager.strategies()) {
        println!("{line}");
    }
    Ok(())
}

fn list(values: &[String]) -> String {
    if values.is_empty() {
        "any".into()
    } else {
        values.join(",")
    }
}

fn describe_one(position: usize, kind: StrategyKind, settings: &StrategySettings) -> String {
    let kinds: Vec<String> = settings.error_kinds.iter().map(|k| k.to_string()).collect();
    let severities: Vec<String> = settings.severities.iter().map(|s| s.to_string()).collect();
    format!(
        "  {position}. {:<22} {} attempts={} timeout_ms={} kinds={} severities={}",
        kind.as_str(),
        if settings.enabled { "✅" } else { "⏸️ " },
        settings.max_attempts,
        settings.timeout_ms,
        list(&kinds),
        list(&severities),
    )
}

/// One line per registered strategy.
fn describe(config: &AppConfig, kinds: &[StrategyKind]) -> Vec<String> {
    kinds
        .iter()
        .enumerate()
        .map(|(i, kind)| describe_one(i + 1, *kind, &config.recovery.settings_for(*kind)))
        .collect()
}
