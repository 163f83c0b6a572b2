use anyhow::Context;
use llmscope_notify::plugin::ChannelRegistry;
use llmscope_storage::control::{NewAlertRule, NewChannel};
use llmscope_storage::ControlStore;
use std::collections::{HashMap, HashSet};

use crate::config::SeedFile;

/// Apply a seed file to the control store: channels first, then rules.
///
/// Seeding is additive and idempotent by name. A channel or rule whose name
/// already exists is skipped with a warning, never updated, so re-running
/// the same seed file against a live database is safe.
pub async fn load_seed_file(control: &ControlStore, path: &str) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read seed file {path}"))?;
    let seed: SeedFile =
        toml::from_str(&raw).with_context(|| format!("failed to parse seed file {path}"))?;

    let registry = ChannelRegistry::default();

    let mut channel_ids: HashMap<String, String> = HashMap::new();
    let mut channels_created = 0usize;
    let mut channels_skipped = 0usize;

    for ch in &seed.channels {
        if let Some(existing) = control.get_channel_by_name(&ch.name).await? {
            tracing::warn!(name = %ch.name, "Channel already exists, skipping");
            channel_ids.insert(ch.name.clone(), existing.id);
            channels_skipped += 1;
            continue;
        }
        let plugin = match registry.get_plugin(&ch.channel_type) {
            Some(p) => p,
            None => {
                tracing::warn!(
                    name = %ch.name,
                    channel_type = %ch.channel_type,
                    "Unknown channel type, skipping"
                );
                channels_skipped += 1;
                continue;
            }
        };
        if let Err(e) = plugin.validate_config(&ch.config) {
            tracing::warn!(
                name = %ch.name,
                channel_type = %ch.channel_type,
                error = %e,
                "Invalid channel config, skipping"
            );
            channels_skipped += 1;
            continue;
        }
        let row = control
            .insert_channel(&NewChannel {
                name: ch.name.clone(),
                channel_type: ch.channel_type.clone(),
                config_json: ch.config.to_string(),
                min_severity: ch.min_severity.clone(),
                enabled: ch.enabled,
            })
            .await?;
        tracing::info!(
            name = %ch.name,
            channel_type = %ch.channel_type,
            id = %row.id,
            "Seeded notification channel"
        );
        channel_ids.insert(ch.name.clone(), row.id);
        channels_created += 1;
    }

    let existing_rule_names: HashSet<String> = control
        .list_alert_rules()
        .await?
        .into_iter()
        .map(|r| r.name)
        .collect();

    let mut rules_created = 0usize;
    let mut rules_skipped = 0usize;

    for rule in &seed.rules {
        if existing_rule_names.contains(&rule.name) {
            tracing::warn!(name = %rule.name, "Alert rule already exists, skipping");
            rules_skipped += 1;
            continue;
        }
        let mut ids = Vec::new();
        for name in &rule.channels {
            match channel_ids.get(name) {
                Some(id) => ids.push(id.clone()),
                None => match control.get_channel_by_name(name).await? {
                    Some(row) => ids.push(row.id),
                    None => {
                        tracing::warn!(
                            rule = %rule.name,
                            channel = %name,
                            "Referenced channel not found, dropping from rule"
                        );
                    }
                },
            }
        }
        let row = control
            .insert_alert_rule(&NewAlertRule {
                project_id: rule.project_id.clone(),
                name: rule.name.clone(),
                description: rule.description.clone(),
                metric: rule.metric.clone(),
                aggregation: rule.aggregation.clone(),
                rule_type: rule.rule_type.clone(),
                config_json: rule.config.to_string(),
                window_minutes: rule.window_minutes,
                severity: rule.severity.clone(),
                channels_json: serde_json::to_string(&ids)?,
                cooldown_minutes: rule.cooldown_minutes,
                enabled: rule.enabled,
            })
            .await?;
        tracing::info!(
            name = %rule.name,
            project_id = %rule.project_id,
            metric = %rule.metric,
            id = %row.id,
            "Seeded alert rule"
        );
        rules_created += 1;
    }

    tracing::info!(
        channels_created,
        channels_skipped,
        rules_created,
        rules_skipped,
        "Seed file applied"
    );
    Ok(())
}
