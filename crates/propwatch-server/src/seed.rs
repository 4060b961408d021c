//! Loading rules and templates from JSON seed files.

use crate::config::{RulesSeedFile, TemplatesSeedFile};
use crate::service::{RuleService, TemplateService};
use anyhow::Result;
use serde::de::DeserializeOwned;
use std::collections::HashSet;

/// Counts reported by a seed run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub created: u32,
    pub skipped: u32,
    pub failed: u32,
}

fn read_seed<T: DeserializeOwned>(path: &str) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read seed file '{path}': {e}"))?;
    serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse seed file '{path}': {e}"))
}

/// Saves every seeded rule whose name is not taken yet.
pub fn seed_rules(service: &RuleService, seed: RulesSeedFile) -> Result<SeedSummary> {
    let mut existing: HashSet<String> = service
        .list_rules()?
        .into_iter()
        .map(|r| r.name)
        .collect();
    let mut summary = SeedSummary::default();

    for mut rule in seed.rules {
        if existing.contains(&rule.name) {
            tracing::warn!(name = %rule.name, "Alert rule already exists, skipping");
            summary.skipped += 1;
            continue;
        }
        rule.id.clear();
        let name = rule.name.clone();
        match service.save_rule(rule) {
            Ok(saved) => {
                tracing::info!(name = %name, id = %saved.id, "Alert rule created");
                existing.insert(name);
                summary.created += 1;
            }
            Err(e) => {
                tracing::error!(name = %name, error = %e, "Failed to create alert rule");
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}

/// Saves every seeded template whose name is not taken yet.
pub fn seed_templates(service: &TemplateService, seed: TemplatesSeedFile) -> Result<SeedSummary> {
    let mut existing: HashSet<String> = service
        .list_templates(None)?
        .into_iter()
        .map(|t| t.name)
        .collect();
    let mut summary = SeedSummary::default();

    for mut template in seed.templates {
        if existing.contains(&template.name) {
            tracing::warn!(name = %template.name, "Template already exists, skipping");
            summary.skipped += 1;
            continue;
        }
        template.id.clear();
        let name = template.name.clone();
        match service.save_template(template) {
            Ok(saved) => {
                tracing::info!(name = %name, id = %saved.id, "Template created");
                existing.insert(name);
                summary.created += 1;
            }
            Err(e) => {
                tracing::error!(name = %name, error = %e, "Failed to create template");
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}

pub fn seed_rules_from_file(service: &RuleService, path: &str) -> Result<SeedSummary> {
    seed_rules(service, read_seed(path)?)
}

pub fn seed_templates_from_file(service: &TemplateService, path: &str) -> Result<SeedSummary> {
    seed_templates(service, read_seed(path)?)
}
