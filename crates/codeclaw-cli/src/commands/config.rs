/// Configuration management command handlers
use anyhow::Result;
use codeclaw_core::ConfigAdditions;
use codeclaw_storage::{PublisherConfig, Stage, SETTING_KEYS};
use std::collections::BTreeSet;

use super::helpers::{mask_secret, print_heading, Workspace};

/// Which append-only list a `config` subcommand extends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigList {
    ExcludedProjects,
    RedactStrings,
    RedactUsernames,
}

/// Flags given to `codeclaw configure`; unset fields keep their saved value
#[derive(Debug, Clone, Default)]
pub struct ConfigureArgs {
    pub endpoint: Option<String>,
    pub repo: Option<String>,
    pub api_key: Option<String>,
    pub sources: Vec<String>,
}

fn merge_credentials(saved: Option<PublisherConfig>, args: &ConfigureArgs) -> PublisherConfig {
    let saved =
        saved.unwrap_or_else(|| PublisherConfig::new(String::new(), String::new(), String::new()));
    PublisherConfig::new(
        args.endpoint.clone().unwrap_or(saved.endpoint),
        args.repo.clone().unwrap_or(saved.repo),
        args.api_key.clone().unwrap_or(saved.api_key),
    )
}

/// Save upload credentials and the source scope, then move the gate to
/// Configured. The credentials are stored even when the gate refuses, so
/// they can be completed in a second call.
pub fn handle_configure(ws: &Workspace, args: &ConfigureArgs) -> Result<()> {
    let credentials = merge_credentials(ws.db.get_publisher_config()?, args);
    if args.endpoint.is_some() || args.repo.is_some() || args.api_key.is_some() {
        ws.db.upsert_publisher_config(&credentials)?;
    }

    let gate = ws.gate();
    let scope: BTreeSet<String> = if args.sources.is_empty() {
        gate.state()?.source_scope
    } else {
        args.sources.iter().cloned().collect()
    };

    let state = gate.configure(Some(&credentials), &scope)?;
    println!("Configured upload to {} ({})", credentials.repo, credentials.endpoint);
    println!(
        "Sources: {}",
        state.source_scope.iter().cloned().collect::<Vec<_>>().join(", ")
    );
    println!("Gate stage: {}", state.stage);
    Ok(())
}

pub fn handle_config_list(ws: &Workspace) -> Result<()> {
    let settings = ws.db.get_settings()?;
    let state = ws.gate().state()?;

    print_heading("Settings");
    println!("  push_threshold = {}", settings.push_threshold);
    println!(
        "  backoff_tiers = {}",
        settings
            .backoff_tiers_secs
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    );
    println!("  quarantine_threshold = {}", settings.quarantine_threshold);
    println!("  watch_interval_secs = {}", settings.watch_interval_secs);
    println!("  debounce_millis = {}", settings.debounce_millis);
    println!("  max_tool_input_chars = {}", settings.max_tool_input_chars);
    println!("  worker_count = {}", settings.worker_count);
    println!("  auto_push = {}", settings.auto_push);
    println!("  encrypt_artifacts = {}", settings.encrypt_artifacts);

    print_heading("Publisher");
    if let Some(config) = ws.db.get_publisher_config()? {
        println!("  endpoint = {}", config.endpoint);
        println!("  repo = {}", config.repo);
        println!("  api_key = {}", mask_secret(&config.api_key));
    } else {
        println!("  (not configured)");
    }

    print_heading("Export scope");
    print_list("sources", state.source_scope.iter().cloned());
    print_list("excluded projects", state.excluded_projects.iter().cloned());
    print_list("connected projects", state.connected_projects.iter().cloned());
    // Redaction strings are sensitive themselves
    print_list("redacted strings", state.redact_strings.iter().map(|s| mask_secret(s)));
    print_list("redacted usernames", state.redact_usernames.iter().map(|s| mask_secret(s)));
    Ok(())
}

fn print_list(label: &str, items: impl Iterator<Item = String>) {
    let items: Vec<String> = items.collect();
    if items.is_empty() {
        println!("  {label}: (none)");
    } else {
        println!("  {label}: {}", items.join(", "));
    }
}

pub fn handle_config_set(ws: &Workspace, key: &str, value: &str) -> Result<()> {
    if !SETTING_KEYS.contains(&key) {
        anyhow::bail!("Unknown setting: {key}. Valid keys: {}", SETTING_KEYS.join(", "));
    }
    ws.db.update_setting(key, value)?;
    println!("Set {key} = {value}");
    Ok(())
}

/// Union `values` into one of the append-only lists
pub fn handle_config_append(ws: &Workspace, list: ConfigList, values: &[String]) -> Result<()> {
    let values: BTreeSet<String> = values.iter().cloned().collect();
    let mut additions = ConfigAdditions::default();
    match list {
        ConfigList::ExcludedProjects => additions.excluded_projects = values,
        ConfigList::RedactStrings => additions.redact_strings = values,
        ConfigList::RedactUsernames => additions.redact_usernames = values,
    }

    let gate = ws.gate();
    let before = gate.state()?.stage;
    let (state, changed) = gate.merge_config(&additions)?;
    if !changed {
        println!("Nothing new to add");
        return Ok(());
    }
    println!("Added to the {} list", list_name(list));
    if before >= Stage::Confirmed && state.stage < before {
        println!("The confirmed export predates this change; run `codeclaw export` and review again");
    }
    Ok(())
}

const fn list_name(list: ConfigList) -> &'static str {
    match list {
        ConfigList::ExcludedProjects => "excluded projects",
        ConfigList::RedactStrings => "redacted strings",
        ConfigList::RedactUsernames => "redacted usernames",
    }
}
