//! Configuration command
//!
//! Read-only view of the effective configuration.

use anyhow::{Context, Result};
use cli_lib::system_config::{self, SystemConfig};
use owo_colors::OwoColorize;
use std::path::Path;

/// List all configuration values
pub fn run_list(config_path: Option<&Path>) -> Result<()> {
    let config = system_config::load(config_path)?;

    println!("{}", "Changefeed Configuration".bold());
    match source_path(config_path) {
        Some(path) if path.exists() => {
            println!("{}: {}\n", "Location".dimmed(), path.display().dimmed())
        }
        _ => println!("{}\n", "(no config file, showing defaults)".dimmed()),
    }

    println!("{}", "[feed]".yellow());
    println!("  {} = {}", "state_dir".cyan(), config.feed.state_dir.display());
    println!(
        "  {} = {}",
        "log_dir".cyan(),
        match &config.feed.log_dir {
            Some(dir) => dir.display().to_string(),
            None => "(stderr only)".dimmed().to_string(),
        }
    );
    println!("  {} = {}", "queue_capacity".cyan(), config.feed.queue_capacity);

    let traversal = &config.traversal;
    println!("\n{}", "[traversal]".yellow());
    println!("  {} = {}", "target".cyan(), traversal.target);
    println!(
        "  {} = {} {}",
        "load_per_minute".cyan(),
        traversal.load_per_minute,
        "(documents)".dimmed()
    );
    println!(
        "  {} = {} {}",
        "retry_delay_secs".cyan(),
        traversal.retry_delay_secs,
        format!("({} min)", traversal.retry_delay_secs / 60).dimmed()
    );
    println!("  {} = {}", "batch_size".cyan(), traversal.batch_size);
    println!("  {} = {}", "batch_budget_secs".cyan(), traversal.batch_budget_secs);
    println!("  {} = {}", "poll_interval_ms".cyan(), traversal.poll_interval_ms);
    println!("  {} = {}", "disabled".cyan(), traversal.disabled);
    if traversal.windows.is_empty() {
        println!("  {} = {}", "windows".cyan(), "(always)".dimmed());
    } else {
        let windows: Vec<String> = traversal
            .windows
            .iter()
            .map(|w| format!("{:02}-{:02}", w.start_hour, w.end_hour))
            .collect();
        println!("  {} = {}", "windows".cyan(), windows.join(", "));
    }

    println!("\n{}", "[output]".yellow());
    println!(
        "  {} = {}",
        "path".cyan(),
        match &config.output.path {
            Some(path) => path.display().to_string(),
            None => "(stdout)".dimmed().to_string(),
        }
    );

    for monitor in &config.monitors {
        println!("\n{}", "[[monitors]]".yellow());
        println!("  {} = {}", "id".cyan(), monitor.id);
        println!("  {} = {}", "root".cyan(), monitor.root.display());
        println!("  {} = {}", "scan_interval_secs".cyan(), monitor.scan_interval_secs);
        if let Some(limit) = monitor.payload_limit {
            println!("  {} = {}", "payload_limit".cyan(), limit);
        }
        if !monitor.exclude.patterns.is_empty() {
            println!("  {} = {}", "exclude.patterns".cyan(), monitor.exclude.patterns.join(", "));
        }
    }
    if config.monitors.is_empty() {
        println!(
            "\n{}",
            "No monitors configured. See `cf config --example`.".yellow()
        );
    }

    Ok(())
}

/// Get a single configuration value by dotted key (e.g. `monitors.0.root`)
pub fn run_get(config_path: Option<&Path>, key: &str) -> Result<()> {
    let config = system_config::load(config_path)?;
    let value = lookup(&config, key)?;

    match value {
        toml::Value::String(s) => println!("{}", s),
        other => println!("{}", other),
    }
    Ok(())
}

fn lookup(config: &SystemConfig, key: &str) -> Result<toml::Value> {
    let mut value = toml::Value::try_from(config).context("Failed to serialize config")?;

    for part in key.split('.') {
        let next = match &value {
            toml::Value::Table(table) => table.get(part).cloned(),
            toml::Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i).cloned()),
            _ => None,
        };
        value = next.with_context(|| {
            format!("Unknown config key: {}. Use 'cf config --list' to see available keys.", key)
        })?;
    }
    Ok(value)
}

/// Show the config file path in use
pub fn run_path(config_path: Option<&Path>) -> Result<()> {
    let path = source_path(config_path).context("Could not determine config file path")?;
    println!("{}", path.display());
    if !path.exists() {
        println!("{}", "File does not exist; defaults are in effect.".yellow());
    }
    Ok(())
}

/// Show example configuration
pub fn run_example() -> Result<()> {
    println!("{}", system_config::example_config());
    Ok(())
}

fn source_path(config_path: Option<&Path>) -> Option<std::path::PathBuf> {
    config_path
        .map(Path::to_path_buf)
        .or_else(system_config::config_file_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_dotted_keys() {
        let config = system_config::parse(
            r#"
            [traversal]
            load_per_minute = 42

            [[monitors]]
            id = "docs"
            root = "/srv/docs"
            "#,
        )
        .unwrap();

        assert_eq!(lookup(&config, "traversal.load_per_minute").unwrap().as_integer(), Some(42));
        assert_eq!(lookup(&config, "monitors.0.root").unwrap().as_str(), Some("/srv/docs"));
        assert!(lookup(&config, "monitors.1.root").is_err());
        assert!(lookup(&config, "traversal.nope").is_err());
    }
}
