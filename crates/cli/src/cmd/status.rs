//! Show feed, checkpoint and schedule status

use anyhow::Result;
use cli_lib::feed::{open_state, snapshot_dir};
use cli_lib::{StateLock, SystemConfig};
use journal::{GlobalCheckpoint, TraversalStateStore};
use owo_colors::OwoColorize;

pub fn run(config: &SystemConfig) -> Result<()> {
    let state_dir = &config.feed.state_dir;
    let target = &config.traversal.target;

    println!("{}", "Feed Status".bold());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();
    println!("State:         {}", state_dir.display().to_string().cyan());
    println!("Target:        {}", target.cyan());

    let holder = StateLock::holder(state_dir)?;
    print!("Feed:          ");
    match &holder {
        Some(lock) => println!("{} (pid {})", "Running ✓".green(), lock.pid),
        None => println!("{}", "Stopped".yellow()),
    }
    println!();

    // sled allows a single opener; the running feed owns the database
    let mut token = None;
    if holder.is_none() && state_dir.exists() {
        let state = open_state(state_dir)?;

        if let Some(schedule) = state.load_schedule(target)? {
            println!("{}", "Schedule".bold());
            println!("  Rate:        {} documents/min", schedule.load_per_minute);
            println!("  Cooldown:    {}s after catching up", schedule.retry_delay_ms / 1000);
            if schedule.disabled {
                println!("  {}", "Disabled".red());
            } else if schedule.windows.is_empty() {
                println!("  Windows:     {}", "always".dimmed());
            } else {
                for window in &schedule.windows {
                    println!("  Window:      {:02}:00-{:02}:00", window.start_hour, window.end_hour);
                }
            }
            println!();
        }

        token = match state.load_checkpoint(target)? {
            Some(raw) => match GlobalCheckpoint::decode(&raw) {
                Ok(checkpoint) => Some(checkpoint),
                Err(e) => {
                    println!("{} {}", "Checkpoint unreadable:".red(), e);
                    None
                }
            },
            None => None,
        };
        match &token {
            Some(checkpoint) => {
                println!("Checkpoint:    queue position {}", checkpoint.queue_position)
            }
            None => println!("Checkpoint:    {}", "none (next run starts fresh)".dimmed()),
        }
        println!();
    }

    println!("{}", "Monitors".bold());
    if config.monitors.is_empty() {
        println!("  {}", "none configured".dimmed());
    }
    for monitor in &config.monitors {
        let sequences = snapshot_dir(state_dir, &monitor.id).sequences().unwrap_or_default();
        println!("  {} {}", monitor.id.cyan(), monitor.root.display().dimmed());
        match (sequences.first(), sequences.last()) {
            (Some(first), Some(last)) => {
                println!("    Snapshots:   {} ({}..={})", sequences.len(), first, last)
            }
            _ => println!("    Snapshots:   {}", "none".dimmed()),
        }
        if let Some(committed) = token.as_ref().and_then(|t| t.monitor(&monitor.id)) {
            println!(
                "    Committed:   snapshot {} offset {}",
                committed.snapshot, committed.offset
            );
        }
    }

    Ok(())
}
