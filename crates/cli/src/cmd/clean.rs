//! Discard all feed state

use anyhow::{Context, Result};
use cli_lib::feed::{build_manager, open_state};
use cli_lib::{StateLock, SystemConfig};
use journal::TraversalStateStore;
use owo_colors::OwoColorize;
use std::io::{BufRead, Write};

pub fn run(config: &SystemConfig, yes: bool) -> Result<()> {
    let _lock = StateLock::acquire(&config.feed.state_dir)?;

    if !yes {
        print!(
            "Discard all snapshots and the checkpoint of '{}'? The next run re-delivers everything. [y/N] ",
            config.traversal.target
        );
        std::io::stdout().flush()?;
        let mut answer = String::new();
        std::io::stdin().lock().read_line(&mut answer)?;
        if !matches!(answer.trim(), "y" | "Y" | "yes") {
            println!("Aborted");
            return Ok(());
        }
    }

    let manager = build_manager(config)?;
    manager.clean().context("Failed to discard snapshots")?;

    let state = open_state(&config.feed.state_dir)?;
    state
        .clear_checkpoint(&config.traversal.target)
        .context("Failed to clear checkpoint")?;

    println!("{} Feed state discarded", "✓".green());
    Ok(())
}
