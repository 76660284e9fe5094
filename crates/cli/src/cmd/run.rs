//! Run the feed until interrupted
//!
//! The runner is synchronous; it lives on a blocking task and sleeps between
//! idle steps on a channel that closes when Ctrl-C arrives.

use anyhow::{Context, Result};
use cli_lib::{Feed, JsonLinesSink, StateLock, SystemConfig};
use crossbeam_channel::RecvTimeoutError;
use std::sync::Arc;
use traversal::{DocumentSink, RunOutcome, TraversalRunner};
use tracing::{error, info, warn};

pub async fn run(config: SystemConfig, once: bool) -> Result<()> {
    let _lock = StateLock::acquire(&config.feed.state_dir)?;

    let sink: Box<dyn DocumentSink> = match &config.output.path {
        Some(path) => Box::new(JsonLinesSink::append(path)?),
        None => Box::new(JsonLinesSink::stdout()),
    };
    let feed = Feed::open(&config, sink)?;
    let runner = Arc::new(feed.runner);
    let poll_interval = config.traversal.poll_interval();

    info!(
        "Feeding '{}' from {} monitor(s), state in {}",
        runner.target(),
        config.monitors.len(),
        config.feed.state_dir.display()
    );

    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
    let mut worker = {
        let runner = Arc::clone(&runner);
        tokio::task::spawn_blocking(move || run_loop(&runner, &stop_rx, poll_interval, once))
    };

    let result = tokio::select! {
        joined = &mut worker => joined,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, finishing current step");
            drop(stop_tx);
            (&mut worker).await
        }
    };

    runner.shutdown();
    info!("Feed stopped");
    result.context("Run loop panicked")?
}

fn run_loop(
    runner: &TraversalRunner,
    stop: &crossbeam_channel::Receiver<()>,
    poll_interval: std::time::Duration,
    once: bool,
) -> Result<()> {
    loop {
        match runner.run_once() {
            Ok(RunOutcome::Delivered(outcome)) => {
                info!(
                    "Delivered {} document(s), skipped {}",
                    outcome.count, outcome.rejected
                );
                // More may be waiting; only yield to a pending stop
                if matches!(stop.try_recv(), Err(crossbeam_channel::TryRecvError::Disconnected)) {
                    return Ok(());
                }
                continue;
            }
            Ok(RunOutcome::Finished) if once => return Ok(()),
            Ok(_) => {}
            Err(e) if e.is_fatal() => {
                error!("Feed failed: {}", e);
                return Err(e.into());
            }
            Err(e) => warn!("Step failed: {}", e),
        }

        match stop.recv_timeout(poll_interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return Ok(()),
        }
    }
}
