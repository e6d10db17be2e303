//! PollScheduler processor.
//!
//! The PollScheduler is responsible for:
//! - Emitting `PollTick` events for every configured source on its interval
//! - Receiving `PollDelayHint` events via the `Processor` trait and
//!   stretching a failing source's interval
//! - Reacting to config changes by diffing active tick loops (spawning and
//!   aborting only the loops that actually changed)

use crate::config::{ConfigStore, ConfigWatcher};
use crate::events::{PollDelayHint, PollDelayHintReceiver, PollTick, PollTickSender};
use crate::feeds::SourceId;
use crate::utils::poll_interval::next_poll_delay;
use kanau::processor::Processor;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One source under schedule: its identity, base interval, and the channel
/// its poller listens on.
#[derive(Clone)]
pub struct ScheduledSource {
    pub source: SourceId,
    pub base_interval: Duration,
    pub tick_tx: PollTickSender,
}

/// Configuration for the PollScheduler. Held inside a [`ConfigStore`] so it
/// can be swapped at runtime.
///
/// Sources live in a `Vec` and are scanned linearly; the set is small.
pub struct PollSchedulerConfig {
    pub sources: Vec<ScheduledSource>,
}

/// PollScheduler owns one tick loop per configured source.
///
/// Failure feedback from the pollers arrives as [`PollDelayHint`] events and
/// is fanned out to the tick loops over a broadcast channel.
pub struct PollScheduler {
    backoff_tx: broadcast::Sender<(SourceId, u32)>,
}

impl PollScheduler {
    pub fn new() -> Self {
        let (backoff_tx, _) = broadcast::channel(64);
        Self { backoff_tx }
    }

    /// Run until shutdown is signaled.
    pub async fn run(
        self,
        mut shutdown_rx: watch::Receiver<bool>,
        mut hint_rx: PollDelayHintReceiver,
        config_store: ConfigStore<PollSchedulerConfig>,
        mut config_watcher: ConfigWatcher,
    ) {
        let mut active_loops: Vec<(SourceId, JoinHandle<()>)> = Vec::new();
        {
            let config = config_store.read().await;
            for scheduled in &config.sources {
                let handle = self.spawn_tick_loop(scheduled.clone());
                active_loops.push((scheduled.source.clone(), handle));
            }
            info!("PollScheduler started with {} sources", active_loops.len());
        }

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("PollScheduler received shutdown signal");
                        break;
                    }
                }

                Ok(()) = config_watcher.changed() => {
                    let config = config_store.read().await;
                    self.apply_diff(&mut active_loops, &config);
                    info!(
                        "PollScheduler reconciled config, {} active sources",
                        active_loops.len()
                    );
                }

                Some(hint) = hint_rx.recv() => {
                    let _ = self.process(hint).await;
                }

                else => {
                    info!("PollDelayHint channel closed");
                    break;
                }
            }
        }

        for (_, handle) in active_loops {
            handle.abort();
        }

        info!("PollScheduler shutdown complete");
    }

    /// Diff `active` loops against `new_config` and reconcile:
    /// - Abort loops whose sources are absent from the new config.
    /// - Spawn loops for sources present in the new config but not active.
    fn apply_diff(
        &self,
        active: &mut Vec<(SourceId, JoinHandle<()>)>,
        new_config: &PollSchedulerConfig,
    ) {
        active.retain(|(source, handle)| {
            let keep = new_config.sources.iter().any(|s| &s.source == source);
            if !keep {
                info!(%source, "Aborting removed tick loop");
                handle.abort();
            }
            keep
        });

        for scheduled in &new_config.sources {
            if !active.iter().any(|(s, _)| s == &scheduled.source) {
                info!(source = %scheduled.source, "Spawning new tick loop");
                let handle = self.spawn_tick_loop(scheduled.clone());
                active.push((scheduled.source.clone(), handle));
            }
        }
    }

    /// Spawn the tick loop for one source.
    ///
    /// The loop sleeps for [`next_poll_delay`] of the source's current
    /// failure count, then emits a `PollTick`. A backoff update for this
    /// source recalculates the interval immediately.
    fn spawn_tick_loop(&self, scheduled: ScheduledSource) -> JoinHandle<()> {
        let mut backoff_rx = self.backoff_tx.subscribe();
        let ScheduledSource {
            source,
            base_interval,
            tick_tx,
        } = scheduled;

        tokio::spawn(async move {
            let mut consecutive_failures = 0u32;

            loop {
                let delay = next_poll_delay(base_interval, consecutive_failures);
                debug!(%source, consecutive_failures, ?delay, "Scheduling next poll");

                tokio::select! {
                    biased;

                    Ok((hinted_source, failures)) = backoff_rx.recv() => {
                        if hinted_source == source {
                            consecutive_failures = failures;
                            debug!(
                                %source,
                                consecutive_failures,
                                "Updated failure count, recalculating interval"
                            );
                            continue;
                        }
                    }

                    _ = tokio::time::sleep(delay) => {
                        let tick = PollTick { source: source.clone() };
                        if let Err(e) = tick_tx.send(tick).await {
                            warn!(%source, error = %e, "Failed to send PollTick, receiver dropped");
                            return;
                        }
                        debug!(%source, "Emitted PollTick");
                    }
                }
            }
        })
    }
}

impl Default for PollScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor<PollDelayHint> for PollScheduler {
    type Output = ();
    type Error = Infallible;

    async fn process(&self, hint: PollDelayHint) -> Result<(), Infallible> {
        debug!(
            source = %hint.source,
            consecutive_failures = hint.consecutive_failures,
            "Broadcasting backoff update"
        );
        // If no tick loop is listening yet that is fine.
        let _ = self
            .backoff_tx
            .send((hint.source, hint.consecutive_failures));
        Ok(())
    }
}
