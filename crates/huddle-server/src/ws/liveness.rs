//! Relay-side dead-peer detection.
//!
//! Each tick probes every registered session with a WebSocket ping and evicts
//! the ones that did not answer the previous tick's probe.

use crate::ws::registry::Registry;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Shortest sweep period; the interval timer cannot run with a zero period
const MIN_PERIOD: Duration = Duration::from_millis(10);

pub fn spawn_sweeper(registry: Arc<Registry>, period: Duration) -> JoinHandle<()> {
    if period < MIN_PERIOD {
        tracing::warn!("Liveness period {:?} too short, using {:?}", period, MIN_PERIOD);
    }
    let period = period.max(MIN_PERIOD);

    tokio::spawn(async move {
        // The first tick of a plain interval fires immediately; skip it so a
        // freshly joined session always gets a full period to answer
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let evicted = registry.sweep().await;
            if !evicted.is_empty() {
                tracing::info!("Liveness sweep evicted {} sessions", evicted.len());
            }
        }
    })
}
