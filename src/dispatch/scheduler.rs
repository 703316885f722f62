//! Periodic dispatch
//!
//! One task per method keeps same-method passes strictly sequential; the
//! dispatcher's per-method lock still covers on-demand calls made alongside.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::dispatch::dispatcher::FleetDispatcher;
use crate::dispatch::outcome::DispatchOutcome;
use crate::workflow::Method;

pub fn spawn_dispatch_loops(
    dispatcher: Arc<FleetDispatcher>,
    methods: &[Method],
    every: Duration,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    methods
        .iter()
        .map(|&method| {
            let dispatcher = dispatcher.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(dispatch_loop(dispatcher, method, every, shutdown))
        })
        .collect()
}

async fn dispatch_loop(
    dispatcher: Arc<FleetDispatcher>,
    method: Method,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(method = %method, interval_secs = every.as_secs(), "Dispatch loop started");
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {
                match dispatcher.try_dispatch(method).await {
                    Ok(DispatchOutcome::Failed(failure)) => warn!(method = %method, "{failure}"),
                    Ok(outcome) => debug!(method = %method, ?outcome, "Dispatch pass finished"),
                    Err(e) => error!(method = %method, error = %e, "Dispatch pass aborted"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    info!(method = %method, "Dispatch loop stopped");
}
