use crate::services::GatewayServices;
use crate::watch_engine;
use gateway_common::tokio_util::spawn_task;
use std::sync::Arc;

/// Spawns the Maintenance loop (§2, §5: every 10 minutes = 20 watch ticks).
/// It re-runs the same per-watch pass as the Watch Engine — retrying
/// orphaned callbacks and force-stopping exhausted watches is already
/// idempotent there — at a coarser cadence as a backstop in case a watch
/// was skipped on its regular ticks (e.g. a transient panic caught by
/// `spawn_task` that silently ended one iteration).
pub fn spawn(
    services: Arc<GatewayServices>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    spawn_task("maintenance", async move {
        let mut ticker = tokio::time::interval(services.config.maintenance_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    log::debug!("maintenance: running backstop pass over active watches");
                    watch_engine::tick(&services).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        log::info!("maintenance loop observed shutdown signal");
                        break;
                    }
                }
            }
        }
    })
}
