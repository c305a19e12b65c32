mod batch_scheduler;
mod gas_monitor;
mod maintenance;
mod services;
mod watch_engine;

pub use gas_monitor::{GasHistory, GasSample};
pub use services::GatewayServices;
pub use watch_engine::force_complete;

use std::sync::Arc;

/// Spawns every long-lived cooperative task (§5). Returns their join
/// handles so the composition root can await clean shutdown.
pub fn spawn_all(
    services: Arc<GatewayServices>,
    gas_history: Arc<GasHistory>,
    shutdown: tokio::sync::watch::Receiver<bool>,
) -> Vec<tokio::task::JoinHandle<()>> {
    vec![
        watch_engine::spawn(services.clone(), shutdown.clone()),
        batch_scheduler::spawn(services.clone(), shutdown.clone()),
        gas_monitor::spawn(services.clone(), gas_history, shutdown.clone()),
        maintenance::spawn(services, shutdown),
    ]
}
