use gateway_engine::{GasHistory, GatewayServices};
use std::sync::Arc;

/// Shared `web::Data` handle (§4.8); cheap to clone, every field is already
/// an `Arc` internally.
#[derive(Clone)]
pub struct AppState {
    pub services: Arc<GatewayServices>,
    pub gas_history: Arc<GasHistory>,
}
