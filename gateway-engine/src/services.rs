use gateway_chain::ChainRegistry;
use gateway_common::config::GatewayConfig;
use gateway_dispatcher::CallbackDispatcher;
use gateway_store::Store;
use std::sync::Arc;

/// Everything the long-lived loops need, constructed once in the
/// composition root and shared by `Arc` (§9 "cyclic or mutable globals").
pub struct GatewayServices {
    pub store: Store,
    pub chains: Arc<ChainRegistry>,
    pub dispatcher: Arc<CallbackDispatcher>,
    pub config: Arc<GatewayConfig>,
}
