use crate::state::AppState;
use actix_web::{error::ErrorInternalServerError, web, Error as ActixError, HttpResponse};
use gateway_store::WatchStatus;
use serde_json::json;
use std::collections::HashMap;

/// `GET /stats` (§4.8): counts of watches by status, batch queue depth per
/// chain, and the last gas sample per chain.
async fn stats(state: web::Data<AppState>) -> Result<HttpResponse, ActixError> {
    let watches = state
        .services
        .store
        .list_all_watches()
        .map_err(ErrorInternalServerError)?;

    let mut by_status: HashMap<&'static str, u64> = HashMap::new();
    for watch in &watches {
        let key = match watch.status {
            WatchStatus::Active => "active",
            WatchStatus::Confirmed => "confirmed",
            WatchStatus::Expired => "expired",
            WatchStatus::Inactive => "inactive",
        };
        *by_status.entry(key).or_default() += 1;
    }

    let periods = state
        .services
        .store
        .list_open_batch_periods()
        .map_err(ErrorInternalServerError)?;
    let mut queue_depth: HashMap<String, u64> = HashMap::new();
    for (chain, period) in periods {
        let items = state
            .services
            .store
            .list_batch_queue(chain, period)
            .map_err(ErrorInternalServerError)?;
        let open = items.iter().filter(|i| !i.state.is_terminal()).count() as u64;
        *queue_depth.entry(chain.as_str().to_string()).or_default() += open;
    }
    // report every enabled chain even when its queue is empty right now.
    for chain in state.services.chains.enabled_chains() {
        queue_depth.entry(chain.as_str().to_string()).or_insert(0);
    }

    let mut gas: HashMap<String, Option<u64>> = HashMap::new();
    for chain in state.services.chains.enabled_chains() {
        let sample = state.gas_history.current(chain).await.map(|s| s.fee.standard);
        gas.insert(chain.as_str().to_string(), sample);
    }

    Ok(HttpResponse::Ok().json(json!({
        "watchesByStatus": by_status,
        "batchQueueDepth": queue_depth,
        "lastGasStandard": gas,
    })))
}

/// `GET /healthz` (§4.9): Store reachability plus each enabled chain
/// adapter's latest `currentHeight()` poll.
async fn healthz(state: web::Data<AppState>) -> HttpResponse {
    let store_ok = state.services.store.list_active_watches().is_ok();

    let mut chains = serde_json::Map::new();
    let mut all_ok = store_ok;
    for chain in state.services.chains.enabled_chains() {
        let ok = match state.services.chains.get(chain) {
            Ok(adapter) => adapter.current_height().await.is_ok(),
            Err(_) => false,
        };
        all_ok &= ok;
        chains.insert(chain.as_str().to_string(), json!(ok));
    }

    let body = json!({ "store": store_ok, "chains": chains });
    if all_ok {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/stats", web::get().to(stats))
        .route("/healthz", web::get().to(healthz));
}
