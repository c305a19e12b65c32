use crate::state::AppState;
use actix_web::{
    error::{ErrorBadRequest, ErrorConflict, ErrorInternalServerError, ErrorNotFound},
    web, Error as ActixError, HttpResponse,
};
use gateway_common::{Amount, Chain, Token, WatchId};
use gateway_store::{StartWatchParams, StoreError, WatchStatus};
use serde::Deserialize;
use std::str::FromStr;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartWatchRequest {
    pub user_id: String,
    pub chain: Chain,
    pub token: Token,
    pub expected_amount: Amount,
    pub callback_url: Option<String>,
    pub payment_id: Option<String>,
}

fn store_error_response(err: StoreError) -> ActixError {
    match err {
        StoreError::NotFound(msg) => ErrorNotFound(msg),
        StoreError::Conflict(msg) | StoreError::AlreadyExists(msg) => ErrorConflict(msg),
        other => ErrorInternalServerError(other),
    }
}

/// `POST /watches` (§4.8): finds an `UNUSED` wallet on the requested chain
/// and starts (or reuses, per `(userId, chain)`) the watch bound to it.
async fn start_watch(
    state: web::Data<AppState>,
    body: web::Json<StartWatchRequest>,
) -> Result<HttpResponse, ActixError> {
    let req = body.into_inner();
    let wallet = state
        .services
        .store
        .allocate_unused_wallet(req.chain)
        .map_err(store_error_response)?
        .ok_or_else(|| ErrorBadRequest(format!("no unused wallet available on {}", req.chain)))?;

    let params = StartWatchParams {
        token: req.token,
        expected_amount: req.expected_amount,
        watch_duration_secs: state.services.config.watch_duration.as_secs(),
        callback_url: req.callback_url,
        payment_id: req.payment_id,
    };
    let watch = state
        .services
        .store
        .start_or_reuse_watch(&req.user_id, req.chain, &wallet, params)
        .map_err(store_error_response)?;
    Ok(HttpResponse::Ok().json(watch))
}

fn parse_watch_id(raw: &str) -> Result<WatchId, ActixError> {
    WatchId::from_str(raw).map_err(|_| ErrorBadRequest(format!("invalid watch id: {raw}")))
}

/// `POST /watches/{id}/stop` (§4.8): operator stop, `ACTIVE -> INACTIVE`.
async fn stop_watch(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ActixError> {
    let id = parse_watch_id(&path)?;
    let watch = state
        .services
        .store
        .transition_terminal(id, WatchStatus::Inactive, false)
        .map_err(store_error_response)?;
    Ok(HttpResponse::Ok().json(watch))
}

/// `GET /users/{userId}/watches` (§4.8).
async fn list_user_watches(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ActixError> {
    let watches = state
        .services
        .store
        .list_watches_for_user(&path)
        .map_err(store_error_response)?;
    Ok(HttpResponse::Ok().json(watches))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteWatchRequest {
    pub tx_hash: String,
    pub amount: Amount,
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
}

fn default_confirmations() -> u64 {
    u64::MAX
}

/// `POST /watches/{id}/complete` (§4.8): test-only, forces the confirmation
/// path with operator-supplied evidence. Refused unless the operator has
/// explicitly turned on `manual_complete_enabled` — never on against a
/// production secret.
async fn complete_watch(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<CompleteWatchRequest>,
) -> Result<HttpResponse, ActixError> {
    if !state.services.config.manual_complete_enabled {
        return Err(ErrorNotFound("manual completion is disabled"));
    }
    let id = parse_watch_id(&path)?;
    let req = body.into_inner();
    let watch = gateway_engine::force_complete(
        &state.services,
        id,
        req.tx_hash,
        req.amount,
        req.confirmations,
    )
    .await
    .map_err(ErrorInternalServerError)?;
    Ok(HttpResponse::Ok().json(watch))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/watches", web::post().to(start_watch))
        .route("/watches/{id}/stop", web::post().to(stop_watch))
        .route("/watches/{id}/complete", web::post().to(complete_watch))
        .route("/users/{userId}/watches", web::get().to(list_user_watches));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppState;
    use gateway_chain::ChainRegistry;
    use gateway_common::config::GatewayConfig;
    use gateway_common::WalletId;
    use gateway_dispatcher::CallbackDispatcher;
    use gateway_engine::{GasHistory, GatewayServices};
    use gateway_store::{Store, Wallet};
    use std::time::Duration;

    fn test_state() -> web::Data<AppState> {
        let config = GatewayConfig {
            watch_duration: Duration::from_secs(3600),
            required_confirmations: 5,
            poll_interval: Duration::from_secs(30),
            scan_window_blocks: 1000,
            callback_retry_delays: vec![],
            callback_exhaust: Duration::from_secs(3600),
            batch: Default::default(),
            maintenance_interval: Duration::from_secs(600),
            gas_sample_interval: Duration::from_secs(300),
            batch_tick_interval: Duration::from_secs(300),
            http_bind_address: "0.0.0.0:0".to_string(),
            shared_secret: "test-secret".to_string(),
            manual_complete_enabled: false,
            chains: vec![],
            storage_path: String::new(),
        };
        let services = GatewayServices {
            store: Store::open_temporary().unwrap(),
            chains: std::sync::Arc::new(ChainRegistry::build(&config).unwrap()),
            dispatcher: std::sync::Arc::new(CallbackDispatcher::new(
                b"test-secret".to_vec(),
                "gateway-test".to_string(),
                vec![],
            )),
            config: std::sync::Arc::new(config),
        };
        web::Data::new(AppState {
            services: std::sync::Arc::new(services),
            gas_history: GasHistory::new(),
        })
    }

    fn sample_request(user_id: &str, amount: &str) -> StartWatchRequest {
        StartWatchRequest {
            user_id: user_id.to_string(),
            chain: Chain::Ethereum,
            token: Token::Usdt,
            expected_amount: Amount::parse(amount).unwrap(),
            callback_url: None,
            payment_id: None,
        }
    }

    #[tokio::test]
    async fn start_watch_requires_an_unused_wallet() {
        let state = test_state();
        let err = start_watch(state, web::Json(sample_request("user-1", "5.00")))
            .await
            .expect_err("no wallet provisioned yet");
        assert!(err.to_string().contains("no unused wallet"));
    }

    #[tokio::test]
    async fn start_watch_binds_then_reuses_the_same_active_watch() {
        let state = test_state();
        state
            .services
            .store
            .insert_wallet(Wallet {
                id: WalletId::new(),
                user_id: "user-1".to_string(),
                chain: Chain::Ethereum,
                address: "0xabc".to_string(),
                encrypted_private_key: vec![],
                derivation_index: 0,
                status: gateway_store::WalletStatus::Unused,
                created_at: 0,
                updated_at: 0,
            })
            .unwrap();

        let first = start_watch(state.clone(), web::Json(sample_request("user-1", "5.00")))
            .await
            .unwrap();
        assert_eq!(first.status(), actix_web::http::StatusCode::OK);

        // second call reuses the active watch rather than demanding a
        // second unused wallet for the same (user, chain) pair.
        let second = start_watch(state, web::Json(sample_request("user-1", "7.00")))
            .await
            .unwrap();
        assert_eq!(second.status(), actix_web::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn complete_watch_is_refused_when_disabled() {
        let state = test_state();
        let path: web::Path<String> = WatchId::new().to_string().into();
        let body = web::Json(CompleteWatchRequest {
            tx_hash: "0xdead".to_string(),
            amount: Amount::parse("1.00").unwrap(),
            confirmations: 5,
        });
        let err = complete_watch(state, path, body)
            .await
            .expect_err("manual completion disabled by default");
        assert_eq!(
            err.as_response_error().status_code(),
            actix_web::http::StatusCode::NOT_FOUND
        );
    }
}
