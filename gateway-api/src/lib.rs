mod routes;
mod state;

pub use state::AppState;

/// Registers the full inbound HTTP surface (§4.8, §4.9) onto an actix-web
/// `App`. The composition root (gateway-daemon) owns the `HttpServer` and
/// `AppState`; this crate only knows its own routes.
pub fn configure(cfg: &mut actix_web::web::ServiceConfig) {
    routes::watches::configure(cfg);
    routes::stats::configure(cfg);
}
