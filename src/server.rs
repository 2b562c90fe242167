//! Route table and cross-origin policy shared by the binary and the
//! integration tests.

use crate::config::UpgradeConfig;
use crate::health;
use crate::protocol::READALOUD_PATH;
use crate::websocket;
use actix_cors::Cors;
use actix_web::web;

/// Register every route the bridge serves.
///
/// - `GET /consumer/speech/synthesize/readaloud/edge/v1`: readaloud websocket
/// - `GET /health`: liveness + counters
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route(READALOUD_PATH, web::get().to(websocket::readaloud_websocket))
        .route("/health", web::get().to(health::health_check));
}

/// CORS layer matching the websocket upgrade policy, so `/health` and the
/// upgrade endpoint agree on which origins are welcome.
pub fn build_cors(upgrade: &UpgradeConfig) -> Cors {
    let cors = if upgrade.allow_any_origin {
        Cors::default().allow_any_origin()
    } else {
        upgrade
            .allowed_origins
            .iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
    };

    cors.allow_any_method().allow_any_header().max_age(3600)
}
