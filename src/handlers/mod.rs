pub mod config;
pub mod tts;

pub use config::get_config;
pub use tts::tts_stream;

use crate::error::AppError;
use crate::health;
use actix_web::web;

/// Register every route of the relay service.
///
/// Shared by `main` and the handler tests so both see the same routing table.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _req| AppError::BadRequest(err.to_string()).into()),
    )
    .route("/tts/stream", web::post().to(tts_stream))
    .route("/healthz", web::get().to(health::healthz))
    .route("/health", web::get().to(health::health_check))
    .service(
        web::scope("/api/v1")
            .route("/health", web::get().to(health::health_check))
            .route("/metrics", web::get().to(health::detailed_metrics))
            .route("/config", web::get().to(get_config)),
    );
}
