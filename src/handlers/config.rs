use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Effective configuration, with the API key reduced to a presence flag.
pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": {
                "host": config.server.host,
                "port": config.server.port
            },
            "upstream": {
                "url": state.upstream.url(),
                "api_key_set": !config.upstream.api_key.trim().is_empty(),
                "connect_timeout_secs": config.upstream.connect_timeout_secs
            },
            "voice": {
                "language": config.voice.language,
                "style": config.voice.style,
                "model": config.voice.model,
                "pitch_variance": config.voice.pitch_variance,
                "speed": config.voice.speed
            },
            "playback": {
                "output_device": config.playback.output_device,
                "max_header_bytes": config.playback.max_header_bytes,
                "header_dump_path": config.playback.header_dump_path,
                "max_queued_buffers": config.playback.max_queued_buffers
            }
        }
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::handlers::configure_routes;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_api_key_is_not_exposed() {
        let mut config = AppConfig::default();
        config.upstream.api_key = "super-secret".to_string();
        let state = AppState::new(config).unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/config").to_request();
        let body = test::call_and_read_body(&app, req).await;
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(!text.contains("super-secret"));

        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["config"]["upstream"]["api_key_set"], true);
    }
}
