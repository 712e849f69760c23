//! `POST /tts/stream`: validate the request, open the provider stream, relay it.

use crate::error::AppError;
use crate::relay::{self, TransportFailure};
use crate::state::AppState;
use crate::upstream::SpeechRequest;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use tracing::{info, warn};

/// Longest text accepted, in characters after trimming.
pub const MAX_TEXT_CHARS: usize = 300;

/// Request body accepted by the relay endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TtsStreamRequest {
    pub text: String,
    pub language: Option<String>,
    pub style: Option<String>,
    pub model: Option<String>,
    pub pitch_variance: Option<f64>,
    pub speed: Option<f64>,
}

impl TtsStreamRequest {
    /// Trim and check the text, producing the request sent upstream.
    pub fn validate(self) -> Result<SpeechRequest, AppError> {
        let text = self.text.trim();
        if text.is_empty() {
            return Err(AppError::ValidationError("text is required".to_string()));
        }
        if text.chars().count() > MAX_TEXT_CHARS {
            return Err(AppError::ValidationError(format!(
                "text must be <= {} characters",
                MAX_TEXT_CHARS
            )));
        }

        Ok(SpeechRequest {
            text: text.to_string(),
            language: self.language,
            style: self.style,
            model: self.model,
            pitch_variance: self.pitch_variance,
            speed: self.speed,
        })
    }
}

pub async fn tts_stream(
    state: web::Data<AppState>,
    body: web::Json<TtsStreamRequest>,
) -> Result<HttpResponse, AppError> {
    let request = body.into_inner().validate()?;

    let response = state.upstream.open_stream(&request).await.map_err(|e| {
        state.record_precommit_failure();
        warn!(kind = e.label(), error = %e, "Upstream request failed");
        AppError::UpstreamStream(e.label().to_string())
    })?;

    info!(
        status = response.status().as_u16(),
        text_len = request.text.chars().count(),
        "Upstream TTS stream opened"
    );

    relay::relay(state.get_ref().clone(), relay::reply_from_response(response)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::handlers::configure_routes;
    use actix_web::http::StatusCode;
    use actix_web::{test as actix_test, App};
    use serde_json::json;

    fn request(text: &str) -> TtsStreamRequest {
        TtsStreamRequest {
            text: text.to_string(),
            language: None,
            style: None,
            model: None,
            pitch_variance: None,
            speed: None,
        }
    }

    #[test]
    fn test_text_is_trimmed() {
        let speech = request("  hello  ").validate().unwrap();
        assert_eq!(speech.text, "hello");
    }

    #[test]
    fn test_text_length_limits() {
        assert!(request("   ").validate().is_err());
        assert!(request(&"가".repeat(300)).validate().is_ok());

        let err = request(&"a".repeat(301)).validate().unwrap_err();
        assert_eq!(err.to_string(), "Validation error: text must be <= 300 characters");
    }

    #[actix_web::test]
    async fn test_empty_text_is_rejected_before_upstream() {
        let state = AppState::new(AppConfig::default()).unwrap();
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        let req = actix_test::TestRequest::post()
            .uri("/tts/stream")
            .set_json(json!({"text": "   "}))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "validation_error");
    }

    #[actix_web::test]
    async fn test_malformed_json_is_bad_request() {
        let state = AppState::new(AppConfig::default()).unwrap();
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure_routes),
        )
        .await;

        let req = actix_test::TestRequest::post()
            .uri("/tts/stream")
            .insert_header(("content-type", "application/json"))
            .set_payload("{\"language\": \"en\"}")
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "bad_request");
    }
}
