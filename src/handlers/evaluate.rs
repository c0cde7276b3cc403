//! # Pronunciation Evaluation Handlers
//!
//! The two public endpoints of the bridge. Both accept a multipart upload,
//! normalize the audio, sign a fresh session envelope and forward everything to
//! the scoring service. They differ only in the scoring parameters they send.
//!
//! ## Available Endpoints:
//! - `POST /api/analyze` - Read-aloud sentence scoring (`sent.eval.promax`)
//! - `POST /api/analyze-description` - Open-ended picture description (`speak.eval.pro`)
//!
//! ## Request:
//! Multipart form data with the audio in a field named `file`. `/api/analyze`
//! also reads an optional `refText` text field.
//!
//! ## Response:
//! The scoring service's JSON, unchanged, with status 200. Any pipeline failure
//! becomes `{"error": "<message>"}` with status 500.

use crate::audio::NormalizedAudio;
use crate::error::{AppError, AppResult, EvalError};
use crate::scoring::{AudioFormat, ScoringParameters};
use crate::state::AppState;
use actix_multipart::{Field, Multipart};
use actix_web::{web, HttpResponse};
use futures_util::stream::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, error, info};

/// Multipart field carrying the audio upload.
pub const AUDIO_FIELD: &str = "file";
/// Multipart field carrying the reference text of a read-aloud exercise.
pub const REF_TEXT_FIELD: &str = "refText";

/// Largest text field accepted alongside the upload.
const MAX_TEXT_FIELD_BYTES: usize = 64 * 1024;

/// Parts of an upload form the handlers care about.
#[derive(Debug, Default)]
pub struct EvaluationUpload {
    pub audio: Vec<u8>,
    pub filename: Option<String>,
    pub fields: HashMap<String, String>,
}

/// Scoring parameters for read-aloud sentence evaluation.
///
/// `refText` is omitted entirely when the client did not send one.
pub fn sentence_parameters(ref_text: Option<String>) -> ScoringParameters {
    let mut params = ScoringParameters::new()
        .with("scale", 100)
        .with("accent_dialect", "indian")
        .with("coreType", "sent.eval.promax");

    if let Some(ref_text) = ref_text {
        params.insert(REF_TEXT_FIELD, ref_text);
    }

    params
}

/// Scoring parameters for the IELTS part 1 picture description task.
pub fn description_parameters() -> ScoringParameters {
    ScoringParameters::new()
        .with("coreType", "speak.eval.pro")
        .with("test_type", "ielts")
        .with("task_type", "ielts_part1")
        .with("question_prompt", "Describe the picture.")
        .with("model", "non_native")
        .with("penalize_offtopic", 1)
}

/// Score a read-aloud sentence against its reference text.
///
/// ## Endpoint: `POST /api/analyze`
pub async fn analyze_sentence(
    state: web::Data<AppState>,
    payload: Multipart,
) -> AppResult<HttpResponse> {
    let mut upload = read_upload(payload, state.config.server.max_upload_bytes).await?;
    let params = sentence_parameters(upload.fields.remove(REF_TEXT_FIELD));
    evaluate(&state, upload, params).await
}

/// Score a spontaneous picture description.
///
/// ## Endpoint: `POST /api/analyze-description`
pub async fn analyze_description(
    state: web::Data<AppState>,
    payload: Multipart,
) -> AppResult<HttpResponse> {
    let upload = read_upload(payload, state.config.server.max_upload_bytes).await?;
    evaluate(&state, upload, description_parameters()).await
}

/// Run one evaluation and turn the outcome into a response.
async fn evaluate(
    state: &AppState,
    upload: EvaluationUpload,
    params: ScoringParameters,
) -> AppResult<HttpResponse> {
    let core_type = params
        .core_type()
        .ok_or_else(|| AppError::Internal("Scoring parameters lack a coreType".to_string()))?
        .to_string();

    info!(
        core_type = %core_type,
        upload_bytes = upload.audio.len(),
        filename = upload.filename.as_deref().unwrap_or("unknown"),
        "Evaluation requested"
    );

    match run_pipeline(state, &core_type, upload.audio, params).await {
        Ok(result) => {
            state.record_evaluation_success();
            Ok(HttpResponse::Ok().json(result))
        }
        Err(err) => {
            error!(core_type = %core_type, kind = err.kind(), error = %err, "Evaluation failed");
            state.record_evaluation_failure(err.kind());
            Err(err.into())
        }
    }
}

/// Normalize, sign, submit, parse. Stops at the first failure.
async fn run_pipeline(
    state: &AppState,
    core_type: &str,
    raw_audio: Vec<u8>,
    params: ScoringParameters,
) -> Result<Value, EvalError> {
    let audio: NormalizedAudio = state.normalizer.normalize(raw_audio).await?;

    // Signed only now, after transcoding, so the timestamps are as fresh as possible
    let envelope = state.envelope_builder.build(
        &state.config.scoring.user_id,
        AudioFormat::normalized_wav(),
        params,
    );
    let token_id = envelope.token_id().cloned().unwrap_or_default();
    debug!(
        core_type = %core_type,
        token_id = %token_id,
        "Session envelope built"
    );

    let body = state.dispatcher.submit(core_type, &envelope, audio).await?;
    serde_json::from_str(&body).map_err(|e| EvalError::MalformedResponse(e.to_string()))
}

/// Collect the upload and any text fields from a multipart stream.
///
/// Fails with a 400 when the stream is malformed, the audio field is missing
/// or the upload exceeds `max_upload_bytes`.
pub async fn read_upload(mut payload: Multipart, max_upload_bytes: usize) -> AppResult<EvaluationUpload> {
    let mut upload = EvaluationUpload::default();
    let mut audio_seen = false;

    while let Some(item) = payload.next().await {
        let mut field: Field =
            item.map_err(|e| AppError::BadRequest(format!("Multipart error: {}", e)))?;

        let content_disposition = field
            .content_disposition()
            .ok_or_else(|| AppError::BadRequest("Missing content disposition".to_string()))?;

        let field_name = content_disposition
            .get_name()
            .ok_or_else(|| AppError::BadRequest("Missing field name".to_string()))?
            .to_string();

        if field_name == AUDIO_FIELD {
            upload.filename = content_disposition.get_filename().map(|s| s.to_string());
            upload.audio = read_field(&mut field, max_upload_bytes, "Audio upload").await?;
            audio_seen = true;
        } else {
            let bytes = read_field(&mut field, MAX_TEXT_FIELD_BYTES, &field_name).await?;
            let text = String::from_utf8(bytes).map_err(|_| {
                AppError::BadRequest(format!("Field '{}' is not valid UTF-8", field_name))
            })?;
            upload.fields.insert(field_name, text);
        }
    }

    if !audio_seen {
        return Err(AppError::BadRequest(format!(
            "No audio file provided in field '{}'",
            AUDIO_FIELD
        )));
    }

    Ok(upload)
}

async fn read_field(field: &mut Field, limit: usize, label: &str) -> AppResult<Vec<u8>> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| AppError::BadRequest(format!("Chunk error: {}", e)))?;
        if bytes.len() + chunk.len() > limit {
            return Err(AppError::ValidationError(format!(
                "{} too large (max: {} bytes)",
                label, limit
            )));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

/// Configuration for evaluation routes
///
/// Registered as plain resources rather than an `/api` scope, which would
/// otherwise shadow the `/api/v1` scope.
pub fn configure_evaluation_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/analyze", web::post().to(analyze_sentence))
        .route("/api/analyze-description", web::post().to(analyze_description));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::normalizer::ffmpeg_available;
    #[cfg(unix)]
    use crate::audio::normalizer::stub_transcoder;
    use crate::audio::wav;
    use crate::state::test_config;
    use actix_web::http::{header, StatusCode};
    use actix_web::test::{call_service, init_service, read_body_json, TestRequest};
    use actix_web::App;
    use serde_json::json;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    const BOUNDARY: &str = "----evaluation-test-boundary";

    enum Part<'a> {
        Text(&'a str, &'a str),
        File(&'a str, &'a str, &'a [u8]),
    }

    fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            match part {
                Part::Text(name, value) => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                    );
                    body.extend_from_slice(value.as_bytes());
                }
                Part::File(name, filename, data) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                             Content-Type: application/octet-stream\r\n\r\n",
                            name, filename
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(data);
                }
            }
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn post(uri: &str, parts: &[Part<'_>]) -> TestRequest {
        TestRequest::post()
            .uri(uri)
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(multipart_body(parts))
    }

    fn stereo_upload() -> Vec<u8> {
        wav::pcm16_wav(44100, 2, &wav::tone(44100))
    }

    /// Engine that always emits one second of valid 16kHz mono audio.
    #[cfg(unix)]
    fn normalized_engine() -> (tempfile::TempDir, String) {
        stub_transcoder(&wav::pcm16_wav(16000, 1, &wav::tone(16000)))
    }

    macro_rules! app_for {
        ($config:expr) => {
            init_service(
                App::new()
                    .app_data(web::Data::new(AppState::new($config).unwrap()))
                    .configure(configure_evaluation_routes),
            )
            .await
        };
    }

    #[test]
    fn test_sentence_parameters() {
        let params = sentence_parameters(Some("Hello world".to_string()));
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(
            value,
            json!({
                "scale": 100,
                "accent_dialect": "indian",
                "coreType": "sent.eval.promax",
                "refText": "Hello world"
            })
        );

        let without_text = sentence_parameters(None);
        assert!(without_text.get(REF_TEXT_FIELD).is_none());
        assert_eq!(without_text.core_type(), Some("sent.eval.promax"));
    }

    #[test]
    fn test_description_parameters() {
        let params = description_parameters();
        assert_eq!(params.core_type(), Some("speak.eval.pro"));
        assert_eq!(params.get("penalize_offtopic"), Some(&json!(1)));
        assert_eq!(params.get("question_prompt"), Some(&json!("Describe the picture.")));
    }

    #[actix_web::test]
    async fn test_transcode_failure_skips_remote_call() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(0)
            .mount(&mock_server)
            .await;

        let app = app_for!(test_config(&mock_server.uri(), "/nonexistent/ffmpeg"));
        let resp = call_service(
            &app,
            post("/api/analyze", &[Part::File("file", "clip.mp3", b"not audio")])
                .to_request(),
        )
        .await;

        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = read_body_json(resp).await;
        let message = body["error"].as_str().unwrap();
        assert!(message.contains("Failed to start ffmpeg"));
        assert_eq!(body.as_object().unwrap().len(), 1);
    }

    #[actix_web::test]
    async fn test_missing_file_is_bad_request() {
        let app = app_for!(test_config("http://127.0.0.1:9", "/nonexistent/ffmpeg"));
        let resp = call_service(
            &app,
            post("/api/analyze", &[Part::Text("refText", "Hello world")])
                .to_request(),
        )
        .await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = read_body_json(resp).await;
        assert!(body["error"].as_str().unwrap().contains("No audio file"));
    }

    #[actix_web::test]
    async fn test_oversized_upload_rejected() {
        let mut config = test_config("http://127.0.0.1:9", "/nonexistent/ffmpeg");
        config.server.max_upload_bytes = 16;
        let app = app_for!(config);

        let resp = call_service(
            &app,
            post("/api/analyze-description", &[Part::File("file", "clip.wav", &[0u8; 64])])
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[cfg(unix)]
    #[actix_web::test]
    async fn test_sentence_evaluation_returns_remote_json() {
        let (_engine_dir, engine) = normalized_engine();
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sent.eval.promax"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"result":{"overall":78}}"#),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let app = app_for!(test_config(&mock_server.uri(), &engine));
        let resp = call_service(
            &app,
            post(
                "/api/analyze",
                &[
                    Part::Text("refText", "Hello world"),
                    Part::File("file", "clip.webm", b"\x1aE\xdf\xa3 webm upload bytes"),
                ],
            )
            .to_request(),
        )
        .await;

        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = read_body_json(resp).await;
        assert_eq!(body, json!({"result": {"overall": 78}}));

        let requests = mock_server.received_requests().await.unwrap();
        assert_eq!(requests[0].headers.get("Request-Index").unwrap(), "0");
        let sent = String::from_utf8_lossy(&requests[0].body);
        let text_at = sent.find("name=\"text\"").unwrap();
        let audio_at = sent.find("name=\"audio\"").unwrap();
        assert!(text_at < audio_at);
        assert!(sent.contains("\"coreType\":\"sent.eval.promax\",\"refText\":\"Hello world\",\"tokenId\":\""));
        assert!(sent.contains("\"userId\":\"uid\""));
        assert!(!sent.contains("test-secret-key"));
    }

    #[actix_web::test]
    async fn test_sentence_evaluation_end_to_end() {
        if !ffmpeg_available() {
            eprintln!("ffmpeg not found, skipping");
            return;
        }

        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sent.eval.promax"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"result":{"overall":91},"tokenId":"X"}"#),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let app = app_for!(test_config(&mock_server.uri(), "ffmpeg"));
        let upload = stereo_upload();
        let resp = call_service(
            &app,
            post(
                "/api/analyze",
                &[
                    Part::Text("refText", "The quick brown fox."),
                    Part::File("file", "clip.wav", &upload),
                ],
            )
            .to_request(),
        )
        .await;

        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = read_body_json(resp).await;
        assert_eq!(body, json!({"result": {"overall": 91}, "tokenId": "X"}));

        let requests = mock_server.received_requests().await.unwrap();
        let sent = String::from_utf8_lossy(&requests[0].body);
        assert!(sent.contains("\"refText\":\"The quick brown fox.\""));
        assert!(sent.contains("\"tokenId\":\""));
        assert!(sent.contains("\"applicationId\":\"test-app-key\""));
        assert!(!sent.contains("test-secret-key"));
        assert!(sent.contains("filename=\"audio.wav\""));
    }

    #[cfg(unix)]
    #[actix_web::test]
    async fn test_description_evaluation_uses_its_core_type() {
        let (_engine_dir, engine) = normalized_engine();
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/speak.eval.pro"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"result":{}}"#))
            .expect(1)
            .mount(&mock_server)
            .await;

        let app = app_for!(test_config(&mock_server.uri(), &engine));
        let upload = b"ID3\x04 compressed upload bytes".to_vec();
        let resp = call_service(
            &app,
            post("/api/analyze-description", &[Part::File("file", "clip.mp3", &upload)])
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[cfg(unix)]
    #[actix_web::test]
    async fn test_remote_status_maps_to_500() {
        let (_engine_dir, engine) = normalized_engine();
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let app = app_for!(test_config(&mock_server.uri(), &engine));
        let upload = b"ID3\x04 compressed upload bytes".to_vec();
        let resp = call_service(
            &app,
            post("/api/analyze", &[Part::File("file", "clip.mp3", &upload)])
                .to_request(),
        )
        .await;

        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = read_body_json(resp).await;
        assert_eq!(body, json!({"error": "HTTP status code 503"}));
    }

    #[cfg(unix)]
    #[actix_web::test]
    async fn test_non_json_response_maps_to_500() {
        let (_engine_dir, engine) = normalized_engine();
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
            .mount(&mock_server)
            .await;

        let app = app_for!(test_config(&mock_server.uri(), &engine));
        let upload = b"ID3\x04 compressed upload bytes".to_vec();
        let resp = call_service(
            &app,
            post("/api/analyze", &[Part::File("file", "clip.mp3", &upload)])
                .to_request(),
        )
        .await;

        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = read_body_json(resp).await;
        assert!(body["error"].as_str().unwrap().starts_with("Invalid JSON"));
    }
}
