use crate::state::{AppMetrics, AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": overall_error_rate(&metrics),
            "evaluations_completed": metrics.evaluations_completed
        },
        "scoring": {
            "base_url": state.dispatcher.base_url(),
            "user_id": config.scoring.user_id
        },
        "transcoder": {
            "ffmpeg_path": state.normalizer.ffmpeg_path(),
            "sample_rate": config.transcoder.sample_rate,
            "channels": config.transcoder.channels,
            "sample_format": config.transcoder.sample_format
        }
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats = Vec::new();
    for (endpoint, metric) in metrics.endpoint_metrics.iter() {
        endpoint_stats.push(json!({
            "endpoint": endpoint,
            "request_count": metric.request_count,
            "error_count": metric.error_count,
            "error_rate": metric.error_rate(),
            "average_duration_ms": metric.average_duration_ms(),
            "total_duration_ms": metric.total_duration_ms
        }));
    }

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": overall_error_rate(&metrics),
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "evaluations": {
            "completed": metrics.evaluations_completed,
            "failed": metrics.evaluation_failures
        },
        "endpoints": endpoint_stats
    }))
}

fn overall_error_rate(metrics: &AppMetrics) -> f64 {
    if metrics.request_count > 0 {
        metrics.error_count as f64 / metrics.request_count as f64
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_config;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_health_reports_components() {
        let state = AppState::new(test_config("https://scoring.invalid", "/opt/ffmpeg")).unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "healthy");
        assert_eq!(body["scoring"]["base_url"], "https://scoring.invalid");
        assert_eq!(body["transcoder"]["ffmpeg_path"], "/opt/ffmpeg");
        assert!(!body.to_string().contains("test-secret-key"));
    }

    #[actix_web::test]
    async fn test_metrics_lists_failures() {
        let state = AppState::new(test_config("https://scoring.invalid", "ffmpeg")).unwrap();
        state.record_evaluation_failure("transcode_error");
        state.record_endpoint_request("POST /api/analyze", 10, true);

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/metrics", web::get().to(detailed_metrics)),
        )
        .await;

        let req = test::TestRequest::get().uri("/metrics").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["evaluations"]["failed"]["transcode_error"], 1);
        assert_eq!(body["endpoints"][0]["endpoint"], "POST /api/analyze");
    }
}
