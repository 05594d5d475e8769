pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::batch::handlers;
use crate::state::AppState;

/// Upper bound on files in a single upload, used to size the request body limit.
const MAX_FILES_PER_UPLOAD: u64 = 50;

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.max_file_size_mb * 1024 * 1024 * MAX_FILES_PER_UPLOAD;

    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/v1/batches", post(handlers::handle_submit))
        .route("/api/v1/batches/:id", get(handlers::handle_get_batch))
        .route(
            "/api/v1/batches/:id/progress",
            get(handlers::handle_progress),
        )
        .route("/api/v1/batches/:id/cancel", post(handlers::handle_cancel))
        .route(
            "/api/v1/batches/:id/report.csv",
            get(handlers::handle_csv_report),
        )
        .route(
            "/api/v1/batches/:id/report.json",
            get(handlers::handle_json_report),
        )
        .layer(DefaultBodyLimit::max(body_limit as usize))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use axum::response::Response;
    use serde_json::Value;
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::batch::registry::BatchRegistry;
    use crate::batch::testing::{ScriptedClient, Step};
    use crate::batch::{BatchConfig, BatchScheduler};
    use crate::config::Config;
    use crate::extraction::FileExtractor;

    const BOUNDARY: &str = "analyzer-test-boundary";

    fn app(client: ScriptedClient) -> Router {
        let config = Config {
            anthropic_api_key: "test-key".to_string(),
            port: 0,
            rust_log: "debug".to_string(),
            max_file_size_mb: 1,
            batch_retention: Duration::from_secs(3600),
            batch_defaults: BatchConfig::default(),
        };
        let scheduler = BatchScheduler::new(Arc::new(FileExtractor::new(1)), Arc::new(client));
        build_router(AppState {
            config,
            scheduler,
            registry: BatchRegistry::new(Duration::from_secs(3600)),
        })
    }

    /// `files` are (file name, contents); `fields` are plain text parts.
    fn multipart(files: &[(&str, &str)], fields: &[(&str, &str)]) -> Request<Body> {
        let mut body = String::new();
        for (name, value) in fields {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            ));
        }
        for (file_name, contents) in files {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{file_name}\"\r\nContent-Type: text/plain\r\n\r\n{contents}\r\n"
            ));
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));

        Request::builder()
            .method("POST")
            .uri("/api/v1/batches")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn get(uri: String) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn submit(app: &Router, files: &[(&str, &str)], fields: &[(&str, &str)]) -> Uuid {
        let response = app.clone().oneshot(multipart(files, fields)).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = json(response).await;
        body["batch_id"].as_str().unwrap().parse().unwrap()
    }

    async fn wait_for_status(app: &Router, id: Uuid, status: &str) -> Value {
        for _ in 0..200 {
            let response = app
                .clone()
                .oneshot(get(format!("/api/v1/batches/{id}")))
                .await
                .unwrap();
            let body = json(response).await;
            if body["status"] == status {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("batch {id} never reached {status}");
    }

    #[tokio::test]
    async fn test_health() {
        let response = app(ScriptedClient::new())
            .oneshot(get("/health".to_string()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["service"], "analyzer-api");
    }

    #[tokio::test]
    async fn test_submit_runs_batch_and_serves_reports() {
        let app = app(ScriptedClient::new());
        let id = submit(
            &app,
            &[("asha.txt", "Asha Rao, ML intern"), ("ben.txt", "Ben, data engineer")],
            &[("concurrency", "2"), ("rate_limit_secs", "0.5")],
        )
        .await;

        let view = wait_for_status(&app, id, "completed").await;
        assert_eq!(view["result"]["summary"]["succeeded"], 2);
        assert_eq!(view["progress"]["completed"], 2);
        assert_eq!(view["result"]["jobs"][0]["source"]["name"], "asha.txt");

        let csv = app
            .clone()
            .oneshot(get(format!("/api/v1/batches/{id}/report.csv")))
            .await
            .unwrap();
        assert_eq!(csv.status(), StatusCode::OK);
        assert!(csv.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/csv"));
        assert!(csv.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .contains("resume_analysis_"));
        let text = to_bytes(csv.into_body(), usize::MAX).await.unwrap();
        assert_eq!(String::from_utf8_lossy(&text).lines().count(), 3);

        let report = app
            .clone()
            .oneshot(get(format!("/api/v1/batches/{id}/report.json")))
            .await
            .unwrap();
        assert_eq!(report.status(), StatusCode::OK);
        assert_eq!(json(report).await["metadata"]["total_resumes"], 2);
    }

    #[tokio::test]
    async fn test_unsupported_file_fails_without_aborting_batch() {
        let app = app(ScriptedClient::new());
        let id = submit(&app, &[("resume.rtf", "binary"), ("ok.txt", "text")], &[]).await;

        let view = wait_for_status(&app, id, "completed").await;
        let summary = &view["result"]["summary"];
        assert_eq!(summary["succeeded"], 1);
        assert_eq!(summary["failed"], 1);
        assert_eq!(summary["failures"][0]["kind"], "permanent");
        assert_eq!(summary["failures"][0]["attempts"], 0);
    }

    #[tokio::test]
    async fn test_out_of_range_override_is_rejected() {
        let response = app(ScriptedClient::new())
            .oneshot(multipart(&[("a.txt", "text")], &[("concurrency", "50")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(response).await["error"]["code"], "INVALID_BATCH_CONFIG");
    }

    #[tokio::test]
    async fn test_empty_upload_is_rejected() {
        let response = app(ScriptedClient::new())
            .oneshot(multipart(&[], &[("batch_size", "5")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_report_conflicts_while_running_then_cancel() {
        let app = app(ScriptedClient::with_default(Step::Slow(Duration::from_secs(2))));
        let id = submit(
            &app,
            &[("a.txt", "a"), ("b.txt", "b"), ("c.txt", "c")],
            &[("concurrency", "1")],
        )
        .await;

        let report = app
            .clone()
            .oneshot(get(format!("/api/v1/batches/{id}/report.csv")))
            .await
            .unwrap();
        assert_eq!(report.status(), StatusCode::CONFLICT);

        loop {
            let response = app
                .clone()
                .oneshot(get(format!("/api/v1/batches/{id}/progress")))
                .await
                .unwrap();
            if json(response).await["in_flight"] == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let cancel = Request::builder()
            .method("POST")
            .uri(format!("/api/v1/batches/{id}/cancel"))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(cancel).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["cancel_requested"], true);

        let view = wait_for_status(&app, id, "completed").await;
        assert!(view["result"]["summary"]["skipped"].as_u64().unwrap() >= 2);
    }

    #[tokio::test]
    async fn test_oversized_file_is_rejected_while_streaming() {
        let big = "x".repeat(1024 * 1024 + 1);
        let response = app(ScriptedClient::new())
            .oneshot(multipart(&[("small.txt", "fine"), ("big.txt", &big)], &[]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let body = json(response).await;
        assert_eq!(body["error"]["code"], "FILE_TOO_LARGE");
        assert!(body["error"]["message"].as_str().unwrap().contains("big.txt"));
    }

    #[tokio::test]
    async fn test_reports_keep_uploaded_file_name() {
        let app = app(ScriptedClient::new());
        let id = submit(&app, &[("My Resume (2024).txt", "Asha Rao")], &[]).await;

        let view = wait_for_status(&app, id, "completed").await;
        assert_eq!(view["result"]["jobs"][0]["source"]["name"], "My Resume (2024).txt");
        assert_eq!(view["result"]["summary"]["succeeded"], 1);

        let progress = app
            .clone()
            .oneshot(get(format!("/api/v1/batches/{id}/progress")))
            .await
            .unwrap();
        let progress = json(progress).await;
        assert_eq!(progress["finished"], true);
        assert_eq!(progress["percent_complete"], 100.0);
        assert_eq!(progress["succeeded"], 1);
    }

    #[tokio::test]
    async fn test_unknown_batch_is_not_found() {
        let app = app(ScriptedClient::new());
        let id = Uuid::new_v4();
        for uri in [
            format!("/api/v1/batches/{id}"),
            format!("/api/v1/batches/{id}/progress"),
            format!("/api/v1/batches/{id}/report.json"),
        ] {
            let response = app.clone().oneshot(get(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }
    }
}
