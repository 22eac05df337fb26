use httpmock::prelude::*;
use jobwatch_client::{HttpJobStore, HttpJobStoreConfig};
use jobwatch_core::{JobStatus, JobStore, JobStoreError, StepStatus};
use serde_json::json;

fn store_for(server: &MockServer, auth_token: Option<&str>) -> HttpJobStore {
    HttpJobStore::new(HttpJobStoreConfig {
        api_base: server.url("/api"),
        auth_token: auth_token.map(str::to_string),
        request_timeout_ms: 2_000,
    })
    .expect("store builds")
}

#[tokio::test]
async fn integration_get_job_decodes_record_with_auth_header() {
    let server = MockServer::start();
    let record = server.mock(|when, then| {
        when.method(GET)
            .path("/api/jobs/job-7")
            .header("authorization", "Bearer secret")
            .header("accept", "application/json")
            .header_exists("x-jobwatch-request-id");
        then.status(200).json_body(json!({
            "id": "job-7",
            "status": "running",
            "progress": {"current": 3, "total": 10, "percentage": 30},
            "currentStep": "Generating reviews",
            "steps": [
                {"id": "fetch", "name": "Fetch products", "status": "completed"},
                {"id": "generate", "name": "Generating reviews", "status": "running"}
            ]
        }));
    });

    let job = store_for(&server, Some("secret"))
        .get_job("job-7")
        .await
        .expect("record");
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.progress.percentage, 30);
    assert_eq!(job.current_step.as_deref(), Some("Generating reviews"));
    assert_eq!(job.steps[1].status, StepStatus::Running);
    assert!(job.result.is_none());
    assert_eq!(record.calls(), 1);
}

#[tokio::test]
async fn integration_terminal_record_carries_result() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/jobs/job-8");
        then.status(200).json_body(json!({
            "id": "job-8",
            "status": "completed",
            "progress": {"current": 5, "total": 5, "percentage": 100},
            "result": {"siteUrl": "https://blog.example.com", "adminUser": "admin"}
        }));
    });

    let job = store_for(&server, None)
        .get_job("job-8")
        .await
        .expect("record");
    assert!(job.is_terminal());
    assert_eq!(
        job.result,
        Some(json!({"siteUrl": "https://blog.example.com", "adminUser": "admin"}))
    );
}

#[tokio::test]
async fn integration_missing_job_maps_to_not_found() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/jobs/ghost");
        then.status(404).body("no such job");
    });

    let error = store_for(&server, None)
        .get_job("ghost")
        .await
        .expect_err("missing job");
    assert_eq!(
        error,
        JobStoreError::NotFound {
            job_id: "ghost".to_string()
        }
    );
    assert!(!error.is_transient());
}

#[tokio::test]
async fn integration_server_errors_are_transient_and_keep_body_preview() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/jobs/job-9");
        then.status(503).body("maintenance window");
    });

    let error = store_for(&server, None)
        .get_job("job-9")
        .await
        .expect_err("unavailable");
    assert_eq!(
        error,
        JobStoreError::HttpStatus {
            status: 503,
            body: "maintenance window".to_string()
        }
    );
    assert!(error.is_transient());
}

#[tokio::test]
async fn regression_mismatched_or_malformed_records_are_decode_errors() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/jobs/job-1");
        then.status(200)
            .json_body(json!({"id": "job-2", "status": "running"}));
    });
    server.mock(|when, then| {
        when.method(GET).path("/api/jobs/job-3");
        then.status(200)
            .header("content-type", "application/json")
            .body("{\"id\":");
    });

    let store = store_for(&server, None);
    assert!(matches!(
        store.get_job("job-1").await,
        Err(JobStoreError::Decode(message)) if message.contains("job-2")
    ));
    assert!(matches!(
        store.get_job("job-3").await,
        Err(JobStoreError::Decode(_))
    ));
}
