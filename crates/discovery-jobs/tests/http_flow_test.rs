//! P&ID conversion over HTTP against a mock platform server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use discovery_client::{ApiConfig, DiscoveryConfig, PlatformClient};
use discovery_core::{DerivedArtifact, Error, SourceFile};
use discovery_jobs::{Callbacks, ContextualizationService, FlowOutcome, JobState, PollPolicy};

const ROOT: &str = "/api/v1/projects/test";

fn p(suffix: &str) -> String {
    format!("{}{}", ROOT, suffix)
}

fn service(server: &MockServer) -> ContextualizationService {
    let config = DiscoveryConfig {
        api: ApiConfig {
            base_url: server.uri(),
            project: "test".to_string(),
            token: Some("secret".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    let client = PlatformClient::new(config.api.clone()).expect("Failed to create client");
    ContextualizationService::from_client(client, &config)
        .with_poll_policy(PollPolicy::fixed(Duration::from_millis(10)))
        .with_link_retry(2, Duration::from_millis(10))
}

async fn mount_assets(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(p("/assets/aggregate")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [{ "count": 1 }] })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(p("/assets/list")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{ "id": 1, "name": "P-101" }]
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_pnid_conversion_over_http() {
    let server = MockServer::start().await;
    mount_assets(&server).await;

    Mock::given(method("POST"))
        .and(path(p("/context/pnid/parse")))
        .and(body_partial_json(json!({ "fileId": 10, "entities": [{ "name": "P-101", "id": 1 }] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "jobId": 41, "status": "Queued" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(p("/context/pnid/parse/41")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobId": 41,
            "status": "Completed",
            "items": [{ "text": "P-101", "assetId": 1 }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(p("/context/pnid/convert")))
        .and(body_partial_json(json!({ "fileId": 10, "items": [{ "text": "P-101" }] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "jobId": 42 })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(p("/context/pnid/convert/42")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "jobId": 42, "status": "Running" })),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(p("/context/pnid/convert/42")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobId": 42,
            "status": "Completed",
            "svgUrl": format!("{}/artifacts/y.svg", server.uri())
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/artifacts/y.svg"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<svg/>"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(p("/files")))
        .and(body_partial_json(json!({ "name": "Processed-diagram.svg", "assetIds": [1] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 500,
            "name": "Processed-diagram.svg",
            "mimeType": "image/svg+xml",
            "uploadUrl": format!("{}/upload/500", server.uri())
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/upload/500"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let source_link = json!({
        "externalId": "10-manual-pnid-500",
        "source": { "resource": "file", "resourceId": "500" },
        "target": { "resource": "file", "resourceId": "10" },
        "relationshipType": "belongsTo",
        "confidence": 1.0
    });
    let asset_link = json!({
        "externalId": "500-pnid-asset-1",
        "source": { "resource": "file", "resourceId": "500" },
        "target": { "resource": "asset", "resourceId": "1" },
        "relationshipType": "belongsTo"
    });
    Mock::given(method("POST"))
        .and(path(p("/relationships")))
        .and(body_partial_json(json!({ "items": [{ "externalId": "10-manual-pnid-500" }] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [source_link] })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(p("/relationships")))
        .and(body_partial_json(json!({ "items": [{ "externalId": "500-pnid-asset-1" }] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [asset_link] })))
        .expect(1)
        .mount(&server)
        .await;

    let results = Arc::new(Mutex::new(Vec::<DerivedArtifact>::new()));
    let errors = Arc::new(Mutex::new(Vec::<String>::new()));
    let (r, e) = (results.clone(), errors.clone());
    let state = service(&server)
        .start_pnid_conversion(
            SourceFile::new(10, "diagram.pdf"),
            Callbacks::new()
                .on_result(move |a| r.lock().unwrap().push(a))
                .on_error(move |err| e.lock().unwrap().push(err.to_string())),
        )
        .join()
        .await;

    assert_eq!(state, JobState::Done(FlowOutcome::Succeeded), "{:?}", errors.lock().unwrap());
    let results = results.lock().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].file.id, 500);
    assert_eq!(results[0].source_link.external_id, "10-manual-pnid-500");
    assert_eq!(results[0].asset_links.len(), 1);
}

#[tokio::test]
async fn test_rejected_submission_over_http() {
    let server = MockServer::start().await;
    mount_assets(&server).await;

    Mock::given(method("POST"))
        .and(path(p("/context/entity_extraction/extract")))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(p("/context/entity_extraction/1")))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let errors = Arc::new(Mutex::new(Vec::new()));
    let e = errors.clone();
    let state = service(&server)
        .start_entity_extraction(
            7,
            Callbacks::new()
                .on_result(|_| panic!("result callback must not run"))
                .on_error(move |err: Error| e.lock().unwrap().push(err)),
        )
        .join()
        .await;

    assert_eq!(state, JobState::Done(FlowOutcome::SubmissionError));
    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].to_string(), "Job submission failed: HTTP 500: no response body");
}
