mod helpers;

use axum::http::StatusCode;
use helpers::{setup_test_app, EICAR, RESUME};
use serde_json::{json, Value};

#[tokio::test]
async fn test_text_resume_flows_to_archive() {
    let app = setup_test_app().await;

    let initiated = app
        .initiate("Ada Resume.txt", "text/plain", RESUME.len())
        .await;
    assert_eq!(initiated["maxFileSize"], 10 * 1024 * 1024);
    assert_eq!(initiated["uploadTarget"]["method"], "PUT");
    assert_eq!(initiated["uploadTarget"]["presigned"], false);
    let qid = initiated["qid"].as_str().unwrap().to_string();

    let staged = app
        .server
        .put(&format!("/intake/upload/{}", qid))
        .bytes(RESUME.as_bytes().to_vec().into())
        .await;
    assert_eq!(staged.status_code(), StatusCode::NO_CONTENT);

    let completed = app
        .server
        .post("/intake/complete-upload")
        .json(&json!({ "qid": qid }))
        .await;
    assert_eq!(completed.status_code(), StatusCode::OK);
    let body = completed.json::<Value>();
    assert_eq!(body["status"], "processing");
    assert_eq!(body["resumedAt"], "scan");

    let record = app.wait_for_status(&qid, "archived").await;
    assert_eq!(record["sanitizedFilename"], "ada_resume.txt");
    assert!(record["parsedOutput"]["emails"]
        .as_array()
        .unwrap()
        .iter()
        .any(|e| e == "ada@example.com"));
    assert!(record.get("errorMessage").map_or(true, Value::is_null));

    let history = app
        .server
        .get(&format!("/intake/history/{}", qid))
        .await
        .json::<Value>();
    let statuses: Vec<&str> = history["transitions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["to"].as_str().unwrap())
        .collect();
    assert_eq!(
        statuses,
        vec![
            "initiated",
            "quarantined",
            "scanning",
            "clean",
            "sanitized",
            "extracting",
            "extracted",
            "parsing",
            "completed",
            "archived"
        ]
    );

    app.shutdown().await;
}

#[tokio::test]
async fn test_eicar_upload_ends_infected() {
    let app = setup_test_app().await;
    let qid = app.upload("cv.txt", "text/plain", EICAR.as_bytes()).await;

    let record = app.wait_for_status(&qid, "infected").await;
    assert!(record["errorMessage"].as_str().is_some());

    let retry = app.server.post(&format!("/intake/retry/{}", qid)).await;
    assert_eq!(retry.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(retry.json::<Value>()["code"], "BAD_REQUEST");

    app.shutdown().await;
}

#[tokio::test]
async fn test_executable_is_refused_at_initiation() {
    let app = setup_test_app().await;

    let response = app
        .server
        .post("/intake/initiate-upload")
        .json(&json!({
            "filename": "resume.pdf.exe",
            "filesize": 2048,
            "mimeType": "application/pdf",
            "source": "email"
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = response.json::<Value>();
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert_eq!(body["recoverable"], false);

    let workers = app.server.get("/intake/worker-status").await.json::<Value>();
    assert_eq!(workers["recordsByStatus"], json!({}));

    app.shutdown().await;
}

#[tokio::test]
async fn test_oversized_declaration_is_413() {
    let app = setup_test_app().await;

    let response = app
        .server
        .post("/intake/initiate-upload")
        .json(&json!({
            "filename": "resume.pdf",
            "filesize": 50u64 * 1024 * 1024,
            "mimeType": "application/pdf",
            "source": "web"
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::PAYLOAD_TOO_LARGE);

    app.shutdown().await;
}

#[tokio::test]
async fn test_mismatched_bytes_are_rejected() {
    let app = setup_test_app().await;
    let fake_pdf = b"this is not a pdf at all";

    let initiated = app
        .initiate("resume.pdf", "application/pdf", fake_pdf.len())
        .await;
    let qid = initiated["qid"].as_str().unwrap().to_string();

    let response = app
        .server
        .post("/intake/complete-upload")
        .json(&json!({
            "qid": qid,
            "contentBase64": base64_encode(fake_pdf)
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

    let record = app.status(&qid).await;
    assert_eq!(record["status"], "rejected");
    assert!(record["errorMessage"].as_str().is_some());

    app.shutdown().await;
}

#[tokio::test]
async fn test_complete_upload_is_idempotent() {
    let app = setup_test_app().await;
    let qid = app.upload("cv.txt", "text/plain", RESUME.as_bytes()).await;
    app.wait_for_status(&qid, "archived").await;

    let again = app
        .server
        .post("/intake/complete-upload")
        .json(&json!({ "qid": qid, "contentBase64": base64_encode(RESUME.as_bytes()) }))
        .await;
    assert_eq!(again.status_code(), StatusCode::OK);
    let body = again.json::<Value>();
    assert_eq!(body["status"], "archived");
    assert!(body.get("resumedAt").is_none());

    let retry = app.server.post(&format!("/intake/retry/{}", qid)).await;
    assert_eq!(retry.status_code(), StatusCode::BAD_REQUEST);

    app.shutdown().await;
}

#[tokio::test]
async fn test_unknown_and_malformed_ids() {
    let app = setup_test_app().await;

    let missing = app
        .server
        .get("/intake/status/01890a5d-ac96-774b-bcce-b302099a8057")
        .await;
    assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(missing.json::<Value>()["code"], "NOT_FOUND");

    let malformed = app.server.get("/intake/history/not-a-uuid").await;
    assert_eq!(malformed.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(malformed.json::<Value>()["code"], "INVALID_INPUT");

    app.shutdown().await;
}

#[tokio::test]
async fn test_session_tracks_uploads() {
    let app = setup_test_app().await;

    let created = app
        .server
        .post("/intake/sessions")
        .json(&json!({ "userID": "user-1", "sessionType": "batch" }))
        .await;
    assert_eq!(created.status_code(), StatusCode::CREATED);
    let session = created.json::<Value>();
    let sid = session["sessionID"].as_str().unwrap().to_string();
    assert_eq!(session["status"], "active");

    let initiated = app
        .server
        .post("/intake/initiate-upload")
        .json(&json!({
            "filename": "cv.txt",
            "filesize": RESUME.len(),
            "mimeType": "text/plain",
            "source": "telegram",
            "sessionID": sid
        }))
        .await;
    assert_eq!(initiated.status_code(), StatusCode::OK);
    let qid = initiated.json::<Value>()["qid"].as_str().unwrap().to_string();

    app.server
        .post("/intake/complete-upload")
        .json(&json!({ "qid": qid, "contentBase64": base64_encode(RESUME.as_bytes()) }))
        .await;
    app.wait_for_status(&qid, "archived").await;

    let mut snapshot = Value::Null;
    for _ in 0..100 {
        snapshot = app
            .server
            .get(&format!("/intake/sessions/{}", sid))
            .await
            .json::<Value>();
        if snapshot["status"] == "completed" {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(snapshot["status"], "completed");
    assert_eq!(snapshot["fileCount"], 1);
    assert_eq!(snapshot["processedFiles"], 1);

    app.shutdown().await;
}

#[tokio::test]
async fn test_health_and_worker_status() {
    let app = setup_test_app().await;

    let health = app.server.get("/intake/health").await;
    assert_eq!(health.status_code(), StatusCode::OK);
    let body = health.json::<Value>();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["recordStore"], "healthy");
    assert_eq!(body["storage"], "healthy");
    assert_eq!(body["eventBus"], "healthy");

    let workers = app.server.get("/intake/worker-status").await;
    assert_eq!(workers.status_code(), StatusCode::OK);
    let body = workers.json::<Value>();
    assert_eq!(body["running"], true);
    assert_eq!(body["stages"].as_array().unwrap().len(), 5);
    assert_eq!(body["stages"][0]["stage"], "scan");
    assert_eq!(body["stages"][0]["maxWorkers"], 2);

    let openapi = app.server.get("/api-docs/openapi.json").await;
    assert_eq!(openapi.status_code(), StatusCode::OK);
    assert!(openapi.json::<Value>()["paths"]["/intake/initiate-upload"].is_object());

    app.shutdown().await;
}

fn base64_encode(data: &[u8]) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.encode(data)
}
