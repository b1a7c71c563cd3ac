//! Test helpers: an intake app on in-memory stores and a temporary directory.

use std::time::Duration;

use axum_test::TestServer;
use base64::Engine as _;
use intake_api::{build_app, BackgroundTasks};
use intake_core::{Config, IntakeConfig};
use intake_db::Stores;
use intake_services::Engines;
use intake_storage::create_intake_storage;
use serde_json::{json, Value};
use tempfile::TempDir;

pub const RESUME: &str = "Ada Lovelace\n\
ada@example.com\n\
+44 20 7946 0958\n\
\n\
Experience\n\
Analytical Engine programmer\n";

pub const EICAR: &str = r"X5O!P%@AP[4\PZX54(P^)7CC)7}$EICAR-STANDARD-ANTIVIRUS-TEST-FILE!$H+H*";

pub struct TestApp {
    pub server: TestServer,
    pub background: BackgroundTasks,
    _temp_dir: TempDir,
}

fn create_test_config(temp_dir: &TempDir) -> Config {
    let mut config = IntakeConfig::default();
    config.local_storage_path = Some(temp_dir.path().to_string_lossy().into_owned());
    config.worker_concurrency = 2;
    config.stage_max_retries = 1;
    config.stage_retry_delay_ms = 10;
    // Sweeps are exercised directly in the worker crate.
    config.stale_sweep_interval_secs = 0;
    config.retention_sweep_interval_secs = 0;
    Config::from(config)
}

pub async fn setup_test_app() -> TestApp {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = create_test_config(&temp_dir);

    let storage = create_intake_storage(&config)
        .await
        .expect("Failed to create storage");
    let engines = Engines::from_config(&config).expect("Failed to build engines");
    let app = build_app(config, Stores::memory(), storage, engines)
        .await
        .expect("Failed to build app");

    let server = TestServer::new(app.router).expect("Failed to create test server");

    TestApp {
        server,
        background: app.background,
        _temp_dir: temp_dir,
    }
}

impl TestApp {
    pub async fn initiate(&self, filename: &str, mime_type: &str, size: usize) -> Value {
        let response = self
            .server
            .post("/intake/initiate-upload")
            .json(&json!({
                "filename": filename,
                "filesize": size,
                "mimeType": mime_type,
                "source": "web",
                "userID": "user-1"
            }))
            .await;
        assert_eq!(response.status_code(), 200, "initiate failed: {}", response.text());
        response.json::<Value>()
    }

    /// Initiate and complete an upload with the bytes inline; returns the qid.
    pub async fn upload(&self, filename: &str, mime_type: &str, data: &[u8]) -> String {
        let initiated = self.initiate(filename, mime_type, data.len()).await;
        let qid = initiated["qid"].as_str().expect("qid").to_string();

        let response = self
            .server
            .post("/intake/complete-upload")
            .json(&json!({
                "qid": qid,
                "contentBase64": base64::engine::general_purpose::STANDARD.encode(data)
            }))
            .await;
        assert_eq!(response.status_code(), 200, "complete failed: {}", response.text());
        qid
    }

    pub async fn status(&self, qid: &str) -> Value {
        let response = self.server.get(&format!("/intake/status/{}", qid)).await;
        assert_eq!(response.status_code(), 200);
        response.json::<Value>()
    }

    /// Poll the status endpoint until the record reaches `status`.
    pub async fn wait_for_status(&self, qid: &str, status: &str) -> Value {
        let mut last = Value::Null;
        for _ in 0..200 {
            last = self.status(qid).await;
            if last["status"] == status {
                return last;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("record {} never reached {}; last snapshot: {}", qid, status, last);
    }

    pub async fn shutdown(self) {
        self.background.shutdown(Duration::from_secs(5)).await;
    }
}
