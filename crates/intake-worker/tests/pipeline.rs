//! End-to-end pipeline runs against in-memory stores and local storage.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use intake_core::models::{meta, NewIntakeRecord, RequestOrigin, SessionStatus, SessionType};
use intake_core::{
    IntakeRecord, IntakeSource, IntakeStatus, PipelineError, PipelineEvent, PipelineStage, Qid,
    RecordUpdate, Sid,
};
use intake_db::{IntakeRecordStore, MemoryIntakeRecordStore, MemorySessionStore};
use intake_processing::{
    sha256_hex, Extraction, ExtractionError, ExtractionInput, Extractor, HeuristicParser,
    LocalExtractor,
};
use intake_services::{
    CompositeScanner, Engines, IntakeNotification, Notifier, ProfileCreator, ScanInput,
    ScanVerdict, Scanner, SignatureScanner,
};
use intake_storage::{IntakeStorage, LocalStorage, StorageArea};
use intake_worker::{
    EventBus, PipelineContext, SessionManager, StaleSweeper, WorkerConfig, WorkerPool,
};
use serde_json::Value;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const EICAR: &str = r"X5O!P%@AP[4\PZX54(P^)7CC)7}$EICAR-STANDARD-ANTIVIRUS-TEST-FILE!$H+H*";

const RESUME: &str = "Ada Lovelace\n\
ada@example.com\n\
+44 20 7946 0958\n\
\n\
Skills\n\
Rust, PostgreSQL\n";

/// Single-page PDF with one Helvetica text line per entry.
fn text_pdf(lines: &[&str]) -> Vec<u8> {
    let mut content = String::from("BT\n/F1 12 Tf\n14 TL\n72 720 Td\n");
    for line in lines {
        content.push_str(&format!("({}) Tj\nT*\n", line));
    }
    content.push_str("ET\n");

    let objects = [
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Resources << /Font << /F1 4 0 R >> >> /Contents 5 0 R >>".to_string(),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>".to_string(),
        format!("<< /Length {} >>\nstream\n{}endstream", content.len(), content),
    ];

    let mut pdf = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
    }

    let xref = pdf.len();
    let mut tail = format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
    for offset in offsets {
        tail.push_str(&format!("{:010} 00000 n \n", offset));
    }
    tail.push_str(&format!(
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
        objects.len() + 1,
        xref
    ));
    pdf.extend_from_slice(tail.as_bytes());
    pdf
}

/// Scanner whose verdict can be set per record; everything else is clean.
#[derive(Default)]
struct ScriptedScanner {
    verdicts: Mutex<HashMap<Qid, ScanVerdict>>,
    calls: Mutex<HashMap<Qid, usize>>,
}

impl ScriptedScanner {
    fn script(&self, qid: Qid, verdict: ScanVerdict) {
        self.verdicts.lock().unwrap().insert(qid, verdict);
    }

    fn calls(&self, qid: Qid) -> usize {
        self.calls.lock().unwrap().get(&qid).copied().unwrap_or(0)
    }
}

fn qid_of(storage_path: &str) -> Option<Qid> {
    storage_path.split('/').nth(1)?.parse().ok()
}

#[async_trait]
impl Scanner for ScriptedScanner {
    fn engine_name(&self) -> &'static str {
        "scripted"
    }

    async fn scan(&self, input: &ScanInput) -> ScanVerdict {
        let Some(qid) = qid_of(&input.storage_path) else {
            return ScanVerdict::Clean;
        };
        *self.calls.lock().unwrap().entry(qid).or_default() += 1;
        self.verdicts
            .lock()
            .unwrap()
            .get(&qid)
            .cloned()
            .unwrap_or(ScanVerdict::Clean)
    }
}

#[derive(Default)]
struct ScriptedExtractor {
    failures: Mutex<HashMap<Qid, ExtractionError>>,
}

impl ScriptedExtractor {
    fn fail(&self, qid: Qid, error: ExtractionError) {
        self.failures.lock().unwrap().insert(qid, error);
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    fn engine_name(&self) -> &'static str {
        "scripted"
    }

    async fn extract(&self, input: ExtractionInput) -> Result<Extraction, ExtractionError> {
        if let Some(qid) = qid_of(&input.storage_path) {
            if let Some(error) = self.failures.lock().unwrap().remove(&qid) {
                return Err(error);
            }
        }
        Ok(Extraction::from_text(
            String::from_utf8_lossy(&input.data).into_owned(),
        ))
    }
}

#[derive(Default)]
struct RecordingProfiles {
    failing: AtomicBool,
}

#[async_trait]
impl ProfileCreator for RecordingProfiles {
    async fn create_profile(
        &self,
        record: &IntakeRecord,
        _parsed: &Value,
    ) -> Result<Option<String>, PipelineError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PipelineError::Finalize(
                "profile service returned 503".to_string(),
            ));
        }
        Ok(Some(format!("profile-{}", record.qid)))
    }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<IntakeNotification>>,
}

impl RecordingNotifier {
    fn sent_for(&self, qid: Qid) -> Vec<IntakeNotification> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.qid == qid)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &IntakeNotification) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

struct Harness {
    _dir: TempDir,
    records: Arc<MemoryIntakeRecordStore>,
    sessions: SessionManager,
    storage: IntakeStorage,
    bus: EventBus,
    config: WorkerConfig,
    scanner: Arc<ScriptedScanner>,
    extractor: Arc<ScriptedExtractor>,
    profiles: Arc<RecordingProfiles>,
    notifier: Arc<RecordingNotifier>,
    pool: WorkerPool,
}

impl Harness {
    async fn start() -> Self {
        Self::start_with(None).await
    }

    /// Start with `extractor` in place of the scripted one.
    async fn start_with(extractor: Option<Arc<dyn Extractor>>) -> Self {
        let dir = TempDir::new().unwrap();
        let backend = LocalStorage::new(dir.path(), "http://localhost:4000/files".to_string())
            .await
            .unwrap();
        let storage = IntakeStorage::new(Arc::new(backend), "http://localhost:4000".to_string(), 15);

        let records = Arc::new(MemoryIntakeRecordStore::new());
        let sessions = SessionManager::new(Arc::new(MemorySessionStore::new()), 60);
        let bus = EventBus::new(64);

        let scanner = Arc::new(ScriptedScanner::default());
        let scripted = Arc::new(ScriptedExtractor::default());
        let profiles = Arc::new(RecordingProfiles::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let engines = Engines {
            scanner: Arc::new(CompositeScanner::new(vec![
                Arc::new(SignatureScanner::new()) as Arc<dyn Scanner>,
                scanner.clone() as Arc<dyn Scanner>,
            ])),
            extractor: extractor.unwrap_or_else(|| scripted.clone() as Arc<dyn Extractor>),
            parser: Arc::new(HeuristicParser::new()),
            profiles: profiles.clone(),
            notifier: notifier.clone(),
        };

        let config = WorkerConfig {
            concurrency: 2,
            queue_capacity: 64,
            max_retries: 1,
            retry_delay: Duration::from_millis(10),
            stale_threshold_secs: 300,
            finalize_max_attempts: 3,
            ..WorkerConfig::default()
        };

        let context = PipelineContext {
            records: records.clone(),
            sessions: sessions.clone(),
            storage: storage.clone(),
            engines,
            bus: bus.clone(),
        };
        let pool = WorkerPool::new(&context, &config, CancellationToken::new());
        pool.start().await.unwrap();

        Self {
            _dir: dir,
            records,
            sessions,
            storage,
            bus,
            config,
            scanner,
            extractor: scripted,
            profiles,
            notifier,
            pool,
        }
    }

    /// Land a file in quarantine the way a completed upload does.
    async fn submit(&self, qid: Qid, sid: Option<Sid>, filename: &str, mime: &str, data: &[u8]) {
        let record = IntakeRecord::new(
            NewIntakeRecord {
                qid,
                sid,
                source: IntakeSource::Web,
                user_id: Some("user-1".to_string()),
                original_filename: filename.to_string(),
                storage_path: self.storage.quarantine_key(qid, filename),
                mime_type: mime.to_string(),
                file_size: data.len() as i64,
            },
            Utc::now(),
        );
        self.records.insert(&record).await.unwrap();

        let key = self
            .storage
            .put_quarantine(qid, filename, mime, Bytes::copy_from_slice(data))
            .await
            .unwrap();
        self.records
            .transition(
                qid,
                IntakeStatus::Initiated,
                RecordUpdate::advance(IntakeStatus::Quarantined)
                    .storage_path(key)
                    .content_hash(sha256_hex(data)),
            )
            .await
            .unwrap()
            .unwrap();

        self.bus
            .publish(PipelineEvent::stage_requested(
                PipelineStage::Scan,
                qid,
                RequestOrigin::Upload,
            ))
            .await
            .unwrap();
    }

    async fn record(&self, qid: Qid) -> IntakeRecord {
        self.records.get(qid).await.unwrap().unwrap()
    }

    /// Poll until the record reaches `status`.
    async fn wait_for(&self, qid: Qid, status: IntakeStatus) -> IntakeRecord {
        let result = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let record = self.record(qid).await;
                if record.status == status {
                    return record;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        match result {
            Ok(record) => record,
            Err(_) => panic!(
                "record {} never reached {} (last: {})",
                qid,
                status,
                self.record(qid).await.status
            ),
        }
    }

    async fn wait_for_notification(&self, qid: Qid) -> IntakeNotification {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if let Some(n) = self.notifier.sent_for(qid).into_iter().next() {
                    return n;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("no completion notification")
    }

    async fn wait_for_session(&self, sid: Sid, status: SessionStatus) {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if self.sessions.snapshot(sid).await.unwrap().status == status {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("session never settled");
    }

    async fn shutdown(self) {
        self.pool.shutdown(Duration::from_secs(2)).await;
    }
}

#[tokio::test]
async fn test_clean_resume_is_archived() {
    let h = Harness::start().await;
    let session = h.sessions.open(Some("user-1".to_string()), SessionType::Single).await.unwrap();
    h.sessions.attach(session.session_id).await.unwrap();

    let qid = Qid::generate();
    h.submit(qid, Some(session.session_id), "Ada Resume.txt", "text/plain", RESUME.as_bytes())
        .await;

    let record = h.wait_for(qid, IntakeStatus::Archived).await;
    assert_eq!(record.profile_id, Some(format!("profile-{}", qid)));
    assert_eq!(record.sanitized_filename.as_deref(), Some("ada_resume.txt"));
    assert_eq!(StorageArea::of(&record.storage_path), Some(StorageArea::Archive));
    assert_eq!(record.meta_str(meta::ARCHIVE_PATH), Some(record.storage_path.as_str()));
    assert_eq!(record.meta_str(meta::DOCUMENT_TYPE), Some("resume"));
    assert!(record.error_message.is_none());

    let output = record.parsed_output.as_ref().unwrap();
    assert_eq!(output["emails"], serde_json::json!(["ada@example.com"]));
    assert!(record.extracted_text.as_deref().unwrap().contains("Ada Lovelace"));

    let archived = h.storage.get(&record.storage_path).await.unwrap();
    assert_eq!(Some(sha256_hex(&archived).as_str()), record.content_hash.as_deref());

    let statuses: Vec<IntakeStatus> = h
        .records
        .history(qid)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.to)
        .collect();
    assert_eq!(
        statuses,
        vec![
            IntakeStatus::Initiated,
            IntakeStatus::Quarantined,
            IntakeStatus::Scanning,
            IntakeStatus::Clean,
            IntakeStatus::Sanitized,
            IntakeStatus::Extracting,
            IntakeStatus::Extracted,
            IntakeStatus::Parsing,
            IntakeStatus::Completed,
            IntakeStatus::Archived,
        ]
    );

    let notification = h.wait_for_notification(qid).await;
    assert_eq!(notification.status, IntakeStatus::Archived);

    // Only the archive copy survives.
    let quarantine = h.storage.quarantine_key(qid, "Ada Resume.txt");
    assert!(!h.storage.exists(&quarantine).await.unwrap());
    let sanitized = format!("sanitized/{}/ada_resume.txt", qid);
    assert!(!h.storage.exists(&sanitized).await.unwrap());

    h.wait_for_session(session.session_id, SessionStatus::Completed).await;
    let session = h.sessions.snapshot(session.session_id).await.unwrap();
    assert_eq!(session.processed_files, 1);
    assert_eq!(session.progress, 100);

    h.shutdown().await;
}

#[tokio::test]
async fn test_pdf_resume_is_extracted_and_archived() {
    let h = Harness::start_with(Some(Arc::new(LocalExtractor::new()))).await;
    let session = h.sessions.open(Some("user-1".to_string()), SessionType::Single).await.unwrap();
    h.sessions.attach(session.session_id).await.unwrap();

    let qid = Qid::generate();
    let pdf = text_pdf(&["Ada Lovelace", "ada@example.com", "Skills", "Rust, PostgreSQL"]);
    h.submit(qid, Some(session.session_id), "resume.pdf", "application/pdf", &pdf)
        .await;

    let record = h.wait_for(qid, IntakeStatus::Archived).await;
    assert_eq!(record.profile_id, Some(format!("profile-{}", qid)));
    assert_eq!(record.sanitized_filename.as_deref(), Some("resume.pdf"));
    assert_eq!(record.meta_str(meta::DOCUMENT_TYPE), Some("resume"));
    assert_eq!(StorageArea::of(&record.storage_path), Some(StorageArea::Archive));

    let text = record.extracted_text.as_deref().unwrap();
    assert!(text.contains("Ada Lovelace"), "got {:?}", text);
    assert!(text.contains("ada@example.com"));

    let archived = h.storage.get(&record.storage_path).await.unwrap();
    assert_eq!(archived.as_ref(), pdf.as_slice());

    h.wait_for_session(session.session_id, SessionStatus::Completed).await;
    h.shutdown().await;
}

#[tokio::test]
async fn test_eicar_upload_is_infected() {
    let h = Harness::start().await;
    let mut outcomes = h.bus.subscribe();

    let qid = Qid::generate();
    h.submit(qid, None, "notes.txt", "text/plain", EICAR.as_bytes()).await;

    let record = h.wait_for(qid, IntakeStatus::Infected).await;
    assert_eq!(record.meta_str(meta::VIRUS_NAME), Some("Eicar-Test-Signature"));
    assert_eq!(record.failed_stage(), Some(PipelineStage::Scan));
    assert!(record.error_message.is_some());
    assert!(record.extracted_text.is_none());

    let infected = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(PipelineEvent::FileInfected(event)) = outcomes.recv().await {
                if event.qid == qid {
                    return event;
                }
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(infected.virus_name, "Eicar-Test-Signature");

    let history = h.records.history(qid).await.unwrap();
    assert!(history.iter().all(|t| t.to != IntakeStatus::Sanitized));

    h.shutdown().await;
}

#[tokio::test]
async fn test_scan_engine_error_fails_after_retries() {
    let h = Harness::start().await;

    let qid = Qid::generate();
    h.scanner.script(qid, ScanVerdict::error("scripted", "daemon unreachable"));
    h.submit(qid, None, "cv.txt", "text/plain", RESUME.as_bytes()).await;

    let record = h.wait_for(qid, IntakeStatus::Failed).await;
    assert_eq!(record.failed_stage(), Some(PipelineStage::Scan));
    assert!(record.error_message.as_deref().unwrap().contains("daemon unreachable"));
    assert_eq!(h.scanner.calls(qid), h.config.max_retries as usize + 1);

    h.shutdown().await;
}

#[tokio::test]
async fn test_malformed_document_fails_at_extract() {
    let h = Harness::start().await;
    let session = h.sessions.open(None, SessionType::Single).await.unwrap();
    h.sessions.attach(session.session_id).await.unwrap();

    let qid = Qid::generate();
    h.extractor
        .fail(qid, ExtractionError::Malformed("truncated document".to_string()));
    h.submit(qid, Some(session.session_id), "cv.txt", "text/plain", RESUME.as_bytes())
        .await;

    let record = h.wait_for(qid, IntakeStatus::Failed).await;
    assert_eq!(record.failed_stage(), Some(PipelineStage::Extract));
    assert!(record.extracted_text.is_none());
    assert!(record.parsed_output.is_none());
    assert_eq!(StorageArea::of(&record.storage_path), Some(StorageArea::Sanitized));

    h.wait_for_session(session.session_id, SessionStatus::Failed).await;
    let session = h.sessions.snapshot(session.session_id).await.unwrap();
    assert_eq!(session.failed_files, 1);

    h.shutdown().await;
}

#[tokio::test]
async fn test_finalize_failure_keeps_parse_output_and_recovers() {
    let h = Harness::start().await;
    h.profiles.failing.store(true, Ordering::SeqCst);

    let qid = Qid::generate();
    h.submit(qid, None, "resume.txt", "text/plain", RESUME.as_bytes()).await;

    let failed = h.wait_for(qid, IntakeStatus::FinalizeFailed).await;
    assert!(failed.parsed_output.is_some());
    assert!(failed.extracted_text.is_some());
    assert!(failed.profile_id.is_none());
    assert_eq!(failed.failed_stage(), Some(PipelineStage::Finalize));
    assert_eq!(failed.meta_u64(meta::FINALIZE_ATTEMPTS), Some(1));
    assert!(failed.meta_str(meta::FINALIZE_ERROR).is_some());
    assert!(h.notifier.sent_for(qid).is_empty());

    h.profiles.failing.store(false, Ordering::SeqCst);
    let sweeper = StaleSweeper::new(h.records.clone(), h.bus.clone(), h.config.clone());
    let report = sweeper.run_once(Utc::now() + chrono::Duration::hours(1)).await;
    assert_eq!(report.finalize_retried, 1);

    let archived = h.wait_for(qid, IntakeStatus::Archived).await;
    assert_eq!(archived.profile_id, Some(format!("profile-{}", qid)));
    assert_eq!(archived.parsed_output, failed.parsed_output);
    assert!(archived.meta_str(meta::FINALIZE_ERROR).is_none());

    h.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_scan_request_is_discarded() {
    let h = Harness::start().await;

    let qid = Qid::generate();
    h.submit(qid, None, "resume.txt", "text/plain", RESUME.as_bytes()).await;
    h.bus
        .publish(PipelineEvent::stage_requested(
            PipelineStage::Scan,
            qid,
            RequestOrigin::Retry,
        ))
        .await
        .unwrap();

    h.wait_for(qid, IntakeStatus::Archived).await;
    h.wait_for_notification(qid).await;

    let scan = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let status = h.pool.status().await;
            let scan = status
                .stages
                .into_iter()
                .find(|s| s.stage == PipelineStage::Scan)
                .unwrap();
            if scan.processed == 2 {
                return scan;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(scan.advanced, 1);
    assert_eq!(scan.discarded, 1);
    assert_eq!(h.scanner.calls(qid), 1);

    let status = h.pool.status().await;
    assert!(status.running);
    assert_eq!(status.records_by_status.get("archived"), Some(&1));

    h.shutdown().await;
}
