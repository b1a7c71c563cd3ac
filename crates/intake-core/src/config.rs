//! Configuration module
//!
//! All settings are read from the environment (optionally seeded from a
//! `.env` file). Every tunable has a named default below; `validate()` rejects
//! combinations the service cannot start with.

use std::env;
use std::str::FromStr;

use crate::models::PipelineStage;
use crate::storage_types::{RecordStoreBackend, StorageBackend};

const SERVER_PORT: u16 = 4000;
const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const MAX_FILE_SIZE_MB: u64 = 10;
const DEFAULT_ALLOWED_EXTENSIONS: &str = "pdf,doc,docx,txt,rtf,jpg,jpeg,png";
const DEFAULT_ALLOWED_CONTENT_TYPES: &str = "application/pdf,application/msword,\
application/vnd.openxmlformats-officedocument.wordprocessingml.document,\
text/plain,application/rtf,text/rtf,image/jpeg,image/png";
const PRESIGN_EXPIRY_MINUTES: i64 = 15;
const MAX_PRESIGN_EXPIRY_MINUTES: i64 = 60;
const SESSION_TTL_MINUTES: i64 = 60;
const CLAMAV_PORT: u16 = 3310;
const CLAMAV_TIMEOUT_SECS: u64 = 30;
const WORKER_CONCURRENCY: usize = 4;
const STAGE_QUEUE_CAPACITY: usize = 1024;
const STAGE_MAX_RETRIES: u32 = 3;
const STAGE_RETRY_DELAY_MS: u64 = 2000;
const SCAN_TIMEOUT_SECS: u64 = 60;
const SANITIZE_TIMEOUT_SECS: u64 = 60;
const EXTRACT_TIMEOUT_SECS: u64 = 120;
const PARSE_TIMEOUT_SECS: u64 = 120;
const FINALIZE_TIMEOUT_SECS: u64 = 60;
const STALE_SWEEP_INTERVAL_SECS: u64 = 60;
const STALE_RECORD_THRESHOLD_SECS: i64 = 300;
const FINALIZE_MAX_ATTEMPTS: u32 = 5;
const NOTIFY_TIMEOUT_SECS: u64 = 10;
const ARCHIVE_RETENTION_DAYS: i64 = 0;
const RETENTION_SWEEP_INTERVAL_SECS: u64 = 3600;

/// Server-level settings
#[derive(Clone, Debug)]
pub struct BaseConfig {
    pub server_port: u16,
    pub cors_origins: Vec<String>,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    pub environment: String,
    /// Externally reachable base URL of this API, used for direct-upload targets.
    pub public_base_url: String,
    pub log_json: bool,
}

/// Intake pipeline configuration
#[derive(Clone, Debug)]
pub struct IntakeConfig {
    pub base: BaseConfig,
    // Record store
    pub record_store: RecordStoreBackend,
    pub database_url: Option<String>,
    // Blob storage
    pub storage_backend: StorageBackend,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>,
    pub local_storage_path: Option<String>,
    pub local_storage_base_url: Option<String>,
    // Upload limits
    pub max_file_size_bytes: u64,
    pub allowed_extensions: Vec<String>,
    pub allowed_content_types: Vec<String>,
    pub presign_expiry_minutes: i64,
    pub session_ttl_minutes: i64,
    // Scanning
    pub clamav_enabled: bool,
    pub clamav_host: String,
    pub clamav_port: u16,
    pub clamav_timeout_secs: u64,
    pub signature_scan_enabled: bool,
    // Stage workers
    pub worker_concurrency: usize,
    pub stage_queue_capacity: usize,
    pub stage_max_retries: u32,
    pub stage_retry_delay_ms: u64,
    pub scan_timeout_secs: u64,
    pub sanitize_timeout_secs: u64,
    pub extract_timeout_secs: u64,
    pub parse_timeout_secs: u64,
    pub finalize_timeout_secs: u64,
    /// 0 disables the stale-record sweep.
    pub stale_sweep_interval_secs: u64,
    pub stale_record_threshold_secs: i64,
    pub finalize_max_attempts: u32,
    // External engines
    pub parser_endpoint: Option<String>,
    pub parser_api_key: Option<String>,
    pub profile_service_url: Option<String>,
    pub notify_webhook_url: Option<String>,
    pub notify_webhook_secret: Option<String>,
    pub notify_timeout_secs: u64,
    // Retention
    /// 0 disables the archive-retention sweep.
    pub archive_retention_days: i64,
    pub retention_sweep_interval_secs: u64,
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Box<IntakeConfig>);

impl Config {
    fn as_intake(&self) -> &IntakeConfig {
        &self.0
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        is_production_name(&self.as_intake().base.environment)
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        let config = IntakeConfig::from_env()?;
        Ok(Config(Box::new(config)))
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.as_intake().validate()
    }

    pub fn server_port(&self) -> u16 {
        self.as_intake().base.server_port
    }

    pub fn cors_origins(&self) -> &[String] {
        &self.as_intake().base.cors_origins
    }

    pub fn environment(&self) -> &str {
        &self.as_intake().base.environment
    }

    pub fn public_base_url(&self) -> &str {
        self.as_intake().base.public_base_url.trim_end_matches('/')
    }

    pub fn log_json(&self) -> bool {
        self.as_intake().base.log_json
    }

    pub fn db_max_connections(&self) -> u32 {
        self.as_intake().base.db_max_connections
    }

    pub fn db_timeout_seconds(&self) -> u64 {
        self.as_intake().base.db_timeout_seconds
    }

    pub fn record_store(&self) -> RecordStoreBackend {
        self.as_intake().record_store
    }

    pub fn database_url(&self) -> Option<&str> {
        self.as_intake().database_url.as_deref()
    }

    pub fn storage_backend(&self) -> StorageBackend {
        self.as_intake().storage_backend
    }

    pub fn s3_bucket(&self) -> Option<&str> {
        self.as_intake().s3_bucket.as_deref()
    }

    pub fn s3_region(&self) -> Option<&str> {
        self.as_intake().s3_region.as_deref()
    }

    pub fn s3_endpoint(&self) -> Option<&str> {
        self.as_intake().s3_endpoint.as_deref()
    }

    pub fn local_storage_path(&self) -> Option<&str> {
        self.as_intake().local_storage_path.as_deref()
    }

    pub fn local_storage_base_url(&self) -> Option<&str> {
        self.as_intake().local_storage_base_url.as_deref()
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.as_intake().max_file_size_bytes
    }

    pub fn allowed_extensions(&self) -> &[String] {
        &self.as_intake().allowed_extensions
    }

    pub fn allowed_content_types(&self) -> &[String] {
        &self.as_intake().allowed_content_types
    }

    pub fn presign_expiry_minutes(&self) -> i64 {
        self.as_intake().presign_expiry_minutes
    }

    pub fn session_ttl_minutes(&self) -> i64 {
        self.as_intake().session_ttl_minutes
    }

    pub fn clamav_enabled(&self) -> bool {
        self.as_intake().clamav_enabled
    }

    pub fn clamav_host(&self) -> &str {
        &self.as_intake().clamav_host
    }

    pub fn clamav_port(&self) -> u16 {
        self.as_intake().clamav_port
    }

    pub fn clamav_timeout_secs(&self) -> u64 {
        self.as_intake().clamav_timeout_secs
    }

    pub fn signature_scan_enabled(&self) -> bool {
        self.as_intake().signature_scan_enabled
    }

    pub fn worker_concurrency(&self) -> usize {
        self.as_intake().worker_concurrency
    }

    pub fn stage_queue_capacity(&self) -> usize {
        self.as_intake().stage_queue_capacity
    }

    pub fn stage_max_retries(&self) -> u32 {
        self.as_intake().stage_max_retries
    }

    pub fn stage_retry_delay_ms(&self) -> u64 {
        self.as_intake().stage_retry_delay_ms
    }

    /// Upper bound on one adapter call of `stage`.
    pub fn stage_timeout_secs(&self, stage: PipelineStage) -> u64 {
        let c = self.as_intake();
        match stage {
            PipelineStage::Scan => c.scan_timeout_secs,
            PipelineStage::Sanitize => c.sanitize_timeout_secs,
            PipelineStage::Extract => c.extract_timeout_secs,
            PipelineStage::Parse => c.parse_timeout_secs,
            PipelineStage::Finalize => c.finalize_timeout_secs,
        }
    }

    pub fn stale_sweep_interval_secs(&self) -> u64 {
        self.as_intake().stale_sweep_interval_secs
    }

    pub fn stale_record_threshold_secs(&self) -> i64 {
        self.as_intake().stale_record_threshold_secs
    }

    pub fn finalize_max_attempts(&self) -> u32 {
        self.as_intake().finalize_max_attempts
    }

    pub fn parser_endpoint(&self) -> Option<&str> {
        self.as_intake().parser_endpoint.as_deref()
    }

    pub fn parser_api_key(&self) -> Option<&str> {
        self.as_intake().parser_api_key.as_deref()
    }

    pub fn profile_service_url(&self) -> Option<&str> {
        self.as_intake().profile_service_url.as_deref()
    }

    pub fn notify_webhook_url(&self) -> Option<&str> {
        self.as_intake().notify_webhook_url.as_deref()
    }

    pub fn notify_webhook_secret(&self) -> Option<&str> {
        self.as_intake().notify_webhook_secret.as_deref()
    }

    pub fn notify_timeout_secs(&self) -> u64 {
        self.as_intake().notify_timeout_secs
    }

    pub fn archive_retention_days(&self) -> i64 {
        self.as_intake().archive_retention_days
    }

    pub fn retention_sweep_interval_secs(&self) -> u64 {
        self.as_intake().retention_sweep_interval_secs
    }
}

impl From<IntakeConfig> for Config {
    fn from(config: IntakeConfig) -> Self {
        Config(Box::new(config))
    }
}

fn is_production_name(environment: &str) -> bool {
    let env = environment.to_lowercase();
    env == "production" || env == "prod"
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn env_list(key: &str, default: &str) -> Vec<String> {
    split_list(&env::var(key).unwrap_or_else(|_| default.to_string()))
}

impl Default for IntakeConfig {
    /// Settings for local development and tests: in-memory record store,
    /// local blob storage, signature scanning only.
    fn default() -> Self {
        IntakeConfig {
            base: BaseConfig {
                server_port: SERVER_PORT,
                cors_origins: vec!["*".to_string()],
                db_max_connections: MAX_CONNECTIONS,
                db_timeout_seconds: CONNECTION_TIMEOUT_SECS,
                environment: "development".to_string(),
                public_base_url: format!("http://localhost:{}", SERVER_PORT),
                log_json: false,
            },
            record_store: RecordStoreBackend::Memory,
            database_url: None,
            storage_backend: StorageBackend::Local,
            s3_bucket: None,
            s3_region: None,
            s3_endpoint: None,
            local_storage_path: Some("./data/intake".to_string()),
            local_storage_base_url: Some(format!("http://localhost:{}/files", SERVER_PORT)),
            max_file_size_bytes: MAX_FILE_SIZE_MB * 1024 * 1024,
            allowed_extensions: split_list(DEFAULT_ALLOWED_EXTENSIONS),
            allowed_content_types: split_list(DEFAULT_ALLOWED_CONTENT_TYPES),
            presign_expiry_minutes: PRESIGN_EXPIRY_MINUTES,
            session_ttl_minutes: SESSION_TTL_MINUTES,
            clamav_enabled: false,
            clamav_host: "localhost".to_string(),
            clamav_port: CLAMAV_PORT,
            clamav_timeout_secs: CLAMAV_TIMEOUT_SECS,
            signature_scan_enabled: true,
            worker_concurrency: WORKER_CONCURRENCY,
            stage_queue_capacity: STAGE_QUEUE_CAPACITY,
            stage_max_retries: STAGE_MAX_RETRIES,
            stage_retry_delay_ms: STAGE_RETRY_DELAY_MS,
            scan_timeout_secs: SCAN_TIMEOUT_SECS,
            sanitize_timeout_secs: SANITIZE_TIMEOUT_SECS,
            extract_timeout_secs: EXTRACT_TIMEOUT_SECS,
            parse_timeout_secs: PARSE_TIMEOUT_SECS,
            finalize_timeout_secs: FINALIZE_TIMEOUT_SECS,
            stale_sweep_interval_secs: STALE_SWEEP_INTERVAL_SECS,
            stale_record_threshold_secs: STALE_RECORD_THRESHOLD_SECS,
            finalize_max_attempts: FINALIZE_MAX_ATTEMPTS,
            parser_endpoint: None,
            parser_api_key: None,
            profile_service_url: None,
            notify_webhook_url: None,
            notify_webhook_secret: None,
            notify_timeout_secs: NOTIFY_TIMEOUT_SECS,
            archive_retention_days: ARCHIVE_RETENTION_DAYS,
            retention_sweep_interval_secs: RETENTION_SWEEP_INTERVAL_SECS,
        }
    }
}

impl IntakeConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let cors_origins_str = env::var("CORS_ORIGINS").unwrap_or_else(|_| "*".to_string());
        if is_production_name(&environment) && cors_origins_str.trim() == "*" {
            return Err(anyhow::anyhow!(
                "CORS_ORIGINS cannot be '*' in production. Please specify explicit origins."
            ));
        }
        let cors_origins: Vec<String> = cors_origins_str
            .split(',')
            .map(|s| s.trim().to_string())
            .collect();

        let server_port: u16 = env::var("PORT")
            .unwrap_or_else(|_| SERVER_PORT.to_string())
            .parse()
            .map_err(|_| anyhow::anyhow!("PORT must be a valid number"))?;

        let base = BaseConfig {
            server_port,
            cors_origins,
            db_max_connections: env_or("DB_MAX_CONNECTIONS", MAX_CONNECTIONS),
            db_timeout_seconds: env_or("DB_TIMEOUT_SECONDS", CONNECTION_TIMEOUT_SECS),
            environment,
            public_base_url: env_opt("PUBLIC_BASE_URL")
                .unwrap_or_else(|| format!("http://localhost:{}", server_port)),
            log_json: env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        };

        let database_url = env_opt("DATABASE_URL");
        let record_store = match env_opt("RECORD_STORE_BACKEND") {
            Some(value) => value.parse()?,
            None if database_url.is_some() => RecordStoreBackend::Postgres,
            None => RecordStoreBackend::Memory,
        };

        let storage_backend = match env_opt("STORAGE_BACKEND") {
            Some(value) => value.parse()?,
            None => StorageBackend::Local,
        };

        let max_file_size_mb: u64 = env_or("MAX_FILE_SIZE_MB", MAX_FILE_SIZE_MB);

        Ok(IntakeConfig {
            base,
            record_store,
            database_url,
            storage_backend,
            s3_bucket: env_opt("S3_BUCKET"),
            s3_region: env_opt("S3_REGION").or_else(|| env_opt("AWS_REGION")),
            s3_endpoint: env_opt("S3_ENDPOINT"),
            local_storage_path: env_opt("LOCAL_STORAGE_PATH"),
            local_storage_base_url: env_opt("LOCAL_STORAGE_BASE_URL"),
            max_file_size_bytes: max_file_size_mb * 1024 * 1024,
            allowed_extensions: env_list("ALLOWED_EXTENSIONS", DEFAULT_ALLOWED_EXTENSIONS),
            allowed_content_types: env_list(
                "ALLOWED_CONTENT_TYPES",
                DEFAULT_ALLOWED_CONTENT_TYPES,
            ),
            presign_expiry_minutes: env_or("PRESIGN_EXPIRY_MINUTES", PRESIGN_EXPIRY_MINUTES),
            session_ttl_minutes: env_or("SESSION_TTL_MINUTES", SESSION_TTL_MINUTES),
            clamav_enabled: env_or("CLAMAV_ENABLED", false),
            clamav_host: env::var("CLAMAV_HOST").unwrap_or_else(|_| "localhost".to_string()),
            clamav_port: env_or("CLAMAV_PORT", CLAMAV_PORT),
            clamav_timeout_secs: env_or("CLAMAV_TIMEOUT_SECS", CLAMAV_TIMEOUT_SECS),
            signature_scan_enabled: env_or("SIGNATURE_SCAN_ENABLED", true),
            worker_concurrency: env_or("WORKER_CONCURRENCY", WORKER_CONCURRENCY),
            stage_queue_capacity: env_or("STAGE_QUEUE_CAPACITY", STAGE_QUEUE_CAPACITY),
            stage_max_retries: env_or("STAGE_MAX_RETRIES", STAGE_MAX_RETRIES),
            stage_retry_delay_ms: env_or("STAGE_RETRY_DELAY_MS", STAGE_RETRY_DELAY_MS),
            scan_timeout_secs: env_or("SCAN_TIMEOUT_SECS", SCAN_TIMEOUT_SECS),
            sanitize_timeout_secs: env_or("SANITIZE_TIMEOUT_SECS", SANITIZE_TIMEOUT_SECS),
            extract_timeout_secs: env_or("EXTRACT_TIMEOUT_SECS", EXTRACT_TIMEOUT_SECS),
            parse_timeout_secs: env_or("PARSE_TIMEOUT_SECS", PARSE_TIMEOUT_SECS),
            finalize_timeout_secs: env_or("FINALIZE_TIMEOUT_SECS", FINALIZE_TIMEOUT_SECS),
            stale_sweep_interval_secs: env_or(
                "STALE_SWEEP_INTERVAL_SECS",
                STALE_SWEEP_INTERVAL_SECS,
            ),
            stale_record_threshold_secs: env_or(
                "STALE_RECORD_THRESHOLD_SECS",
                STALE_RECORD_THRESHOLD_SECS,
            ),
            finalize_max_attempts: env_or("FINALIZE_MAX_ATTEMPTS", FINALIZE_MAX_ATTEMPTS),
            parser_endpoint: env_opt("PARSER_ENDPOINT"),
            parser_api_key: env_opt("PARSER_API_KEY"),
            profile_service_url: env_opt("PROFILE_SERVICE_URL"),
            notify_webhook_url: env_opt("NOTIFY_WEBHOOK_URL"),
            notify_webhook_secret: env_opt("NOTIFY_WEBHOOK_SECRET"),
            notify_timeout_secs: env_or("NOTIFY_TIMEOUT_SECS", NOTIFY_TIMEOUT_SECS),
            archive_retention_days: env_or("ARCHIVE_RETENTION_DAYS", ARCHIVE_RETENTION_DAYS),
            retention_sweep_interval_secs: env_or(
                "RETENTION_SWEEP_INTERVAL_SECS",
                RETENTION_SWEEP_INTERVAL_SECS,
            ),
        })
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.record_store == RecordStoreBackend::Postgres {
            match self.database_url.as_deref() {
                Some(url) if url.starts_with("postgres://") || url.starts_with("postgresql://") => {
                }
                Some(_) => {
                    return Err(anyhow::anyhow!(
                        "DATABASE_URL must be a valid PostgreSQL connection string"
                    ))
                }
                None => {
                    return Err(anyhow::anyhow!(
                        "DATABASE_URL must be set when RECORD_STORE_BACKEND=postgres"
                    ))
                }
            }
        }

        match self.storage_backend {
            StorageBackend::S3 => {
                if self.s3_bucket.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_BUCKET must be set when using S3 storage backend"
                    ));
                }
                if self.s3_region.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_REGION or AWS_REGION must be set when using S3 storage backend"
                    ));
                }
            }
            StorageBackend::Local => {
                if self.local_storage_path.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_PATH must be set when using local storage backend"
                    ));
                }
                if self.local_storage_base_url.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_BASE_URL must be set when using local storage backend"
                    ));
                }
            }
        }

        if !(1..=MAX_PRESIGN_EXPIRY_MINUTES).contains(&self.presign_expiry_minutes) {
            return Err(anyhow::anyhow!(
                "PRESIGN_EXPIRY_MINUTES must be between 1 and {}",
                MAX_PRESIGN_EXPIRY_MINUTES
            ));
        }

        if self.max_file_size_bytes == 0 {
            return Err(anyhow::anyhow!("MAX_FILE_SIZE_MB must be greater than 0"));
        }

        if self.allowed_extensions.is_empty() || self.allowed_content_types.is_empty() {
            return Err(anyhow::anyhow!(
                "ALLOWED_EXTENSIONS and ALLOWED_CONTENT_TYPES must not be empty"
            ));
        }

        if !self.clamav_enabled && !self.signature_scan_enabled {
            return Err(anyhow::anyhow!(
                "At least one scan engine must be enabled (CLAMAV_ENABLED or SIGNATURE_SCAN_ENABLED)"
            ));
        }

        if self.worker_concurrency == 0 || self.stage_queue_capacity == 0 {
            return Err(anyhow::anyhow!(
                "WORKER_CONCURRENCY and STAGE_QUEUE_CAPACITY must be greater than 0"
            ));
        }

        if self.notify_webhook_secret.is_some() && self.notify_webhook_url.is_none() {
            return Err(anyhow::anyhow!(
                "NOTIFY_WEBHOOK_SECRET is set but NOTIFY_WEBHOOK_URL is missing"
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(f: impl FnOnce(&mut IntakeConfig)) -> Config {
        let mut c = IntakeConfig::default();
        f(&mut c);
        Config(Box::new(c))
    }

    #[test]
    fn test_default_config_is_valid() {
        let c = config(|_| {});
        assert!(c.validate().is_ok());
        assert!(!c.is_production());
        assert_eq!(c.max_file_size_bytes(), 10 * 1024 * 1024);
        assert!(c.allowed_extensions().iter().any(|e| e == "pdf"));
        assert!(c
            .allowed_content_types()
            .iter()
            .any(|t| t == "application/pdf"));
    }

    #[test]
    fn test_postgres_requires_database_url() {
        let c = config(|c| c.record_store = RecordStoreBackend::Postgres);
        assert!(c.validate().unwrap_err().to_string().contains("DATABASE_URL"));

        let c = config(|c| {
            c.record_store = RecordStoreBackend::Postgres;
            c.database_url = Some("mysql://x".to_string());
        });
        assert!(c.validate().is_err());

        let c = config(|c| {
            c.record_store = RecordStoreBackend::Postgres;
            c.database_url = Some("postgresql://localhost/intake".to_string());
        });
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_s3_requires_bucket_and_region() {
        let c = config(|c| c.storage_backend = StorageBackend::S3);
        assert!(c.validate().unwrap_err().to_string().contains("S3_BUCKET"));

        let c = config(|c| {
            c.storage_backend = StorageBackend::S3;
            c.s3_bucket = Some("intake".to_string());
        });
        assert!(c.validate().unwrap_err().to_string().contains("REGION"));
    }

    #[test]
    fn test_presign_expiry_is_minutes_not_hours() {
        let c = config(|c| c.presign_expiry_minutes = 240);
        assert!(c.validate().is_err());
        let c = config(|c| c.presign_expiry_minutes = 0);
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_some_scan_engine_is_required() {
        let c = config(|c| c.signature_scan_enabled = false);
        assert!(c.validate().unwrap_err().to_string().contains("scan engine"));
    }

    #[test]
    fn test_stage_timeouts() {
        let c = config(|c| c.extract_timeout_secs = 7);
        assert_eq!(c.stage_timeout_secs(PipelineStage::Extract), 7);
        assert_eq!(c.stage_timeout_secs(PipelineStage::Scan), SCAN_TIMEOUT_SECS);
    }

    #[test]
    fn test_public_base_url_trims_trailing_slash() {
        let c = config(|c| c.base.public_base_url = "https://intake.example.com/".to_string());
        assert_eq!(c.public_base_url(), "https://intake.example.com");
    }
}
