//! Scan engine adapter.
//!
//! Every engine reports an explicit [`ScanVerdict`]; engine failures are an
//! `Error` verdict and are never read as clean.

#[cfg(feature = "clamav")]
pub mod clamav;
pub mod composite;
pub mod signature;

use async_trait::async_trait;
use bytes::Bytes;

#[cfg(feature = "clamav")]
pub use clamav::ClamAvScanner;
pub use composite::CompositeScanner;
pub use signature::SignatureScanner;

#[derive(Debug, Clone)]
pub struct ScanInput {
    pub storage_path: String,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanVerdict {
    Clean,
    Infected { engine: String, virus_name: String },
    Error { engine: String, reason: String },
}

impl ScanVerdict {
    pub fn error(engine: &str, reason: impl Into<String>) -> Self {
        ScanVerdict::Error {
            engine: engine.to_string(),
            reason: reason.into(),
        }
    }

    pub fn infected(engine: &str, virus_name: impl Into<String>) -> Self {
        ScanVerdict::Infected {
            engine: engine.to_string(),
            virus_name: virus_name.into(),
        }
    }
}

#[async_trait]
pub trait Scanner: Send + Sync {
    fn engine_name(&self) -> &'static str;

    async fn scan(&self, input: &ScanInput) -> ScanVerdict;
}
