//! Intake Services Layer
//!
//! Adapters to the pipeline's external collaborators: antivirus engines, the
//! remote parsing engine, the downstream profile service and the completion
//! webhook. Also hosts the archive-retention sweep. Stage workers only see the
//! traits defined here and in `intake-processing`.

pub mod engines;
pub mod notifier;
pub mod parser_http;
pub mod profile;
pub mod retention;
pub mod scanner;

pub use engines::Engines;
pub use notifier::{IntakeNotification, LogNotifier, Notifier, WebhookNotifier};
pub use parser_http::HttpParser;
pub use profile::{HttpProfileCreator, NoopProfileCreator, ProfileCreator};
pub use retention::{RetentionReport, RetentionService};
#[cfg(feature = "clamav")]
pub use scanner::ClamAvScanner;
pub use scanner::{CompositeScanner, ScanInput, ScanVerdict, Scanner, SignatureScanner};
