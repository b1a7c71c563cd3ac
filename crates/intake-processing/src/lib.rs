//! Intake Processing Library
//!
//! Pure content handling for the intake pipeline: hashing, type validation,
//! sanitization, document-type detection, and the extraction and parsing
//! engine seams with their built-in engines.
//!
//! Nothing in this crate touches storage or the record store; stage workers
//! feed it bytes and persist whatever it returns.

pub mod doc_type;
pub mod extractor;
pub mod integrity;
pub mod parser;
pub mod sanitizer;
pub mod validator;

// Re-export commonly used types
pub use doc_type::DocumentType;
pub use extractor::{Extraction, ExtractionError, ExtractionInput, Extractor, LocalExtractor};
pub use integrity::{sha256_hex, verify_content_hash};
pub use parser::{HeuristicParser, ParseOutcome, Parser, ParsingError};
pub use sanitizer::{sanitize_filename, ContentSanitizer, SanitizeError, SanitizedFile};
pub use validator::{FileValidator, ValidationError};
