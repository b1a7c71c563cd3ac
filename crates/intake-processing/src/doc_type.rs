//! Document type heuristic used to route parsing.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Mime types that carry prose a parser can work with.
const TEXT_BEARING_TYPES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "text/plain",
    "application/rtf",
    "text/rtf",
];

const RESUME_TOKENS: &[&str] = &["resume", "résumé", "cv", "curriculum", "vitae"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Resume,
    CoverLetter,
    Generic,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Resume => "resume",
            DocumentType::CoverLetter => "cover_letter",
            DocumentType::Generic => "generic",
        }
    }

    /// Guess the document type from the mime type and filename keywords.
    ///
    /// Images and other non-text types are always `Generic`.
    pub fn detect(filename: &str, mime_type: &str) -> DocumentType {
        let mime = mime_type
            .split(';')
            .next()
            .unwrap_or(mime_type)
            .trim()
            .to_lowercase();
        if !TEXT_BEARING_TYPES.contains(&mime.as_str()) {
            return DocumentType::Generic;
        }

        let lowered = filename.to_lowercase();
        let tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();

        let cover_letter = tokens.contains(&"coverletter")
            || tokens
                .windows(2)
                .any(|pair| pair[0] == "cover" && pair[1] == "letter");
        if cover_letter {
            return DocumentType::CoverLetter;
        }

        if tokens.iter().any(|t| RESUME_TOKENS.contains(t)) {
            return DocumentType::Resume;
        }

        DocumentType::Generic
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
