//! Text extraction engine seam.
//!
//! Stage workers depend on the [`Extractor`] trait only. [`LocalExtractor`]
//! is the in-process engine; a remote engine plugs in behind the same trait.

use async_trait::async_trait;
use bytes::Bytes;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Instant;

/// Upper bound on the decompressed `word/document.xml` we are willing to read.
#[cfg(feature = "document")]
const MAX_DOCUMENT_XML_BYTES: u64 = 32 * 1024 * 1024;

/// Shortest printable run kept when scraping legacy Word binaries.
const MIN_BINARY_RUN: usize = 4;

static XML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid xml tag pattern"));
static RTF_DESTINATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\\(?:fonttbl|colortbl|stylesheet|info|\*)(?:[^{}]|\{[^{}]*\})*\}")
        .expect("valid rtf destination pattern")
});
static RTF_PAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\(?:par|line)\b ?").expect("valid rtf paragraph pattern"));
static RTF_HEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\'([0-9a-fA-F]{2})").expect("valid rtf hex pattern"));
static RTF_CONTROL_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\[a-zA-Z]+-?\d* ?").expect("valid rtf control word pattern"));

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExtractionError {
    #[error("Unsupported content type for extraction: {0}")]
    Unsupported(String),

    #[error("Malformed document: {0}")]
    Malformed(String),

    #[error("Extraction engine error: {0}")]
    Engine(String),

    #[error("Extraction engine unavailable: {0}")]
    Unavailable(String),
}

impl ExtractionError {
    /// Whether another attempt might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ExtractionError::Engine(_) | ExtractionError::Unavailable(_))
    }
}

#[derive(Debug, Clone)]
pub struct ExtractionInput {
    pub storage_path: String,
    pub filename: String,
    pub mime_type: String,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub text: String,
    /// Share of printable characters in `text`, 0.0 to 1.0.
    pub quality: f64,
}

impl Extraction {
    pub fn from_text(text: String) -> Self {
        let quality = text_quality(&text);
        Self { text, quality }
    }
}

#[async_trait]
pub trait Extractor: Send + Sync {
    fn engine_name(&self) -> &'static str;

    async fn extract(&self, input: ExtractionInput) -> Result<Extraction, ExtractionError>;
}

/// Ratio of printable characters to all characters. Blank text scores 0.
pub fn text_quality(text: &str) -> f64 {
    if text.trim().is_empty() {
        return 0.0;
    }
    let mut total = 0usize;
    let mut printable = 0usize;
    for c in text.chars() {
        total += 1;
        if c.is_whitespace() || !(c.is_control() || c == char::REPLACEMENT_CHARACTER) {
            printable += 1;
        }
    }
    printable as f64 / total as f64
}

/// In-process extraction for pdf, docx, doc, rtf and plain text.
#[derive(Debug, Clone, Default)]
pub struct LocalExtractor;

impl LocalExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Extractor for LocalExtractor {
    fn engine_name(&self) -> &'static str {
        "local"
    }

    #[tracing::instrument(skip(self, input), fields(storage_path = %input.storage_path, mime_type = %input.mime_type))]
    async fn extract(&self, input: ExtractionInput) -> Result<Extraction, ExtractionError> {
        let start = Instant::now();
        let mime = input
            .mime_type
            .split(';')
            .next()
            .unwrap_or(&input.mime_type)
            .trim()
            .to_lowercase();

        let text = match mime.as_str() {
            "application/pdf" => extract_pdf(input.data).await?,
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                extract_docx(&input.data)?
            }
            "application/msword" => extract_binary_runs(&input.data),
            "application/rtf" | "text/rtf" => extract_rtf(&String::from_utf8_lossy(&input.data)),
            "text/plain" => String::from_utf8_lossy(&input.data).into_owned(),
            other => return Err(ExtractionError::Unsupported(other.to_string())),
        };

        let extraction = Extraction::from_text(text.trim().to_string());

        tracing::debug!(
            text_len = extraction.text.len(),
            quality = extraction.quality,
            duration_ms = start.elapsed().as_millis() as u64,
            "Text extracted"
        );

        Ok(extraction)
    }
}

#[cfg(feature = "document")]
async fn extract_pdf(data: Bytes) -> Result<String, ExtractionError> {
    tokio::task::spawn_blocking(move || {
        use std::io::Write;

        let mut temp = tempfile::NamedTempFile::new()
            .map_err(|e| ExtractionError::Engine(format!("Failed to create temp file: {}", e)))?;
        temp.write_all(&data)
            .and_then(|_| temp.flush())
            .map_err(|e| ExtractionError::Engine(format!("Failed to write temp file: {}", e)))?;

        pdf_extract::extract_text(temp.path()).map_err(|e| ExtractionError::Malformed(e.to_string()))
    })
    .await
    .map_err(|e| ExtractionError::Malformed(format!("PDF extraction aborted: {}", e)))?
}

#[cfg(not(feature = "document"))]
async fn extract_pdf(_data: Bytes) -> Result<String, ExtractionError> {
    Err(ExtractionError::Unsupported(
        "application/pdf (document feature not enabled)".to_string(),
    ))
}

#[cfg(feature = "document")]
fn extract_docx(data: &[u8]) -> Result<String, ExtractionError> {
    use std::io::{Cursor, Read};

    let mut archive = zip::ZipArchive::new(Cursor::new(data))
        .map_err(|e| ExtractionError::Malformed(format!("Invalid docx archive: {}", e)))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|e| ExtractionError::Malformed(format!("Missing word/document.xml: {}", e)))?;

    let mut xml = String::new();
    entry
        .take(MAX_DOCUMENT_XML_BYTES)
        .read_to_string(&mut xml)
        .map_err(|e| ExtractionError::Malformed(format!("Unreadable document.xml: {}", e)))?;

    Ok(docx_xml_to_text(&xml))
}

#[cfg(not(feature = "document"))]
fn extract_docx(_data: &[u8]) -> Result<String, ExtractionError> {
    Err(ExtractionError::Unsupported(
        "docx (document feature not enabled)".to_string(),
    ))
}

fn docx_xml_to_text(xml: &str) -> String {
    let xml = xml
        .replace("</w:p>", "\n")
        .replace("<w:tab/>", "\t")
        .replace("<w:br/>", "\n");
    unescape_xml(&XML_TAG.replace_all(&xml, ""))
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn extract_rtf(rtf: &str) -> String {
    let text = RTF_DESTINATION.replace_all(rtf, "");
    let text = RTF_PAR.replace_all(&text, "\n");
    let text = RTF_HEX.replace_all(&text, |caps: &regex::Captures| {
        u8::from_str_radix(&caps[1], 16)
            .map(|b| char::from(b).to_string())
            .unwrap_or_default()
    });
    let text = RTF_CONTROL_WORD.replace_all(&text, "");
    text.replace("\\{", "\u{1}")
        .replace("\\}", "\u{2}")
        .replace(['{', '}'], "")
        .replace('\u{1}', "{")
        .replace('\u{2}', "}")
        .replace("\\\\", "\\")
}

/// Scrape printable ASCII runs out of an OLE2 Word binary.
fn extract_binary_runs(data: &[u8]) -> String {
    let mut runs = Vec::new();
    let mut current = String::new();
    for &b in data {
        if b.is_ascii_graphic() || b == b' ' {
            current.push(char::from(b));
        } else {
            if current.trim().len() >= MIN_BINARY_RUN {
                runs.push(current.trim().to_string());
            }
            current.clear();
        }
    }
    if current.trim().len() >= MIN_BINARY_RUN {
        runs.push(current.trim().to_string());
    }
    runs.join("\n")
}
