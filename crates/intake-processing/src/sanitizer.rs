//! Filename normalization and active-content stripping.

use bytes::Bytes;

const MAX_FILENAME_BYTES: usize = 255;

/// PDF name objects that trigger scripts, actions or embedded payloads.
const PDF_ACTIVE_TOKENS: &[&[u8]] = &[
    b"/JavaScript",
    b"/JS",
    b"/OpenAction",
    b"/AA",
    b"/Launch",
    b"/EmbeddedFiles",
    b"/EmbeddedFile",
    b"/RichMedia",
];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SanitizeError {
    #[error("Malformed {content_type} file: {reason}")]
    Malformed {
        content_type: String,
        reason: String,
    },
}

/// Output of [`ContentSanitizer::sanitize`].
#[derive(Debug, Clone)]
pub struct SanitizedFile {
    pub filename: String,
    pub bytes: Bytes,
    /// One entry per action taken; empty when the content passed through.
    pub report: Vec<String>,
}

impl SanitizedFile {
    pub fn modified(&self) -> bool {
        !self.report.is_empty()
    }
}

/// Normalize a client filename: basename only, lowercase, `[a-z0-9._-]`.
///
/// Runs of any other characters collapse to one `_`, dot runs collapse to one
/// dot, leading dots are dropped and the result is capped at 255 bytes with
/// the extension preserved.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);

    let mut out = String::with_capacity(base.len());
    let mut last = '\0';
    for c in base.chars().flat_map(char::to_lowercase) {
        let mapped = if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_' || c == '.'
        {
            c
        } else {
            '_'
        };
        if (mapped == '_' || mapped == '.') && mapped == last {
            continue;
        }
        out.push(mapped);
        last = mapped;
    }

    let trimmed = out.trim_start_matches('.').trim_end_matches('.');
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '_') {
        return "file".to_string();
    }

    if trimmed.len() <= MAX_FILENAME_BYTES {
        return trimmed.to_string();
    }

    // Output is ASCII, so byte offsets are char boundaries.
    match trimmed.rfind('.') {
        Some(dot) if trimmed.len() - dot <= 16 => {
            let ext = &trimmed[dot..];
            format!("{}{}", &trimmed[..MAX_FILENAME_BYTES - ext.len()], ext)
        }
        _ => trimmed[..MAX_FILENAME_BYTES].to_string(),
    }
}

/// Strips active content and metadata from uploaded files.
#[derive(Debug, Clone, Default)]
pub struct ContentSanitizer;

impl ContentSanitizer {
    pub fn new() -> Self {
        Self
    }

    pub fn sanitize(
        &self,
        filename: &str,
        content_type: &str,
        data: Bytes,
    ) -> Result<SanitizedFile, SanitizeError> {
        let filename = sanitize_filename(filename);
        let mut report = Vec::new();

        let mime = content_type
            .split(';')
            .next()
            .unwrap_or(content_type)
            .trim()
            .to_lowercase();

        let bytes = match mime.as_str() {
            "application/pdf" => neutralize_pdf(data, &mut report),
            "image/jpeg" | "image/png" => strip_image_metadata(&mime, data, &mut report)?,
            "text/plain" => strip_control_chars(data, &mut report),
            _ => data,
        };

        tracing::debug!(
            filename = %filename,
            content_type = %mime,
            actions = report.len(),
            "Content sanitized"
        );

        Ok(SanitizedFile {
            filename,
            bytes,
            report,
        })
    }
}

fn is_pdf_delimiter(b: u8) -> bool {
    matches!(
        b,
        b' ' | b'\t' | b'\r' | b'\n' | b'\x0c' | b'\0' | b'/' | b'[' | b']' | b'<' | b'>' | b'('
            | b')' | b'{' | b'}' | b'%'
    )
}

/// Overwrite active PDF name tokens in place with same-length inert names so
/// that cross-reference offsets remain valid.
fn neutralize_pdf(data: Bytes, report: &mut Vec<String>) -> Bytes {
    let mut buf: Option<Vec<u8>> = None;

    for token in PDF_ACTIVE_TOKENS {
        let haystack: &[u8] = buf.as_deref().unwrap_or(&data);
        let hits: Vec<usize> = haystack
            .windows(token.len())
            .enumerate()
            .filter(|(i, w)| {
                w == token
                    && haystack
                        .get(i + token.len())
                        .map_or(true, |&next| is_pdf_delimiter(next))
            })
            .map(|(i, _)| i)
            .collect();

        if hits.is_empty() {
            continue;
        }

        let out = buf.get_or_insert_with(|| data.to_vec());
        for start in &hits {
            for b in &mut out[start + 1..start + token.len()] {
                *b = b'X';
            }
        }
        report.push(format!(
            "neutralized {} ({} occurrence{})",
            String::from_utf8_lossy(token),
            hits.len(),
            if hits.len() == 1 { "" } else { "s" }
        ));
    }

    buf.map(Bytes::from).unwrap_or(data)
}

#[cfg(feature = "image")]
fn strip_image_metadata(
    mime: &str,
    data: Bytes,
    report: &mut Vec<String>,
) -> Result<Bytes, SanitizeError> {
    use img_parts::jpeg::Jpeg;
    use img_parts::png::Png;
    use img_parts::ImageEXIF;

    let malformed = |e: img_parts::Error| SanitizeError::Malformed {
        content_type: mime.to_string(),
        reason: e.to_string(),
    };

    if mime == "image/jpeg" {
        let mut jpeg = Jpeg::from_bytes(data.clone()).map_err(malformed)?;
        if jpeg.exif().is_none() {
            return Ok(data);
        }
        jpeg.set_exif(None);
        report.push("stripped EXIF metadata".to_string());
        Ok(jpeg.encoder().bytes())
    } else {
        let mut png = Png::from_bytes(data.clone()).map_err(malformed)?;
        if png.exif().is_none() {
            return Ok(data);
        }
        png.set_exif(None);
        report.push("stripped EXIF metadata".to_string());
        Ok(png.encoder().bytes())
    }
}

#[cfg(not(feature = "image"))]
fn strip_image_metadata(
    _mime: &str,
    data: Bytes,
    _report: &mut Vec<String>,
) -> Result<Bytes, SanitizeError> {
    tracing::warn!("Image metadata stripping requires the image feature");
    Ok(data)
}

/// Remove NUL and other control characters, keeping tab, CR and LF.
fn strip_control_chars(data: Bytes, report: &mut Vec<String>) -> Bytes {
    let is_control = |b: &u8| (*b < 0x20 && !matches!(*b, b'\t' | b'\n' | b'\r')) || *b == 0x7F;
    let removed = data.iter().filter(|b| is_control(b)).count();
    if removed == 0 {
        return data;
    }
    report.push(format!("removed {} control characters", removed));
    Bytes::from(data.iter().copied().filter(|b| !is_control(b)).collect::<Vec<u8>>())
}
