use intake_core::AppError;
use std::path::Path;

/// Executable and script extensions that are never accepted, whatever the
/// declared content type.
const DENIED_EXTENSIONS: &[&str] = &[
    "exe", "dll", "com", "bat", "cmd", "scr", "msi", "msp", "pif", "cpl", "hta", "reg", "lnk",
    "vb", "vbs", "vbe", "js", "jse", "ws", "wsf", "wsh", "ps1", "psm1", "sh", "bash", "zsh",
    "jar", "apk", "app", "bin", "run", "deb", "rpm", "dmg", "iso", "elf", "so", "dylib",
];

/// Server-side script extensions.
const SUSPICIOUS_EXTENSIONS: &[&str] = &[
    "php", "php3", "php4", "php5", "php7", "phtml", "phar", "asp", "aspx", "ashx", "asmx",
    "jsp", "jspx", "cgi", "pl", "py", "rb", "cfm", "shtml", "htaccess",
];

const PDF_MAGIC: &[u8] = b"%PDF-";
const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";
const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];
const GIF87_MAGIC: &[u8] = b"GIF87a";
const GIF89_MAGIC: &[u8] = b"GIF89a";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE2_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
const RTF_MAGIC: &[u8] = b"{\\rtf";

/// File validation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("File too large: {size} bytes (max: {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Empty file")]
    EmptyFile,

    #[error("Invalid filename: {0}")]
    InvalidFilename(String),

    #[error("File type not allowed: .{0} files are executable or scripts")]
    DeniedExtension(String),

    #[error("File type not allowed: .{0} is a server-side script extension")]
    SuspiciousExtension(String),

    #[error("Invalid file extension: {extension} (allowed: {allowed:?})")]
    InvalidExtension {
        extension: String,
        allowed: Vec<String>,
    },

    #[error("Invalid content type: {content_type} (allowed: {allowed:?})")]
    InvalidContentType {
        content_type: String,
        allowed: Vec<String>,
    },

    #[error("Content type {content_type} does not match extension .{extension}")]
    ExtensionMismatch {
        extension: String,
        content_type: String,
    },

    #[error("File content does not match declared type {content_type}")]
    MagicByteMismatch { content_type: String },

    #[error("Content hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("Size mismatch: declared {declared} bytes, received {actual} bytes")]
    SizeMismatch { declared: u64, actual: u64 },
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::FileTooLarge { .. } => AppError::PayloadTooLarge(err.to_string()),
            other => AppError::Validation(other.to_string()),
        }
    }
}

/// Upload file validator
///
/// Checks run cheapest first: size, deny-lists, allow-lists, the
/// extension/content-type pairing, and finally (once bytes exist) the
/// magic-byte signature.
#[derive(Debug, Clone)]
pub struct FileValidator {
    max_file_size: u64,
    allowed_extensions: Vec<String>,
    allowed_content_types: Vec<String>,
}

impl FileValidator {
    pub fn new(
        max_file_size: u64,
        allowed_extensions: Vec<String>,
        allowed_content_types: Vec<String>,
    ) -> Self {
        Self {
            max_file_size,
            allowed_extensions: allowed_extensions
                .into_iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            allowed_content_types: allowed_content_types
                .into_iter()
                .map(|c| c.to_lowercase())
                .collect(),
        }
    }

    pub fn from_config(config: &intake_core::Config) -> Self {
        Self::new(
            config.max_file_size_bytes(),
            config.allowed_extensions().to_vec(),
            config.allowed_content_types().to_vec(),
        )
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    pub fn allowed_content_types(&self) -> &[String] {
        &self.allowed_content_types
    }

    /// Validate file size
    pub fn validate_file_size(&self, size: u64) -> Result<(), ValidationError> {
        if size == 0 {
            return Err(ValidationError::EmptyFile);
        }

        if size > self.max_file_size {
            return Err(ValidationError::FileTooLarge {
                size,
                max: self.max_file_size,
            });
        }

        Ok(())
    }

    /// Reject deny-listed and suspicious extensions anywhere in the name.
    ///
    /// Every dotted segment after the stem is checked, so both
    /// `resume.pdf.exe` and `resume.exe.pdf` are refused.
    pub fn validate_not_dangerous(&self, filename: &str) -> Result<(), ValidationError> {
        let base = basename(filename);
        for segment in base.split('.').skip(1) {
            let segment = segment.trim().to_lowercase();
            if DENIED_EXTENSIONS.contains(&segment.as_str()) {
                return Err(ValidationError::DeniedExtension(segment));
            }
            if SUSPICIOUS_EXTENSIONS.contains(&segment.as_str()) {
                return Err(ValidationError::SuspiciousExtension(segment));
            }
        }
        Ok(())
    }

    /// Validate file extension
    pub fn validate_extension(&self, filename: &str) -> Result<(), ValidationError> {
        let extension = extension_of(filename)?;

        if !self.allowed_extensions.contains(&extension) {
            return Err(ValidationError::InvalidExtension {
                extension,
                allowed: self.allowed_extensions.clone(),
            });
        }

        Ok(())
    }

    /// Validate content type
    pub fn validate_content_type(&self, content_type: &str) -> Result<(), ValidationError> {
        let normalized = normalize_content_type(content_type);

        if !self.allowed_content_types.iter().any(|ct| ct == &normalized) {
            return Err(ValidationError::InvalidContentType {
                content_type: content_type.to_string(),
                allowed: self.allowed_content_types.clone(),
            });
        }

        Ok(())
    }

    /// Validate that Content-Type matches the file extension
    pub fn validate_extension_content_type_match(
        &self,
        filename: &str,
        content_type: &str,
    ) -> Result<(), ValidationError> {
        let extension = extension_of(filename)?;
        let normalized = normalize_content_type(content_type);

        let Some(expected) = expected_content_types(&extension) else {
            tracing::debug!(
                extension = %extension,
                content_type = %content_type,
                "Unknown extension, skipping Content-Type/extension cross-validation"
            );
            return Ok(());
        };

        if !expected.contains(&normalized.as_str()) {
            return Err(ValidationError::ExtensionMismatch {
                extension,
                content_type: content_type.to_string(),
            });
        }

        Ok(())
    }

    /// Check the leading bytes against the signature of `content_type`.
    ///
    /// Types without a fixed signature (plain text) pass.
    pub fn validate_magic_bytes(
        &self,
        content_type: &str,
        head: &[u8],
    ) -> Result<(), ValidationError> {
        let normalized = normalize_content_type(content_type);
        let matches = match normalized.as_str() {
            "application/pdf" => head.starts_with(PDF_MAGIC),
            "image/png" => head.starts_with(PNG_MAGIC),
            "image/jpeg" => head.starts_with(JPEG_MAGIC),
            "image/gif" => head.starts_with(GIF87_MAGIC) || head.starts_with(GIF89_MAGIC),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                head.starts_with(ZIP_MAGIC)
            }
            "application/msword" => head.starts_with(OLE2_MAGIC),
            "application/rtf" | "text/rtf" => head.starts_with(RTF_MAGIC),
            _ => true,
        };

        if matches {
            Ok(())
        } else {
            Err(ValidationError::MagicByteMismatch {
                content_type: content_type.to_string(),
            })
        }
    }

    /// Checks that need only the declared attributes; run at upload initiation.
    pub fn validate_declared(
        &self,
        filename: &str,
        content_type: &str,
        size: u64,
    ) -> Result<(), ValidationError> {
        self.validate_file_size(size)?;
        self.validate_not_dangerous(filename)?;
        self.validate_extension(filename)?;
        self.validate_content_type(content_type)?;
        self.validate_extension_content_type_match(filename, content_type)?;
        Ok(())
    }

    /// Checks on the received bytes; run at upload completion.
    pub fn validate_content(
        &self,
        filename: &str,
        content_type: &str,
        data: &[u8],
    ) -> Result<(), ValidationError> {
        self.validate_declared(filename, content_type, data.len() as u64)?;
        self.validate_magic_bytes(content_type, data)
    }

    /// The received byte count must equal what the client declared.
    pub fn validate_size_matches(&self, declared: u64, actual: u64) -> Result<(), ValidationError> {
        if declared != actual {
            return Err(ValidationError::SizeMismatch { declared, actual });
        }
        Ok(())
    }
}

fn basename(filename: &str) -> &str {
    filename.rsplit(['/', '\\']).next().unwrap_or(filename)
}

fn extension_of(filename: &str) -> Result<String, ValidationError> {
    Path::new(basename(filename))
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .filter(|e| !e.is_empty())
        .ok_or_else(|| ValidationError::InvalidFilename(filename.to_string()))
}

/// Lowercase and drop parameters such as `; charset=utf-8`.
fn normalize_content_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_lowercase()
}

fn expected_content_types(extension: &str) -> Option<&'static [&'static str]> {
    let expected: &'static [&'static str] = match extension {
        "pdf" => &["application/pdf"],
        "doc" => &["application/msword"],
        "docx" => &["application/vnd.openxmlformats-officedocument.wordprocessingml.document"],
        "txt" => &["text/plain"],
        "rtf" => &["application/rtf", "text/rtf"],
        "jpg" | "jpeg" => &["image/jpeg"],
        "png" => &["image/png"],
        "gif" => &["image/gif"],
        _ => return None,
    };
    Some(expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> FileValidator {
        FileValidator::new(
            10 * 1024 * 1024,
            vec!["pdf".into(), "docx".into(), "txt".into(), "jpg".into(), "png".into()],
            vec![
                "application/pdf".into(),
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document".into(),
                "text/plain".into(),
                "image/jpeg".into(),
                "image/png".into(),
            ],
        )
    }

    #[test]
    fn test_validate_file_size() {
        let v = validator();
        assert!(v.validate_file_size(51_200).is_ok());
        assert_eq!(v.validate_file_size(0), Err(ValidationError::EmptyFile));
        assert!(matches!(
            v.validate_file_size(10 * 1024 * 1024 + 1),
            Err(ValidationError::FileTooLarge { .. })
        ));
    }

    #[test]
    fn test_executables_rejected_regardless_of_mime() {
        let v = validator();
        assert_eq!(
            v.validate_declared("setup.exe", "application/pdf", 100),
            Err(ValidationError::DeniedExtension("exe".into()))
        );
        assert_eq!(
            v.validate_declared("resume.pdf.exe", "application/pdf", 100),
            Err(ValidationError::DeniedExtension("exe".into()))
        );
        assert_eq!(
            v.validate_declared("resume.exe.pdf", "application/pdf", 100),
            Err(ValidationError::DeniedExtension("exe".into()))
        );
    }

    #[test]
    fn test_server_scripts_rejected() {
        let v = validator();
        assert_eq!(
            v.validate_declared("shell.php.pdf", "application/pdf", 100),
            Err(ValidationError::SuspiciousExtension("php".into()))
        );
    }

    #[test]
    fn test_allow_lists_and_pairing() {
        let v = validator();
        assert!(v.validate_declared("resume.pdf", "application/pdf", 51_200).is_ok());
        assert!(v
            .validate_declared("notes.txt", "text/plain; charset=utf-8", 10)
            .is_ok());
        assert!(matches!(
            v.validate_declared("archive.zip", "application/zip", 10),
            Err(ValidationError::InvalidExtension { .. })
        ));
        assert!(matches!(
            v.validate_declared("resume.pdf", "application/zip", 10),
            Err(ValidationError::InvalidContentType { .. })
        ));
        assert!(matches!(
            v.validate_declared("resume.pdf", "image/png", 10),
            Err(ValidationError::ExtensionMismatch { .. })
        ));
        assert!(matches!(
            v.validate_declared("resume", "application/pdf", 10),
            Err(ValidationError::InvalidFilename(_))
        ));
    }

    #[test]
    fn test_magic_bytes() {
        let v = validator();
        assert!(v.validate_magic_bytes("application/pdf", b"%PDF-1.7\n").is_ok());
        assert!(v
            .validate_magic_bytes("image/png", b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR")
            .is_ok());
        assert!(v
            .validate_magic_bytes("image/jpeg", &[0xFF, 0xD8, 0xFF, 0xE0])
            .is_ok());
        assert!(v.validate_magic_bytes("text/plain", b"anything").is_ok());

        assert_eq!(
            v.validate_magic_bytes("application/pdf", b"MZ\x90\0"),
            Err(ValidationError::MagicByteMismatch {
                content_type: "application/pdf".into()
            })
        );
        assert!(v
            .validate_magic_bytes(
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
                b"%PDF-1.4"
            )
            .is_err());
    }

    #[test]
    fn test_validate_content_runs_every_check() {
        let v = validator();
        assert!(v
            .validate_content("resume.pdf", "application/pdf", b"%PDF-1.7 body")
            .is_ok());
        assert!(matches!(
            v.validate_content("resume.pdf", "application/pdf", b"<html>"),
            Err(ValidationError::MagicByteMismatch { .. })
        ));
        assert_eq!(
            v.validate_content("resume.pdf", "application/pdf", b""),
            Err(ValidationError::EmptyFile)
        );
    }

    #[test]
    fn test_validation_error_maps_to_app_error() {
        let err: AppError = ValidationError::FileTooLarge { size: 2, max: 1 }.into();
        assert!(matches!(err, AppError::PayloadTooLarge(_)));
        let err: AppError = ValidationError::DeniedExtension("exe".into()).into();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
