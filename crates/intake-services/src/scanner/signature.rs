use super::{ScanInput, ScanVerdict, Scanner};
use async_trait::async_trait;

const ENGINE: &str = "signature";

/// The EICAR anti-malware test string.
const EICAR: &[u8] = br"X5O!P%@AP[4\PZX54(P^)7CC)7}$EICAR-STANDARD-ANTIVIRUS-TEST-FILE!$H+H*";

/// Byte-signature matcher with the EICAR test signature built in.
#[derive(Debug, Clone)]
pub struct SignatureScanner {
    signatures: Vec<(String, Vec<u8>)>,
}

impl Default for SignatureScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureScanner {
    pub fn new() -> Self {
        Self {
            signatures: vec![("Eicar-Test-Signature".to_string(), EICAR.to_vec())],
        }
    }

    /// Add a named byte signature. Empty patterns are ignored.
    pub fn with_signature(mut self, name: impl Into<String>, pattern: impl Into<Vec<u8>>) -> Self {
        let pattern = pattern.into();
        if !pattern.is_empty() {
            self.signatures.push((name.into(), pattern));
        }
        self
    }

    fn find(&self, data: &[u8]) -> Option<&str> {
        self.signatures
            .iter()
            .find(|(_, pattern)| data.windows(pattern.len()).any(|w| w == pattern.as_slice()))
            .map(|(name, _)| name.as_str())
    }
}

#[async_trait]
impl Scanner for SignatureScanner {
    fn engine_name(&self) -> &'static str {
        ENGINE
    }

    async fn scan(&self, input: &ScanInput) -> ScanVerdict {
        match self.find(&input.data) {
            Some(name) => {
                tracing::warn!(
                    storage_path = %input.storage_path,
                    virus = %name,
                    "Signature match"
                );
                ScanVerdict::infected(ENGINE, name)
            }
            None => ScanVerdict::Clean,
        }
    }
}
