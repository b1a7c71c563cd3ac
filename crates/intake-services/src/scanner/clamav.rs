use super::{ScanInput, ScanVerdict, Scanner};
use async_trait::async_trait;
use clamav_client::{clean, Tcp};
use std::str;
use std::time::{Duration, Instant};

const ENGINE: &str = "clamav";

/// ClamAV daemon over TCP.
///
/// Connection failures, unparseable responses and timeouts all produce an
/// `Error` verdict.
#[derive(Clone)]
pub struct ClamAvScanner {
    host: String,
    port: u16,
    timeout_secs: u64,
}

impl ClamAvScanner {
    pub fn new(host: String, port: u16, timeout_secs: u64) -> Self {
        Self {
            host,
            port,
            timeout_secs,
        }
    }

    /// Virus name from a clamd `stream: <name> FOUND` reply.
    fn parse_virus_name(response: &[u8]) -> String {
        let response = str::from_utf8(response)
            .map(|s| s.trim_matches(|c: char| c == '\0' || c.is_whitespace()))
            .unwrap_or("");
        if !response.contains("FOUND") {
            return "unknown".to_string();
        }
        response
            .split(':')
            .nth(1)
            .and_then(|rest| rest.split_whitespace().next())
            .filter(|name| *name != "FOUND")
            .unwrap_or("unknown")
            .to_string()
    }
}

#[async_trait]
impl Scanner for ClamAvScanner {
    fn engine_name(&self) -> &'static str {
        ENGINE
    }

    /// Runs the blocking client inside `spawn_blocking` under the scan timeout.
    #[tracing::instrument(skip(self, input), fields(storage_path = %input.storage_path, engine = ENGINE))]
    async fn scan(&self, input: &ScanInput) -> ScanVerdict {
        let start = Instant::now();
        let data = input.data.clone();
        let address = format!("{}:{}", self.host, self.port);

        let result = tokio::time::timeout(
            Duration::from_secs(self.timeout_secs),
            tokio::task::spawn_blocking(move || {
                let connection = Tcp {
                    host_address: address.as_str(),
                };
                let response = clamav_client::scan_buffer(&data, connection, None)
                    .map_err(|e| format!("ClamAV scan error: {}", e))?;
                let is_clean = clean(&response)
                    .map_err(|e| format!("Failed to parse ClamAV response: {}", e))?;
                Ok::<_, String>(if is_clean {
                    None
                } else {
                    Some(Self::parse_virus_name(&response))
                })
            }),
        )
        .await;

        let duration_ms = start.elapsed().as_millis() as u64;
        match result {
            Ok(Ok(Ok(None))) => {
                tracing::debug!(duration_ms, "ClamAV scan completed: clean");
                ScanVerdict::Clean
            }
            Ok(Ok(Ok(Some(virus_name)))) => {
                tracing::warn!(duration_ms, virus = %virus_name, "ClamAV detected virus");
                ScanVerdict::infected(ENGINE, virus_name)
            }
            Ok(Ok(Err(reason))) => {
                tracing::error!(duration_ms, error = %reason, "ClamAV scan failed");
                ScanVerdict::error(ENGINE, reason)
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "ClamAV scan task panicked");
                ScanVerdict::error(ENGINE, format!("ClamAV scan task join error: {}", e))
            }
            Err(_) => {
                let reason = format!("ClamAV scan timeout (exceeded {} seconds)", self.timeout_secs);
                tracing::error!(error = %reason, "ClamAV scan timeout");
                ScanVerdict::error(ENGINE, reason)
            }
        }
    }
}
