//! Engine construction from configuration.

use crate::notifier::{LogNotifier, Notifier, WebhookNotifier};
use crate::parser_http::HttpParser;
use crate::profile::{HttpProfileCreator, NoopProfileCreator, ProfileCreator};
#[cfg(feature = "clamav")]
use crate::scanner::ClamAvScanner;
use crate::scanner::{CompositeScanner, Scanner, SignatureScanner};
use anyhow::Result;
use intake_core::{Config, PipelineStage};
use intake_processing::{Extractor, HeuristicParser, LocalExtractor, Parser};
use std::sync::Arc;
use std::time::Duration;

/// External collaborators of the stage workers.
#[derive(Clone)]
pub struct Engines {
    pub scanner: Arc<CompositeScanner>,
    pub extractor: Arc<dyn Extractor>,
    pub parser: Arc<dyn Parser>,
    pub profiles: Arc<dyn ProfileCreator>,
    pub notifier: Arc<dyn Notifier>,
}

impl Engines {
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut scan_engines: Vec<Arc<dyn Scanner>> = Vec::new();

        #[cfg(feature = "clamav")]
        if config.clamav_enabled() {
            tracing::info!(
                host = %config.clamav_host(),
                port = config.clamav_port(),
                "ClamAV scanning enabled"
            );
            scan_engines.push(Arc::new(ClamAvScanner::new(
                config.clamav_host().to_string(),
                config.clamav_port(),
                config.clamav_timeout_secs(),
            )));
        }
        #[cfg(not(feature = "clamav"))]
        if config.clamav_enabled() {
            anyhow::bail!("CLAMAV_ENABLED is set but the clamav feature is not compiled in");
        }

        if config.signature_scan_enabled() {
            scan_engines.push(Arc::new(SignatureScanner::new()));
        }

        let parser: Arc<dyn Parser> = match config.parser_endpoint() {
            Some(endpoint) => {
                tracing::info!(endpoint = %endpoint, "Using remote parsing engine");
                Arc::new(HttpParser::new(
                    endpoint.to_string(),
                    config.parser_api_key().map(String::from),
                    Duration::from_secs(config.stage_timeout_secs(PipelineStage::Parse)),
                )?)
            }
            None => {
                tracing::info!("PARSER_ENDPOINT not set, using heuristic parser");
                Arc::new(HeuristicParser::new())
            }
        };

        let notify_timeout = Duration::from_secs(config.notify_timeout_secs());

        let profiles: Arc<dyn ProfileCreator> = match config.profile_service_url() {
            Some(url) => Arc::new(HttpProfileCreator::new(url.to_string(), notify_timeout)?),
            None => Arc::new(NoopProfileCreator),
        };

        let notifier: Arc<dyn Notifier> = match config.notify_webhook_url() {
            Some(url) => Arc::new(WebhookNotifier::new(
                url.to_string(),
                config.notify_webhook_secret().map(String::from),
                notify_timeout,
            )?),
            None => Arc::new(LogNotifier),
        };

        let scanner = Arc::new(CompositeScanner::new(scan_engines));
        tracing::info!(
            scan_engines = ?scanner.engine_names(),
            parser = parser.engine_name(),
            "Pipeline engines initialized"
        );

        Ok(Self {
            scanner,
            extractor: Arc::new(LocalExtractor::new()),
            parser,
            profiles,
            notifier,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intake_core::IntakeConfig;

    #[test]
    fn test_defaults_use_builtin_engines() {
        let config = Config::from(IntakeConfig::default());
        let engines = Engines::from_config(&config).unwrap();
        assert_eq!(engines.scanner.engine_names(), vec!["signature"]);
        assert_eq!(engines.parser.engine_name(), "heuristic");
        assert_eq!(engines.extractor.engine_name(), "local");
    }

    #[test]
    fn test_parser_endpoint_selects_http_parser() {
        let config = Config::from(IntakeConfig {
            parser_endpoint: Some("http://parser.internal/parse".to_string()),
            ..IntakeConfig::default()
        });
        let engines = Engines::from_config(&config).unwrap();
        assert_eq!(engines.parser.engine_name(), "http");
    }
}
