use super::{ScanInput, ScanVerdict, Scanner};
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;

const ENGINE: &str = "composite";

/// Fans a scan out to every configured engine and reduces the verdicts.
///
/// Any `Infected` wins. `Clean` needs every engine to report clean. Anything
/// else, including an empty engine list, is an `Error`.
#[derive(Clone)]
pub struct CompositeScanner {
    engines: Vec<Arc<dyn Scanner>>,
}

impl CompositeScanner {
    pub fn new(engines: Vec<Arc<dyn Scanner>>) -> Self {
        Self { engines }
    }

    pub fn engine_names(&self) -> Vec<&'static str> {
        self.engines.iter().map(|e| e.engine_name()).collect()
    }

    fn reduce(verdicts: Vec<ScanVerdict>) -> ScanVerdict {
        if verdicts.is_empty() {
            return ScanVerdict::error(ENGINE, "No scan engines configured");
        }
        if let Some(infected) = verdicts
            .iter()
            .find(|v| matches!(v, ScanVerdict::Infected { .. }))
        {
            return infected.clone();
        }
        verdicts
            .into_iter()
            .find(|v| matches!(v, ScanVerdict::Error { .. }))
            .unwrap_or(ScanVerdict::Clean)
    }
}

#[async_trait]
impl Scanner for CompositeScanner {
    fn engine_name(&self) -> &'static str {
        ENGINE
    }

    #[tracing::instrument(skip(self, input), fields(storage_path = %input.storage_path, engines = self.engines.len()))]
    async fn scan(&self, input: &ScanInput) -> ScanVerdict {
        let verdicts = join_all(self.engines.iter().map(|engine| engine.scan(input))).await;
        let verdict = Self::reduce(verdicts);
        tracing::debug!(verdict = ?verdict, "Composite scan finished");
        verdict
    }
}
