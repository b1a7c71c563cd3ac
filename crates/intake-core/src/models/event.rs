use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::ids::Qid;
use crate::models::PipelineStage;

/// Why a stage request was published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RequestOrigin {
    /// `CompleteUpload` finished quarantining the file.
    Upload,
    /// The previous stage committed its transition.
    Pipeline,
    /// An operator called `RetryProcessing`.
    Retry,
    /// The stale-record sweep found the record idle.
    Sweep,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRequest {
    pub qid: Qid,
    pub origin: RequestOrigin,
    pub requested_at: DateTime<Utc>,
}

impl StageRequest {
    pub fn new(qid: Qid, origin: RequestOrigin) -> Self {
        StageRequest {
            qid,
            origin,
            requested_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingFailed {
    pub qid: Qid,
    pub stage: PipelineStage,
    pub error: String,
    /// Whether `RetryProcessing` may resume the record.
    pub retryable: bool,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfected {
    pub qid: Qid,
    pub virus_name: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeArchived {
    pub qid: Qid,
    pub profile_id: Option<String>,
    pub archive_path: String,
    pub at: DateTime<Utc>,
}

/// Every event that flows between pipeline components.
///
/// The `*Requested` variants are routed to the matching stage queue; the
/// outcome variants are fanned out to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    ScanRequested(StageRequest),
    SanitizeRequested(StageRequest),
    ExtractRequested(StageRequest),
    ParseRequested(StageRequest),
    FinalizeRequested(StageRequest),
    ProcessingFailed(ProcessingFailed),
    FileInfected(FileInfected),
    IntakeArchived(IntakeArchived),
}

impl PipelineEvent {
    /// The request event that starts `stage` for `qid`.
    pub fn stage_requested(stage: PipelineStage, qid: Qid, origin: RequestOrigin) -> Self {
        let request = StageRequest::new(qid, origin);
        match stage {
            PipelineStage::Scan => PipelineEvent::ScanRequested(request),
            PipelineStage::Sanitize => PipelineEvent::SanitizeRequested(request),
            PipelineStage::Extract => PipelineEvent::ExtractRequested(request),
            PipelineStage::Parse => PipelineEvent::ParseRequested(request),
            PipelineStage::Finalize => PipelineEvent::FinalizeRequested(request),
        }
    }

    /// Split a request event into its target stage and payload.
    pub fn into_stage_request(self) -> Result<(PipelineStage, StageRequest), PipelineEvent> {
        match self {
            PipelineEvent::ScanRequested(r) => Ok((PipelineStage::Scan, r)),
            PipelineEvent::SanitizeRequested(r) => Ok((PipelineStage::Sanitize, r)),
            PipelineEvent::ExtractRequested(r) => Ok((PipelineStage::Extract, r)),
            PipelineEvent::ParseRequested(r) => Ok((PipelineStage::Parse, r)),
            PipelineEvent::FinalizeRequested(r) => Ok((PipelineStage::Finalize, r)),
            other => Err(other),
        }
    }

    pub fn qid(&self) -> Qid {
        match self {
            PipelineEvent::ScanRequested(r)
            | PipelineEvent::SanitizeRequested(r)
            | PipelineEvent::ExtractRequested(r)
            | PipelineEvent::ParseRequested(r)
            | PipelineEvent::FinalizeRequested(r) => r.qid,
            PipelineEvent::ProcessingFailed(e) => e.qid,
            PipelineEvent::FileInfected(e) => e.qid,
            PipelineEvent::IntakeArchived(e) => e.qid,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PipelineEvent::ScanRequested(_) => "scan_requested",
            PipelineEvent::SanitizeRequested(_) => "sanitize_requested",
            PipelineEvent::ExtractRequested(_) => "extract_requested",
            PipelineEvent::ParseRequested(_) => "parse_requested",
            PipelineEvent::FinalizeRequested(_) => "finalize_requested",
            PipelineEvent::ProcessingFailed(_) => "processing_failed",
            PipelineEvent::FileInfected(_) => "file_infected",
            PipelineEvent::IntakeArchived(_) => "intake_archived",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_request_routing() {
        let qid = Qid::generate();
        for stage in PipelineStage::ALL {
            let event = PipelineEvent::stage_requested(stage, qid, RequestOrigin::Pipeline);
            assert_eq!(event.qid(), qid);
            let (routed, request) = event.into_stage_request().unwrap();
            assert_eq!(routed, stage);
            assert_eq!(request.origin, RequestOrigin::Pipeline);
        }
    }

    #[test]
    fn test_outcome_events_are_not_stage_requests() {
        let event = PipelineEvent::FileInfected(FileInfected {
            qid: Qid::generate(),
            virus_name: "Eicar-Test-Signature".to_string(),
            at: Utc::now(),
        });
        assert_eq!(event.kind(), "file_infected");
        assert!(event.into_stage_request().is_err());
    }

    #[test]
    fn test_events_are_tagged_on_the_wire() {
        let event =
            PipelineEvent::stage_requested(PipelineStage::Parse, Qid::generate(), RequestOrigin::Retry);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "parse_requested");
        assert_eq!(json["origin"], "retry");
    }
}
