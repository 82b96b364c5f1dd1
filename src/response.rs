//! Outward response envelope.
//!
//! Every operation result leaves the crate as `{"success": bool, ...}`.
//! Failures carry `step` and `error`; successes carry the payload fields
//! at the top level.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::{Committed, ReconcileError, Regenerated};
use crate::domain::{PipelineFailure, PipelineOutcome, PipelineStep};
use crate::error::Failure;

/// Success flag plus payload, or step and error
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Envelope {
    /// Successful response; object payloads are spread into the envelope
    pub fn ok(payload: impl Serialize) -> Self {
        match serde_json::to_value(payload) {
            Ok(Value::Object(fields)) => Self {
                success: true,
                step: None,
                error: None,
                fields,
            },
            Ok(Value::Null) => Self {
                success: true,
                step: None,
                error: None,
                fields: Map::new(),
            },
            Ok(other) => Self {
                success: true,
                step: None,
                error: None,
                fields: Map::new(),
            }
            .with("data", other),
            Err(e) => Self::failed("response", format!("Failed to encode response: {}", e)),
        }
    }

    /// Failed response naming the step it failed at
    pub fn failed(step: impl Into<String>, error: impl ToString) -> Self {
        Self {
            success: false,
            step: Some(step.into()),
            error: Some(error.to_string()),
            fields: Map::new(),
        }
    }

    /// Classified failure of a core operation
    pub fn from_failure(step: PipelineStep, failure: &Failure) -> Self {
        Self::failed(step.as_str(), failure).with("kind", failure.kind())
    }

    /// Attach an extra field; values that cannot be encoded are dropped
    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        if let Ok(value) = serde_json::to_value(value) {
            self.fields.insert(key.to_string(), value);
        }
        self
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self)
            .unwrap_or_else(|e| format!(r#"{{"success": false, "error": "{}"}}"#, e))
    }
}

impl From<PipelineOutcome> for Envelope {
    fn from(outcome: PipelineOutcome) -> Self {
        match outcome {
            PipelineOutcome::Preview(bundle) => Envelope::ok(bundle),
            PipelineOutcome::Saved(bundle) => Envelope::ok(bundle),
        }
    }
}

impl From<PipelineFailure> for Envelope {
    fn from(failure: PipelineFailure) -> Self {
        let envelope = Envelope::failed(failure.step().as_str(), failure.message());
        match failure {
            PipelineFailure::Preview(report) => match report.story {
                Some(story) => envelope.with("story", story),
                None => envelope,
            },
            PipelineFailure::Saved(report) => match report.story {
                Some(story) => envelope.with("story", story),
                None => envelope,
            },
        }
    }
}

impl From<ReconcileError> for Envelope {
    fn from(e: ReconcileError) -> Self {
        let envelope = Envelope::failed(PipelineStep::Reconciliation.as_str(), &e);
        match e {
            ReconcileError::NotPreview(mode) => envelope.with("mode", mode),
            ReconcileError::Interrupted {
                phase,
                index,
                story_id,
                progress,
                ..
            } => envelope
                .with("phase", phase)
                .with("index", index)
                .with("story_id", story_id)
                .with("progress", progress),
        }
    }
}

impl From<Committed> for Envelope {
    fn from(committed: Committed) -> Self {
        Envelope::ok(committed)
    }
}

impl From<Regenerated> for Envelope {
    fn from(regenerated: Regenerated) -> Self {
        Envelope::ok(regenerated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CommitPhase, CommitProgress};
    use crate::domain::{EphemeralId, FailureReport, Mode};
    use crate::store::StoreError;

    #[test]
    fn test_ok_spreads_object_payload() {
        let envelope = Envelope::ok(serde_json::json!({"story_id": "abc", "count": 2}));
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["success"], true);
        assert_eq!(value["story_id"], "abc");
        assert_eq!(value["count"], 2);
        assert!(value.get("step").is_none());
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_ok_wraps_non_object_payload() {
        let value = serde_json::to_value(Envelope::ok(vec![1, 2, 3])).unwrap();
        assert_eq!(value["data"], serde_json::json!([1, 2, 3]));
    }

    #[test]
    fn test_pipeline_failure_envelope() {
        let failure = PipelineFailure::Preview(FailureReport::<EphemeralId>::new(
            PipelineStep::StoryGeneration,
            "gemini returned no output",
        ));
        let value = serde_json::to_value(Envelope::from(failure)).unwrap();

        assert_eq!(value["success"], false);
        assert_eq!(value["step"], "story_generation");
        assert_eq!(value["error"], "gemini returned no output");
        assert!(value.get("story").is_none());
    }

    #[test]
    fn test_failure_kind() {
        let failure = Failure::not_found("scenario", "123");
        let value =
            serde_json::to_value(Envelope::from_failure(PipelineStep::ImageGeneration, &failure))
                .unwrap();

        assert_eq!(value["step"], "image_generation");
        assert_eq!(value["kind"], "not_found");
        assert_eq!(value["error"], "scenario not found: 123");
    }

    #[test]
    fn test_reconcile_error_envelope() {
        let error = ReconcileError::Interrupted {
            phase: CommitPhase::Image,
            index: 2,
            story_id: None,
            progress: CommitProgress {
                scenarios: 3,
                images: 2,
                ..Default::default()
            },
            source: StoreError::Rejected("disk full".into()),
        };
        let value = serde_json::to_value(Envelope::from(error)).unwrap();

        assert_eq!(value["success"], false);
        assert_eq!(value["step"], "reconciliation");
        assert_eq!(value["phase"], "image");
        assert_eq!(value["index"], 2);
        assert_eq!(value["progress"]["images"], 2);
        assert!(value["error"]
            .as_str()
            .unwrap()
            .contains("after 3 scenarios and 2 images"));

        let value =
            serde_json::to_value(Envelope::from(ReconcileError::NotPreview(Mode::Saved))).unwrap();
        assert_eq!(value["mode"], "saved");
    }
}
