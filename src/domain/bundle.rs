//! Pipeline result bundle and failure report.
//!
//! A bundle is built fresh for every pipeline run (or read back from the
//! stores) and is never persisted as an entity itself.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ids::{DurableId, EphemeralId, Mode, RecordId};
use super::records::{Image, Scenario, Story};

/// Step of an operation, used to attribute failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    StoryGeneration,
    ScenarioExtraction,
    ImageGeneration,
    Reconciliation,
    Retrieval,
}

impl PipelineStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStep::StoryGeneration => "story_generation",
            PipelineStep::ScenarioExtraction => "scenario_extraction",
            PipelineStep::ImageGeneration => "image_generation",
            PipelineStep::Reconciliation => "reconciliation",
            PipelineStep::Retrieval => "retrieval",
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scenario together with its current illustration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IllustratedScenario<I> {
    #[serde(flatten)]
    pub scenario: Scenario<I>,

    /// `None` when image generation failed for this scenario
    pub image: Option<Image<I>>,
}

/// Story, scenarios and images produced by one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle<I> {
    pub story: Story<I>,
    pub scenarios: Vec<IllustratedScenario<I>>,
    pub mode: Mode,
    pub summary: String,
}

impl<I: RecordId> Bundle<I> {
    /// Assemble a bundle, deriving mode and summary
    pub fn assemble(story: Story<I>, scenarios: Vec<IllustratedScenario<I>>) -> Self {
        let summary = summarize(&story.title, scenarios.len(), count_images(&scenarios));
        Self {
            story,
            scenarios,
            mode: I::MODE,
            summary,
        }
    }

    pub fn scenario_count(&self) -> usize {
        self.scenarios.len()
    }

    pub fn image_count(&self) -> usize {
        count_images(&self.scenarios)
    }

    /// All images in the bundle, in scenario order
    pub fn images(&self) -> impl Iterator<Item = &Image<I>> {
        self.scenarios.iter().filter_map(|s| s.image.as_ref())
    }

    /// Find a scenario by its sequence number
    pub fn scenario(&self, sequence_number: u32) -> Option<&IllustratedScenario<I>> {
        self.scenarios
            .iter()
            .find(|s| s.scenario.sequence_number == sequence_number)
    }
}

fn count_images<I>(scenarios: &[IllustratedScenario<I>]) -> usize {
    scenarios.iter().filter(|s| s.image.is_some()).count()
}

fn summarize(title: &str, scenarios: usize, images: usize) -> String {
    format!(
        "Story '{}' generated with {} scenarios and {} images",
        title, scenarios, images
    )
}

/// Structured failure of a pipeline run
///
/// Carries the story when one was already produced so callers keep the work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport<I> {
    pub step: PipelineStep,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story: Option<Story<I>>,
}

impl<I> FailureReport<I> {
    pub fn new(step: PipelineStep, message: impl Into<String>) -> Self {
        Self {
            step,
            message: message.into(),
            story: None,
        }
    }

    pub fn with_story(mut self, story: Story<I>) -> Self {
        self.story = Some(story);
        self
    }
}

/// Successful run in either mode
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum PipelineOutcome {
    Preview(Bundle<EphemeralId>),
    Saved(Bundle<DurableId>),
}

impl PipelineOutcome {
    pub fn mode(&self) -> Mode {
        match self {
            PipelineOutcome::Preview(b) => b.mode,
            PipelineOutcome::Saved(b) => b.mode,
        }
    }

    pub fn summary(&self) -> &str {
        match self {
            PipelineOutcome::Preview(b) => &b.summary,
            PipelineOutcome::Saved(b) => &b.summary,
        }
    }
}

/// Failed run in either mode
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum PipelineFailure {
    Preview(FailureReport<EphemeralId>),
    Saved(FailureReport<DurableId>),
}

impl PipelineFailure {
    pub fn step(&self) -> PipelineStep {
        match self {
            PipelineFailure::Preview(r) => r.step,
            PipelineFailure::Saved(r) => r.step,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            PipelineFailure::Preview(r) => &r.message,
            PipelineFailure::Saved(r) => &r.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::domain::brief::PedagogicalApproach;

    fn story(id: EphemeralId) -> Story<EphemeralId> {
        Story {
            id,
            title: "The Brave Snail".into(),
            body: "A snail crosses the garden.".into(),
            context: "Courage in small steps".into(),
            category: "fable".into(),
            approach: PedagogicalApproach::Traditional,
            owner_id: None,
            created_at: Utc::now(),
        }
    }

    fn scenario(
        story_id: EphemeralId,
        seq: u32,
        with_image: bool,
    ) -> IllustratedScenario<EphemeralId> {
        let scenario = Scenario {
            id: EphemeralId::mint(),
            story_id,
            sequence_number: seq,
            description: format!("Scene {}", seq),
            image_prompt: format!("prompt {}", seq),
            created_at: Utc::now(),
        };
        let image = with_image.then(|| Image {
            id: EphemeralId::mint(),
            scenario_id: scenario.id,
            prompt: format!("prompt {}, styled", seq),
            artifact_url: format!("/static/images/{}.png", seq),
            created_at: Utc::now(),
        });
        IllustratedScenario { scenario, image }
    }

    #[test]
    fn test_assemble_counts_and_summary() {
        let story_id = EphemeralId::mint();
        let bundle = Bundle::assemble(
            story(story_id),
            vec![
                scenario(story_id, 1, true),
                scenario(story_id, 2, false),
                scenario(story_id, 3, true),
            ],
        );

        assert_eq!(bundle.mode, Mode::Preview);
        assert_eq!(bundle.scenario_count(), 3);
        assert_eq!(bundle.image_count(), 2);
        assert_eq!(
            bundle.summary,
            "Story 'The Brave Snail' generated with 3 scenarios and 2 images"
        );
        assert!(bundle.scenario(2).unwrap().image.is_none());
    }

    #[test]
    fn test_bundle_json_round_trip() {
        let story_id = EphemeralId::mint();
        let bundle = Bundle::assemble(story(story_id), vec![scenario(story_id, 1, true)]);

        let json = serde_json::to_string(&bundle).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["mode"], "preview");
        assert_eq!(value["scenarios"][0]["sequence_number"], 1);
        assert!(value["scenarios"][0]["image"].is_object());

        let parsed: Bundle<EphemeralId> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, bundle);

        // A preview bundle cannot be read as a saved one
        assert!(serde_json::from_str::<Bundle<DurableId>>(&json).is_err());
    }

    #[test]
    fn test_failure_report_serialization() {
        let report: FailureReport<EphemeralId> =
            FailureReport::new(PipelineStep::ScenarioExtraction, "no scenes")
                .with_story(story(EphemeralId::mint()));

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["step"], "scenario_extraction");
        assert_eq!(value["story"]["title"], "The Brave Snail");
    }
}
