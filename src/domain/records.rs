//! Story, scenario and image records.
//!
//! Drafts hold the content of a record without any identity. A record is a
//! draft plus an identifier of kind `I` (see `ids`), and for scenarios and
//! images a parent reference of the same kind.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::brief::{Brief, PedagogicalApproach};
use super::ids::RecordId;

/// Current time, truncated to the microseconds every store keeps
pub fn timestamp_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Story content before it has an identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryDraft {
    pub title: String,
    pub body: String,
    pub context: String,
    pub category: String,
    pub approach: PedagogicalApproach,
    pub owner_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl StoryDraft {
    /// Build a draft from generated text and the brief that produced it
    pub fn from_generated(title: String, body: String, brief: &Brief) -> Self {
        Self {
            title,
            body,
            context: brief.context.clone(),
            category: brief.category.clone(),
            approach: brief.approach,
            owner_id: brief.owner_id,
            created_at: timestamp_now(),
        }
    }
}

/// A generated story
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Story<I> {
    pub id: I,
    pub title: String,
    pub body: String,
    pub context: String,
    pub category: String,
    pub approach: PedagogicalApproach,
    #[serde(default)]
    pub owner_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl<I: RecordId> Story<I> {
    pub fn from_draft(id: I, draft: StoryDraft) -> Self {
        Self {
            id,
            title: draft.title,
            body: draft.body,
            context: draft.context,
            category: draft.category,
            approach: draft.approach,
            owner_id: draft.owner_id,
            created_at: draft.created_at,
        }
    }

    /// Content of this story without its identity
    pub fn to_draft(&self) -> StoryDraft {
        StoryDraft {
            title: self.title.clone(),
            body: self.body.clone(),
            context: self.context.clone(),
            category: self.category.clone(),
            approach: self.approach,
            owner_id: self.owner_id,
            created_at: self.created_at,
        }
    }
}

/// Scenario content before it has an identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioDraft {
    /// Position in narrative order, starting at 1
    pub sequence_number: u32,
    pub description: String,
    pub image_prompt: String,
    pub created_at: DateTime<Utc>,
}

/// One narrative beat selected for illustration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario<I> {
    pub id: I,
    pub story_id: I,
    pub sequence_number: u32,
    pub description: String,
    pub image_prompt: String,
    pub created_at: DateTime<Utc>,
}

impl<I: RecordId> Scenario<I> {
    pub fn from_draft(id: I, story_id: I, draft: ScenarioDraft) -> Self {
        Self {
            id,
            story_id,
            sequence_number: draft.sequence_number,
            description: draft.description,
            image_prompt: draft.image_prompt,
            created_at: draft.created_at,
        }
    }

    pub fn to_draft(&self) -> ScenarioDraft {
        ScenarioDraft {
            sequence_number: self.sequence_number,
            description: self.description.clone(),
            image_prompt: self.image_prompt.clone(),
            created_at: self.created_at,
        }
    }
}

/// Image content before it has an identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDraft {
    /// Prompt actually sent to the generator, after style augmentation
    pub prompt: String,
    pub artifact_url: String,
    pub created_at: DateTime<Utc>,
}

/// A generated illustration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image<I> {
    pub id: I,
    pub scenario_id: I,
    pub prompt: String,
    pub artifact_url: String,
    pub created_at: DateTime<Utc>,
}

impl<I: RecordId> Image<I> {
    pub fn from_draft(id: I, scenario_id: I, draft: ImageDraft) -> Self {
        Self {
            id,
            scenario_id,
            prompt: draft.prompt,
            artifact_url: draft.artifact_url,
            created_at: draft.created_at,
        }
    }

    pub fn to_draft(&self) -> ImageDraft {
        ImageDraft {
            prompt: self.prompt.clone(),
            artifact_url: self.artifact_url.clone(),
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::EphemeralId;

    #[test]
    fn test_story_draft_round_trip() {
        let brief = Brief::new("A lost kite finds its way home", "adventure")
            .with_approach(PedagogicalApproach::Waldorf);
        let draft = StoryDraft::from_generated("The Kite".into(), "Once...".into(), &brief);

        let story = Story::from_draft(EphemeralId::mint(), draft.clone());

        assert_eq!(story.approach, PedagogicalApproach::Waldorf);
        assert_eq!(story.context, brief.context);
        assert_eq!(story.to_draft(), draft);
    }

    #[test]
    fn test_scenario_json_uses_prefixed_ids() {
        let story_id = EphemeralId::mint();
        let scenario = Scenario::from_draft(
            EphemeralId::mint(),
            story_id,
            ScenarioDraft {
                sequence_number: 1,
                description: "The kite escapes".into(),
                image_prompt: "a red kite over hills".into(),
                created_at: Utc::now(),
            },
        );

        let json = serde_json::to_value(&scenario).unwrap();
        assert!(json["story_id"].as_str().unwrap().starts_with("tmp_"));
        assert_eq!(json["sequence_number"], 1);
    }

    #[test]
    fn test_timestamp_now_has_whole_microseconds() {
        use chrono::Timelike;
        assert_eq!(timestamp_now().nanosecond() % 1_000, 0);
    }
}
