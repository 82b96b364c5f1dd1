//! Where pipeline records go as they are produced.
//!
//! The orchestrator is written once against `RecordSink`. The sink decides
//! the identifier kind:
//! - `EphemeralSink` mints `tmp_` identifiers and touches no store
//! - `StoreSink` writes through the stores and adopts the issued identifiers

use async_trait::async_trait;

use crate::domain::{
    DurableId, EphemeralId, Image, ImageDraft, RecordId, Scenario, ScenarioDraft, Story,
    StoryDraft,
};
use crate::store::{StoreError, Stores};

/// Assigns identity to freshly generated records
#[async_trait]
pub trait RecordSink: Send + Sync {
    type Id: RecordId;

    async fn story(&self, draft: StoryDraft) -> Result<Story<Self::Id>, StoreError>;

    async fn scenario(
        &self,
        story_id: Self::Id,
        draft: ScenarioDraft,
    ) -> Result<Scenario<Self::Id>, StoreError>;

    async fn image(
        &self,
        scenario_id: Self::Id,
        draft: ImageDraft,
    ) -> Result<Image<Self::Id>, StoreError>;
}

/// Preview sink: local identifiers, no persistence
#[derive(Debug, Default, Clone, Copy)]
pub struct EphemeralSink;

#[async_trait]
impl RecordSink for EphemeralSink {
    type Id = EphemeralId;

    async fn story(&self, draft: StoryDraft) -> Result<Story<EphemeralId>, StoreError> {
        Ok(Story::from_draft(EphemeralId::mint(), draft))
    }

    async fn scenario(
        &self,
        story_id: EphemeralId,
        draft: ScenarioDraft,
    ) -> Result<Scenario<EphemeralId>, StoreError> {
        Ok(Scenario::from_draft(EphemeralId::mint(), story_id, draft))
    }

    async fn image(
        &self,
        scenario_id: EphemeralId,
        draft: ImageDraft,
    ) -> Result<Image<EphemeralId>, StoreError> {
        Ok(Image::from_draft(EphemeralId::mint(), scenario_id, draft))
    }
}

/// Write-through sink: one store call per record
pub struct StoreSink<'a> {
    stores: &'a Stores,
}

impl<'a> StoreSink<'a> {
    pub fn new(stores: &'a Stores) -> Self {
        Self { stores }
    }
}

#[async_trait]
impl<'a> RecordSink for StoreSink<'a> {
    type Id = DurableId;

    async fn story(&self, draft: StoryDraft) -> Result<Story<DurableId>, StoreError> {
        let id = self.stores.stories.create(draft.clone()).await?;
        Ok(Story::from_draft(id, draft))
    }

    async fn scenario(
        &self,
        story_id: DurableId,
        draft: ScenarioDraft,
    ) -> Result<Scenario<DurableId>, StoreError> {
        let id = self.stores.scenarios.create(story_id, draft.clone()).await?;
        Ok(Scenario::from_draft(id, story_id, draft))
    }

    async fn image(
        &self,
        scenario_id: DurableId,
        draft: ImageDraft,
    ) -> Result<Image<DurableId>, StoreError> {
        let id = self.stores.images.create(scenario_id, draft.clone()).await?;
        Ok(Image::from_draft(id, scenario_id, draft))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::domain::Brief;

    fn draft() -> StoryDraft {
        StoryDraft::from_generated(
            "Title".into(),
            "Body".into(),
            &Brief::new("A windy afternoon", "nature"),
        )
    }

    #[tokio::test]
    async fn test_ephemeral_sink_never_touches_stores() {
        let story = EphemeralSink.story(draft()).await.unwrap();
        let scenario = EphemeralSink
            .scenario(
                story.id,
                ScenarioDraft {
                    sequence_number: 1,
                    description: "d".into(),
                    image_prompt: "p".into(),
                    created_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        assert_eq!(scenario.story_id, story.id);
        assert!(scenario.id.to_string().starts_with("tmp_"));
    }

    #[tokio::test]
    async fn test_store_sink_adopts_issued_ids() {
        let stores = Stores::in_memory();
        let sink = StoreSink::new(&stores);

        let story = sink.story(draft()).await.unwrap();
        let stored = stores.stories.get(story.id).await.unwrap().unwrap();
        assert_eq!(stored, story);
    }
}
