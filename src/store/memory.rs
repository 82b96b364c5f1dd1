//! In-memory store backend.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{CommitLedger, ImageStore, ScenarioStore, StoreError, StoryStore};
use crate::domain::{DurableId, Image, ImageDraft, Scenario, ScenarioDraft, Story, StoryDraft};

#[derive(Default)]
struct Inner {
    // Vectors keep insertion order, which breaks created_at ties
    stories: Vec<Story<DurableId>>,
    scenarios: Vec<Scenario<DurableId>>,
    images: Vec<Image<DurableId>>,
    ledger: HashMap<String, DurableId>,
}

/// Store backend holding everything in process memory
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Task("memory store lock poisoned".to_string()))
    }
}

/// Newest first; among equal timestamps, later inserts first
fn newest_first<T>(
    items: impl DoubleEndedIterator<Item = T>,
    key: impl Fn(&T) -> DateTime<Utc>,
) -> Vec<T> {
    let mut out: Vec<T> = items.rev().collect();
    out.sort_by(|a, b| key(b).cmp(&key(a)));
    out
}

#[async_trait]
impl StoryStore for MemoryStore {
    async fn create(&self, draft: StoryDraft) -> Result<DurableId, StoreError> {
        let id = DurableId::issue();
        self.lock()?.stories.push(Story::from_draft(id, draft));
        Ok(id)
    }

    async fn get(&self, id: DurableId) -> Result<Option<Story<DurableId>>, StoreError> {
        Ok(self.lock()?.stories.iter().find(|s| s.id == id).cloned())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Story<DurableId>>, StoreError> {
        let inner = self.lock()?;
        let mut stories = newest_first(inner.stories.iter().cloned(), |s| s.created_at);
        stories.truncate(limit);
        Ok(stories)
    }

    async fn list_by_owner(
        &self,
        owner_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Story<DurableId>>, StoreError> {
        let inner = self.lock()?;
        let owned: Vec<_> = inner
            .stories
            .iter()
            .filter(|s| s.owner_id == Some(owner_id))
            .cloned()
            .collect();
        let mut stories = newest_first(owned.into_iter(), |s| s.created_at);
        stories.truncate(limit);
        Ok(stories)
    }

    async fn update(&self, story: &Story<DurableId>) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        match inner.stories.iter_mut().find(|s| s.id == story.id) {
            Some(existing) => {
                *existing = story.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: DurableId) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let before = inner.stories.len();
        inner.stories.retain(|s| s.id != id);
        if inner.stories.len() == before {
            return Ok(false);
        }

        let removed: Vec<DurableId> = inner
            .scenarios
            .iter()
            .filter(|s| s.story_id == id)
            .map(|s| s.id)
            .collect();
        inner.scenarios.retain(|s| s.story_id != id);
        inner.images.retain(|i| !removed.contains(&i.scenario_id));
        Ok(true)
    }
}

#[async_trait]
impl ScenarioStore for MemoryStore {
    async fn create(
        &self,
        story_id: DurableId,
        draft: ScenarioDraft,
    ) -> Result<DurableId, StoreError> {
        let mut inner = self.lock()?;
        if !inner.stories.iter().any(|s| s.id == story_id) {
            return Err(StoreError::MissingParent {
                entity: "scenario",
                parent: story_id,
            });
        }
        let id = DurableId::issue();
        inner.scenarios.push(Scenario::from_draft(id, story_id, draft));
        Ok(id)
    }

    async fn get(&self, id: DurableId) -> Result<Option<Scenario<DurableId>>, StoreError> {
        Ok(self.lock()?.scenarios.iter().find(|s| s.id == id).cloned())
    }

    async fn list_by_story(
        &self,
        story_id: DurableId,
    ) -> Result<Vec<Scenario<DurableId>>, StoreError> {
        let mut scenarios: Vec<_> = self
            .lock()?
            .scenarios
            .iter()
            .filter(|s| s.story_id == story_id)
            .cloned()
            .collect();
        scenarios.sort_by_key(|s| s.sequence_number);
        Ok(scenarios)
    }
}

#[async_trait]
impl ImageStore for MemoryStore {
    async fn create(
        &self,
        scenario_id: DurableId,
        draft: ImageDraft,
    ) -> Result<DurableId, StoreError> {
        let mut inner = self.lock()?;
        if !inner.scenarios.iter().any(|s| s.id == scenario_id) {
            return Err(StoreError::MissingParent {
                entity: "image",
                parent: scenario_id,
            });
        }
        let id = DurableId::issue();
        inner.images.push(Image::from_draft(id, scenario_id, draft));
        Ok(id)
    }

    async fn get(&self, id: DurableId) -> Result<Option<Image<DurableId>>, StoreError> {
        Ok(self.lock()?.images.iter().find(|i| i.id == id).cloned())
    }

    async fn get_by_scenario(
        &self,
        scenario_id: DurableId,
    ) -> Result<Option<Image<DurableId>>, StoreError> {
        Ok(self.history(scenario_id).await?.into_iter().next())
    }

    async fn list_by_story(
        &self,
        story_id: DurableId,
    ) -> Result<Vec<Image<DurableId>>, StoreError> {
        let inner = self.lock()?;
        let scenario_ids: Vec<DurableId> = inner
            .scenarios
            .iter()
            .filter(|s| s.story_id == story_id)
            .map(|s| s.id)
            .collect();
        let mut images: Vec<_> = inner
            .images
            .iter()
            .filter(|i| scenario_ids.contains(&i.scenario_id))
            .cloned()
            .collect();
        images.sort_by_key(|i| i.created_at);
        Ok(images)
    }

    async fn history(&self, scenario_id: DurableId) -> Result<Vec<Image<DurableId>>, StoreError> {
        let inner = self.lock()?;
        let images: Vec<_> = inner
            .images
            .iter()
            .filter(|i| i.scenario_id == scenario_id)
            .cloned()
            .collect();
        Ok(newest_first(images.into_iter(), |i| i.created_at))
    }
}

#[async_trait]
impl CommitLedger for MemoryStore {
    async fn lookup(&self, key: &str) -> Result<Option<DurableId>, StoreError> {
        Ok(self.lock()?.ledger.get(key).copied())
    }

    async fn record(&self, key: &str, id: DurableId) -> Result<(), StoreError> {
        self.lock()?.ledger.insert(key.to_string(), id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::domain::{Brief, PedagogicalApproach};

    fn story_draft() -> StoryDraft {
        StoryDraft::from_generated(
            "The Owl".into(),
            "An owl learns to share.".into(),
            &Brief::new("Learning to share", "values"),
        )
    }

    fn scenario_draft(seq: u32) -> ScenarioDraft {
        ScenarioDraft {
            sequence_number: seq,
            description: format!("Scene {}", seq),
            image_prompt: format!("owl scene {}", seq),
            created_at: Utc::now(),
        }
    }

    fn image_draft(prompt: &str) -> ImageDraft {
        ImageDraft {
            prompt: prompt.to_string(),
            artifact_url: format!("/static/images/{}.png", prompt),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_scenarios_listed_by_sequence() {
        let store = MemoryStore::new();
        let story_id = StoryStore::create(&store, story_draft()).await.unwrap();
        for seq in [3, 1, 2] {
            ScenarioStore::create(&store, story_id, scenario_draft(seq))
                .await
                .unwrap();
        }

        let listed = ScenarioStore::list_by_story(&store, story_id).await.unwrap();
        let order: Vec<u32> = listed.iter().map(|s| s.sequence_number).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_current_image_tie_break() {
        let store = MemoryStore::new();
        let story_id = StoryStore::create(&store, story_draft()).await.unwrap();
        let scenario_id = ScenarioStore::create(&store, story_id, scenario_draft(1))
            .await
            .unwrap();

        let at = Utc::now();
        let mut older = image_draft("older");
        older.created_at = at - Duration::seconds(10);
        let mut first = image_draft("first");
        first.created_at = at;
        let mut second = image_draft("second");
        second.created_at = at;

        ImageStore::create(&store, scenario_id, first).await.unwrap();
        ImageStore::create(&store, scenario_id, second).await.unwrap();
        ImageStore::create(&store, scenario_id, older).await.unwrap();

        let current = store.get_by_scenario(scenario_id).await.unwrap().unwrap();
        assert_eq!(current.prompt, "second");

        let history: Vec<String> = store
            .history(scenario_id)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.prompt)
            .collect();
        assert_eq!(history, vec!["second", "first", "older"]);
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let store = MemoryStore::new();
        let story_id = StoryStore::create(&store, story_draft()).await.unwrap();
        let scenario_id = ScenarioStore::create(&store, story_id, scenario_draft(1))
            .await
            .unwrap();
        ImageStore::create(&store, scenario_id, image_draft("a"))
            .await
            .unwrap();

        assert!(StoryStore::delete(&store, story_id).await.unwrap());
        assert!(ScenarioStore::get(&store, scenario_id).await.unwrap().is_none());
        assert!(store.history(scenario_id).await.unwrap().is_empty());
        assert!(!StoryStore::delete(&store, story_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_parent_rejected() {
        let store = MemoryStore::new();
        let ghost: DurableId = "6f1c1a52-7f55-4c1f-9d0e-3b8f6a0b2c11".parse().unwrap();
        let result = ScenarioStore::create(&store, ghost, scenario_draft(1)).await;
        assert!(matches!(result, Err(StoreError::MissingParent { entity: "scenario", .. })));
    }

    #[tokio::test]
    async fn test_list_by_owner() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let brief = Brief::new("Learning to share", "values")
            .with_owner(owner)
            .with_approach(PedagogicalApproach::Montessori);
        StoryStore::create(
            &store,
            StoryDraft::from_generated("Mine".into(), "Body".into(), &brief),
        )
        .await
        .unwrap();
        StoryStore::create(&store, story_draft()).await.unwrap();

        let owned = store.list_by_owner(owner, 10).await.unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].title, "Mine");
        assert_eq!(store.list_recent(1).await.unwrap().len(), 1);
    }
}
