//! Preview reconciliation.
//!
//! Commits a preview bundle to the stores in three passes (story, then
//! scenarios in sequence order, then images), remapping every ephemeral
//! identifier to the durable one the store issued.
//!
//! Commit is not atomic. Each write is keyed in the commit ledger so a retry
//! after a partial failure reuses what is already durable and only writes
//! the remainder. Scenario and image keys include the durable parent, so a
//! record is only reused under the parent it was written to.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::domain::{Bundle, DurableId, EphemeralId, Image, Mode, Scenario, Story};
use crate::store::{StoreError, Stores};

/// Entity kind being committed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitPhase {
    Story,
    Scenario,
    Image,
}

impl CommitPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitPhase::Story => "story",
            CommitPhase::Scenario => "scenario",
            CommitPhase::Image => "image",
        }
    }
}

impl fmt::Display for CommitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a commit has made durable so far
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommitProgress {
    pub scenarios: usize,
    pub images: usize,

    /// Images whose scenario was not part of the bundle
    pub skipped_images: usize,

    /// Writes satisfied from the ledger instead of the stores
    pub reused: usize,
}

/// Result of a successful commit
#[derive(Debug, Clone, Serialize)]
pub struct Committed {
    pub story_id: DurableId,
    pub progress: CommitProgress,

    /// Ephemeral scenario id to its durable id
    pub scenario_ids: HashMap<EphemeralId, DurableId>,
}

/// Reconciliation failures
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Only preview bundles can be committed (mode: {0})")]
    NotPreview(Mode),

    #[error(
        "Commit stopped at {phase} {index} after {} scenarios and {} images: {source}",
        .progress.scenarios,
        .progress.images
    )]
    Interrupted {
        phase: CommitPhase,
        /// Position within the phase, starting at 0
        index: usize,
        /// Durable story id, when the story pass had completed
        story_id: Option<DurableId>,
        progress: CommitProgress,
        source: StoreError,
    },
}

/// Generate a commit key: `<ephemeral-id>:<kind>:<content-hash16>`
pub fn commit_key(ephemeral: EphemeralId, phase: CommitPhase, content: &str) -> String {
    format!("{}:{}:{}", ephemeral, phase, hash_content(content))
}

/// First 16 hex chars of the SHA-256 of the content
pub fn hash_content(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    hex::encode(&digest[..8])
}

/// Draft content, prefixed with the durable parent when there is one
fn fingerprint<T: Serialize>(
    parent: Option<DurableId>,
    draft: &T,
) -> Result<String, StoreError> {
    let content =
        serde_json::to_string(draft).map_err(|e| StoreError::Corrupt(e.to_string()))?;
    Ok(match parent {
        Some(parent) => format!("{}/{}", parent, content),
        None => content,
    })
}

/// Commits preview bundles to the stores
pub struct PreviewReconciler {
    stores: Stores,
}

impl PreviewReconciler {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    /// Persist a preview bundle and return the durable story id
    #[instrument(skip(self, bundle), fields(preview_story = %bundle.story.id))]
    pub async fn commit(&self, bundle: &Bundle<EphemeralId>) -> Result<Committed, ReconcileError> {
        if bundle.mode != Mode::Preview {
            return Err(ReconcileError::NotPreview(bundle.mode));
        }

        let mut progress = CommitProgress::default();

        // Pass 1: story
        let (story_id, reused) = self.commit_story(&bundle.story).await.map_err(|source| {
            ReconcileError::Interrupted {
                phase: CommitPhase::Story,
                index: 0,
                story_id: None,
                progress: progress.clone(),
                source,
            }
        })?;
        progress.reused += reused as usize;
        debug!(%story_id, reused, "Story committed");

        // Pass 2: scenarios in sequence order
        let mut ordered: Vec<&Scenario<EphemeralId>> =
            bundle.scenarios.iter().map(|s| &s.scenario).collect();
        ordered.sort_by_key(|s| s.sequence_number);

        let mut scenario_ids: HashMap<EphemeralId, DurableId> = HashMap::new();
        for (index, scenario) in ordered.into_iter().enumerate() {
            let (durable, reused) = self
                .commit_scenario(story_id, scenario)
                .await
                .map_err(|source| ReconcileError::Interrupted {
                    phase: CommitPhase::Scenario,
                    index,
                    story_id: Some(story_id),
                    progress: progress.clone(),
                    source,
                })?;
            scenario_ids.insert(scenario.id, durable);
            progress.scenarios += 1;
            progress.reused += reused as usize;
        }

        // Pass 3: images, attached through the mapping only
        for (index, image) in bundle.images().enumerate() {
            let Some(&scenario_id) = scenario_ids.get(&image.scenario_id) else {
                warn!(image = %image.id, scenario = %image.scenario_id, "Skipping orphaned image");
                progress.skipped_images += 1;
                continue;
            };
            let reused = self
                .commit_image(scenario_id, image)
                .await
                .map_err(|source| ReconcileError::Interrupted {
                    phase: CommitPhase::Image,
                    index,
                    story_id: Some(story_id),
                    progress: progress.clone(),
                    source,
                })?;
            progress.images += 1;
            progress.reused += reused as usize;
        }

        info!(
            %story_id,
            scenarios = progress.scenarios,
            images = progress.images,
            reused = progress.reused,
            "Preview committed"
        );

        Ok(Committed {
            story_id,
            progress,
            scenario_ids,
        })
    }

    /// Ledger hit whose record still exists
    async fn recall(&self, key: &str, phase: CommitPhase) -> Result<Option<DurableId>, StoreError> {
        let Some(id) = self.stores.ledger.lookup(key).await? else {
            return Ok(None);
        };
        let present = match phase {
            CommitPhase::Story => self.stores.stories.get(id).await?.is_some(),
            CommitPhase::Scenario => self.stores.scenarios.get(id).await?.is_some(),
            CommitPhase::Image => self.stores.images.get(id).await?.is_some(),
        };
        if !present {
            debug!(key, "Ledger entry points at a deleted record");
        }
        Ok(present.then_some(id))
    }

    async fn commit_story(
        &self,
        story: &Story<EphemeralId>,
    ) -> Result<(DurableId, bool), StoreError> {
        let draft = story.to_draft();
        let key = commit_key(story.id, CommitPhase::Story, &fingerprint(None, &draft)?);
        if let Some(id) = self.recall(&key, CommitPhase::Story).await? {
            return Ok((id, true));
        }
        let id = self.stores.stories.create(draft).await?;
        self.stores.ledger.record(&key, id).await?;
        Ok((id, false))
    }

    async fn commit_scenario(
        &self,
        story_id: DurableId,
        scenario: &Scenario<EphemeralId>,
    ) -> Result<(DurableId, bool), StoreError> {
        let draft = scenario.to_draft();
        let content = fingerprint(Some(story_id), &draft)?;
        let key = commit_key(scenario.id, CommitPhase::Scenario, &content);
        if let Some(id) = self.recall(&key, CommitPhase::Scenario).await? {
            return Ok((id, true));
        }
        let id = self.stores.scenarios.create(story_id, draft).await?;
        self.stores.ledger.record(&key, id).await?;
        Ok((id, false))
    }

    async fn commit_image(
        &self,
        scenario_id: DurableId,
        image: &Image<EphemeralId>,
    ) -> Result<bool, StoreError> {
        let draft = image.to_draft();
        let content = fingerprint(Some(scenario_id), &draft)?;
        let key = commit_key(image.id, CommitPhase::Image, &content);
        if self.recall(&key, CommitPhase::Image).await?.is_some() {
            return Ok(true);
        }
        let id = self.stores.images.create(scenario_id, draft).await?;
        self.stores.ledger.record(&key, id).await?;
        Ok(false)
    }
}
