//! Persistence collaborators.
//!
//! Three entity stores plus the commit ledger used to make preview
//! reconciliation idempotent. Every `create` accepts an id-less draft and a
//! `DurableId` parent reference and returns the identifier the store issued.
//!
//! Backends:
//! - `SqliteStore`: rusqlite database file, cascading deletes
//! - `MemoryStore`: in-process maps, for tests and embedding

pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{DurableId, Image, ImageDraft, Scenario, ScenarioDraft, Story, StoryDraft};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Errors raised by store backends
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Store task failed: {0}")]
    Task(String),

    #[error("Cannot create {entity}: parent {parent} does not exist")]
    MissingParent { entity: &'static str, parent: DurableId },

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Write rejected: {0}")]
    Rejected(String),
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Task(e.to_string())
    }
}

/// Durable storage for stories
#[async_trait]
pub trait StoryStore: Send + Sync {
    async fn create(&self, draft: StoryDraft) -> Result<DurableId, StoreError>;

    async fn get(&self, id: DurableId) -> Result<Option<Story<DurableId>>, StoreError>;

    /// Newest stories first
    async fn list_recent(&self, limit: usize) -> Result<Vec<Story<DurableId>>, StoreError>;

    /// Newest stories of one owner first
    async fn list_by_owner(
        &self,
        owner_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Story<DurableId>>, StoreError>;

    /// Overwrite the content of an existing story; returns false if absent
    async fn update(&self, story: &Story<DurableId>) -> Result<bool, StoreError>;

    /// Delete a story with its scenarios and images; returns false if absent
    async fn delete(&self, id: DurableId) -> Result<bool, StoreError>;
}

/// Durable storage for scenarios
#[async_trait]
pub trait ScenarioStore: Send + Sync {
    async fn create(
        &self,
        story_id: DurableId,
        draft: ScenarioDraft,
    ) -> Result<DurableId, StoreError>;

    async fn get(&self, id: DurableId) -> Result<Option<Scenario<DurableId>>, StoreError>;

    /// Scenarios of a story ordered by sequence number
    async fn list_by_story(
        &self,
        story_id: DurableId,
    ) -> Result<Vec<Scenario<DurableId>>, StoreError>;
}

/// Durable storage for images
///
/// A scenario may hold several images after regeneration. The current one is
/// the most recent by `created_at`, with later insertion winning ties.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn create(
        &self,
        scenario_id: DurableId,
        draft: ImageDraft,
    ) -> Result<DurableId, StoreError>;

    async fn get(&self, id: DurableId) -> Result<Option<Image<DurableId>>, StoreError>;

    /// Current image of a scenario
    async fn get_by_scenario(
        &self,
        scenario_id: DurableId,
    ) -> Result<Option<Image<DurableId>>, StoreError>;

    /// Every image belonging to any scenario of the story, oldest first
    /// with insertion order breaking ties
    async fn list_by_story(&self, story_id: DurableId) -> Result<Vec<Image<DurableId>>, StoreError>;

    /// All images of a scenario, current first
    async fn history(&self, scenario_id: DurableId) -> Result<Vec<Image<DurableId>>, StoreError>;
}

/// Idempotency ledger for reconciliation writes
#[async_trait]
pub trait CommitLedger: Send + Sync {
    async fn lookup(&self, key: &str) -> Result<Option<DurableId>, StoreError>;

    async fn record(&self, key: &str, id: DurableId) -> Result<(), StoreError>;
}

/// Store handles shared by the orchestrator, reconciler and regenerator
#[derive(Clone)]
pub struct Stores {
    pub stories: Arc<dyn StoryStore>,
    pub scenarios: Arc<dyn ScenarioStore>,
    pub images: Arc<dyn ImageStore>,
    pub ledger: Arc<dyn CommitLedger>,
}

impl Stores {
    /// Use one backend for every concern
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: StoryStore + ScenarioStore + ImageStore + CommitLedger + 'static,
    {
        Self {
            stories: backend.clone(),
            scenarios: backend.clone(),
            images: backend.clone(),
            ledger: backend,
        }
    }

    /// In-memory stores
    pub fn in_memory() -> Self {
        Self::from_backend(Arc::new(MemoryStore::new()))
    }
}
