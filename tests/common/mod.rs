//! Scripted providers and store decorators shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use taleweaver::adapters::{
    ExtractedScenario, GeneratedImage, GeneratedStory, Generators, ImageGenerator, ProviderError,
    ScenarioExtractor, StoryGenerator,
};
use taleweaver::domain::{
    Brief, DurableId, Image, ImageDraft, ImageStyle, PedagogicalApproach, Scenario, ScenarioDraft,
    Story, StoryDraft,
};
use taleweaver::store::{
    CommitLedger, ImageStore, MemoryStore, ScenarioStore, StoreError, StoryStore, Stores,
};

pub fn brief() -> Brief {
    Brief::new("A shy hedgehog learns to sing with the choir", "friendship")
        .with_approach(PedagogicalApproach::Montessori)
}

pub fn generators(
    story: Arc<FakeStory>,
    extractor: Arc<FakeExtractor>,
    images: Arc<FakeImages>,
) -> Generators {
    Generators::new(story, extractor, images)
}

/// Story generator returning a fixed reply
pub struct FakeStory {
    reply: Result<GeneratedStory, String>,
    delay: Duration,
    pub calls: AtomicUsize,
}

impl FakeStory {
    pub fn ok(title: &str, body: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(GeneratedStory {
                title: title.to_string(),
                body: body.to_string(),
            }),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn hedgehog() -> Arc<Self> {
        Self::ok(
            "Hedgehog Sings",
            "Pip the hedgehog hid behind the oak. The choir sang. Pip hummed along.",
        )
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(message.to_string()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(GeneratedStory {
                title: "Slow".into(),
                body: "Eventually.".into(),
            }),
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoryGenerator for FakeStory {
    fn name(&self) -> &str {
        "fake-story"
    }

    async fn generate(&self, _brief: &Brief) -> Result<GeneratedStory, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.reply
            .clone()
            .map_err(|message| ProviderError::request("fake-story", message))
    }
}

enum Extraction {
    /// One scene per requested count, numbered from 1
    Numbered,
    Fixed(Vec<ExtractedScenario>),
    Fail(String),
}

/// Scenario extractor with scripted output
pub struct FakeExtractor {
    extraction: Extraction,
    pub calls: AtomicUsize,
    pub last_count: AtomicUsize,
}

impl FakeExtractor {
    fn with(extraction: Extraction) -> Arc<Self> {
        Arc::new(Self {
            extraction,
            calls: AtomicUsize::new(0),
            last_count: AtomicUsize::new(0),
        })
    }

    pub fn numbered() -> Arc<Self> {
        Self::with(Extraction::Numbered)
    }

    pub fn fixed(scenes: Vec<ExtractedScenario>) -> Arc<Self> {
        Self::with(Extraction::Fixed(scenes))
    }

    pub fn empty() -> Arc<Self> {
        Self::with(Extraction::Fixed(Vec::new()))
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Self::with(Extraction::Fail(message.to_string()))
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn scene(n: u32) -> ExtractedScenario {
    ExtractedScenario {
        sequence_number: n,
        description: format!("Pip reaches moment {}", n),
        image_prompt: format!("Scene {} of a hedgehog in a forest choir", n),
    }
}

#[async_trait]
impl ScenarioExtractor for FakeExtractor {
    fn name(&self) -> &str {
        "fake-extractor"
    }

    async fn extract(
        &self,
        _title: &str,
        _body: &str,
        count: u32,
        _approach: PedagogicalApproach,
    ) -> Result<Vec<ExtractedScenario>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.last_count.store(count as usize, Ordering::SeqCst);
        match &self.extraction {
            Extraction::Numbered => Ok((1..=count).map(scene).collect()),
            Extraction::Fixed(scenes) => Ok(scenes.clone()),
            Extraction::Fail(message) => Err(ProviderError::request("fake-extractor", message)),
        }
    }
}

/// Image generator that can fail or stall on chosen scenes
///
/// Scenes are recognised by the number after "Scene" in the prompt.
pub struct FakeImages {
    failing: HashSet<u32>,
    delays: HashMap<u32, Duration>,
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub styles: std::sync::Mutex<Vec<ImageStyle>>,
}

impl FakeImages {
    pub fn new() -> Self {
        Self {
            failing: HashSet::new(),
            delays: HashMap::new(),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            styles: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn ok() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn failing_on(scenes: &[u32]) -> Arc<Self> {
        let mut images = Self::new();
        images.failing = scenes.iter().copied().collect();
        Arc::new(images)
    }

    pub fn delayed(delays: &[(u32, Duration)]) -> Arc<Self> {
        let mut images = Self::new();
        images.delays = delays.iter().copied().collect();
        Arc::new(images)
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn last_style(&self) -> Option<ImageStyle> {
        self.styles.lock().unwrap().last().cloned()
    }
}

fn scene_number(prompt: &str) -> u32 {
    prompt
        .split_whitespace()
        .skip_while(|word| *word != "Scene")
        .nth(1)
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

#[async_trait]
impl ImageGenerator for FakeImages {
    fn name(&self) -> &str {
        "fake-images"
    }

    async fn generate(
        &self,
        prompt: &str,
        style: &ImageStyle,
    ) -> Result<GeneratedImage, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.styles.lock().unwrap().push(style.clone());
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let n = scene_number(prompt);
        if let Some(delay) = self.delays.get(&n) {
            tokio::time::sleep(*delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(&n) {
            return Err(ProviderError::Rejected {
                provider: "fake-images".into(),
                reason: format!("scene {} refused", n),
            });
        }
        Ok(GeneratedImage {
            artifact_url: format!("/static/images/scene-{}-{}.png", n, call),
            resolved_prompt: format!("{}, {}", prompt, style.style),
        })
    }
}

/// Memory store whose create calls start failing once a budget is spent
pub struct FlakyStore {
    inner: MemoryStore,
    budget: AtomicI64,
    pub creates: AtomicUsize,
}

impl FlakyStore {
    pub fn new(budget: i64) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::new(),
            budget: AtomicI64::new(budget),
            creates: AtomicUsize::new(0),
        })
    }

    pub fn refill(&self, budget: i64) {
        self.budget.store(budget, Ordering::SeqCst);
    }

    fn spend(&self) -> Result<(), StoreError> {
        if self.budget.fetch_sub(1, Ordering::SeqCst) <= 0 {
            return Err(StoreError::Rejected("write budget exhausted".into()));
        }
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

pub fn flaky_stores(store: &Arc<FlakyStore>) -> Stores {
    Stores::from_backend(store.clone())
}

#[async_trait]
impl StoryStore for FlakyStore {
    async fn create(&self, draft: StoryDraft) -> Result<DurableId, StoreError> {
        self.spend()?;
        StoryStore::create(&self.inner, draft).await
    }

    async fn get(&self, id: DurableId) -> Result<Option<Story<DurableId>>, StoreError> {
        StoryStore::get(&self.inner, id).await
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Story<DurableId>>, StoreError> {
        self.inner.list_recent(limit).await
    }

    async fn list_by_owner(
        &self,
        owner_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Story<DurableId>>, StoreError> {
        self.inner.list_by_owner(owner_id, limit).await
    }

    async fn update(&self, story: &Story<DurableId>) -> Result<bool, StoreError> {
        self.inner.update(story).await
    }

    async fn delete(&self, id: DurableId) -> Result<bool, StoreError> {
        self.inner.delete(id).await
    }
}

#[async_trait]
impl ScenarioStore for FlakyStore {
    async fn create(
        &self,
        story_id: DurableId,
        draft: ScenarioDraft,
    ) -> Result<DurableId, StoreError> {
        self.spend()?;
        ScenarioStore::create(&self.inner, story_id, draft).await
    }

    async fn get(&self, id: DurableId) -> Result<Option<Scenario<DurableId>>, StoreError> {
        ScenarioStore::get(&self.inner, id).await
    }

    async fn list_by_story(
        &self,
        story_id: DurableId,
    ) -> Result<Vec<Scenario<DurableId>>, StoreError> {
        ScenarioStore::list_by_story(&self.inner, story_id).await
    }
}

#[async_trait]
impl ImageStore for FlakyStore {
    async fn create(
        &self,
        scenario_id: DurableId,
        draft: ImageDraft,
    ) -> Result<DurableId, StoreError> {
        self.spend()?;
        ImageStore::create(&self.inner, scenario_id, draft).await
    }

    async fn get(&self, id: DurableId) -> Result<Option<Image<DurableId>>, StoreError> {
        ImageStore::get(&self.inner, id).await
    }

    async fn get_by_scenario(
        &self,
        scenario_id: DurableId,
    ) -> Result<Option<Image<DurableId>>, StoreError> {
        self.inner.get_by_scenario(scenario_id).await
    }

    async fn list_by_story(
        &self,
        story_id: DurableId,
    ) -> Result<Vec<Image<DurableId>>, StoreError> {
        ImageStore::list_by_story(&self.inner, story_id).await
    }

    async fn history(&self, scenario_id: DurableId) -> Result<Vec<Image<DurableId>>, StoreError> {
        self.inner.history(scenario_id).await
    }
}

#[async_trait]
impl CommitLedger for FlakyStore {
    async fn lookup(&self, key: &str) -> Result<Option<DurableId>, StoreError> {
        self.inner.lookup(key).await
    }

    async fn record(&self, key: &str, id: DurableId) -> Result<(), StoreError> {
        self.inner.record(key, id).await
    }
}
