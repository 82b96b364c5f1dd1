//! Pipeline orchestrator.
//!
//! Drives story generation, scenario extraction and per-scene illustration,
//! either as a preview (ephemeral identifiers, no store writes) or as a
//! persisted run that writes every record through the stores as it appears.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{GeneratedImage, Generators, ImageGenerator, ProviderError};
use crate::domain::{
    timestamp_now, Brief, Bundle, DurableId, EphemeralId, FailureReport, IllustratedScenario,
    Image, ImageDraft, ImageStyle, PedagogicalApproach, PipelineFailure, PipelineOutcome,
    PipelineStep, RecordId, Scenario, ScenarioDraft, Story, StoryDraft, StyleOverrides,
};
use crate::error::Failure;
use crate::store::Stores;

use super::limits::{guarded, GenerationLimits};
use super::sink::{EphemeralSink, RecordSink, StoreSink};

/// Main pipeline orchestrator
pub struct Orchestrator {
    generators: Generators,
    stores: Stores,
    limits: GenerationLimits,
    style_defaults: StyleOverrides,
    shutdown: CancellationToken,
}

impl Orchestrator {
    /// Create an orchestrator over explicit generators and stores
    pub fn new(generators: Generators, stores: Stores) -> Self {
        Self {
            generators,
            stores,
            limits: GenerationLimits::default(),
            style_defaults: StyleOverrides::default(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_limits(mut self, limits: GenerationLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Style label and dimensions applied to every image of a run
    pub fn with_style_defaults(mut self, defaults: StyleOverrides) -> Self {
        self.style_defaults = defaults;
        self
    }

    /// Token that cancels every in-flight and future provider call
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn limits(&self) -> &GenerationLimits {
        &self.limits
    }

    /// Run the pipeline in either mode
    #[instrument(skip(self, brief), fields(category = %brief.category, approach = %brief.approach))]
    pub async fn run(
        &self,
        brief: &Brief,
        num_scenes: u32,
        persist: bool,
    ) -> Result<PipelineOutcome, PipelineFailure> {
        if persist {
            self.generate(brief, num_scenes)
                .await
                .map(PipelineOutcome::Saved)
                .map_err(PipelineFailure::Saved)
        } else {
            self.preview(brief, num_scenes)
                .await
                .map(PipelineOutcome::Preview)
                .map_err(PipelineFailure::Preview)
        }
    }

    /// Produce a complete bundle without touching any store
    pub async fn preview(
        &self,
        brief: &Brief,
        num_scenes: u32,
    ) -> Result<Bundle<EphemeralId>, FailureReport<EphemeralId>> {
        self.execute(&EphemeralSink, brief, num_scenes).await
    }

    /// Produce a bundle, writing each record through the stores
    pub async fn generate(
        &self,
        brief: &Brief,
        num_scenes: u32,
    ) -> Result<Bundle<DurableId>, FailureReport<DurableId>> {
        self.execute(&StoreSink::new(&self.stores), brief, num_scenes)
            .await
    }

    /// Rebuild a persisted bundle from the stores
    pub async fn fetch(&self, story_id: DurableId) -> Result<Bundle<DurableId>, Failure> {
        fetch_bundle(&self.stores, story_id).await
    }

    /// Extract scenes from a stored story and illustrate them
    ///
    /// Runs the scenario and image stages only, writing through the stores.
    /// The returned bundle holds the scenarios produced by this call.
    #[instrument(skip(self), fields(story_id = %story_id))]
    pub async fn illustrate(
        &self,
        story_id: DurableId,
        num_scenes: u32,
    ) -> Result<Bundle<DurableId>, FailureReport<DurableId>> {
        let story = match self.stores.stories.get(story_id).await {
            Ok(Some(story)) => story,
            Ok(None) => {
                let failure = Failure::not_found("story", story_id);
                warn!(error = %failure, "Nothing to illustrate");
                return Err(FailureReport::new(PipelineStep::Retrieval, failure.to_string()));
            }
            Err(e) => {
                error!(error = %e, "Story lookup failed");
                return Err(FailureReport::new(PipelineStep::Retrieval, e.to_string()));
            }
        };

        let cancel = self.shutdown.child_token();
        let num_scenes = self.limits.clamp_scenes(num_scenes);
        info!(num_scenes, title = %story.title, "Illustrating stored story");
        self.illustrate_story(&StoreSink::new(&self.stores), story, num_scenes, &cancel)
            .await
    }

    /// Pipeline body shared by both modes
    async fn execute<S: RecordSink>(
        &self,
        sink: &S,
        brief: &Brief,
        num_scenes: u32,
    ) -> Result<Bundle<S::Id>, FailureReport<S::Id>> {
        let cancel = self.shutdown.child_token();
        let num_scenes = self.limits.clamp_scenes(num_scenes);

        let mode = <S::Id as RecordId>::MODE;
        info!(%mode, num_scenes, "Starting pipeline");

        // Stage 1: story
        let story = self.story_stage(sink, brief, &cancel).await?;
        info!(story_id = %story.id, title = %story.title, "Story generated");

        self.illustrate_story(sink, story, num_scenes, &cancel).await
    }

    /// Stages 2 and 3 for a story that already has its identity
    async fn illustrate_story<S: RecordSink>(
        &self,
        sink: &S,
        story: Story<S::Id>,
        num_scenes: u32,
        cancel: &CancellationToken,
    ) -> Result<Bundle<S::Id>, FailureReport<S::Id>> {
        let style = ImageStyle::for_approach(story.approach).with_overrides(&StyleOverrides {
            approach: None,
            ..self.style_defaults.clone()
        });

        // Stage 2: scenarios
        let scenarios = match self
            .scenario_stage(sink, &story, num_scenes, story.approach, cancel)
            .await
        {
            Ok(scenarios) => scenarios,
            Err(message) => {
                error!(story_id = %story.id, %message, "Scenario extraction failed");
                return Err(
                    FailureReport::new(PipelineStep::ScenarioExtraction, message).with_story(story),
                );
            }
        };
        info!(story_id = %story.id, count = scenarios.len(), "Scenarios extracted");

        // Stage 3: images, failures recorded per scenario
        let rendered = self.image_stage(&scenarios, &style, cancel).await;

        let mut illustrated = Vec::with_capacity(scenarios.len());
        for (scenario, generated) in scenarios.into_iter().zip(rendered) {
            let image = match generated {
                Some(generated) => {
                    let draft = ImageDraft {
                        prompt: generated.resolved_prompt,
                        artifact_url: generated.artifact_url,
                        created_at: timestamp_now(),
                    };
                    match sink.image(scenario.id, draft).await {
                        Ok(image) => Some(image),
                        Err(e) => {
                            warn!(
                                scenario = scenario.sequence_number,
                                error = %e,
                                "Image generated but not stored"
                            );
                            None
                        }
                    }
                }
                None => None,
            };
            illustrated.push(IllustratedScenario { scenario, image });
        }

        let bundle = Bundle::assemble(story, illustrated);
        info!(
            story_id = %bundle.story.id,
            scenarios = bundle.scenario_count(),
            images = bundle.image_count(),
            "Pipeline completed"
        );
        Ok(bundle)
    }

    async fn story_stage<S: RecordSink>(
        &self,
        sink: &S,
        brief: &Brief,
        cancel: &CancellationToken,
    ) -> Result<Story<S::Id>, FailureReport<S::Id>> {
        let generator = &self.generators.story;
        let fail = |message: String| -> FailureReport<S::Id> {
            error!(%message, "Story generation failed");
            FailureReport::new(PipelineStep::StoryGeneration, message)
        };

        let generated = guarded(
            generator.name(),
            self.limits.story_timeout_seconds,
            cancel,
            generator.generate(brief),
        )
        .await
        .and_then(|story| {
            if story.title.trim().is_empty() || story.body.trim().is_empty() {
                Err(ProviderError::empty(generator.name()))
            } else {
                Ok(story)
            }
        })
        .map_err(|e| fail(e.to_string()))?;

        let draft = StoryDraft::from_generated(generated.title, generated.body, brief);
        sink.story(draft).await.map_err(|e| fail(e.to_string()))
    }

    async fn scenario_stage<S: RecordSink>(
        &self,
        sink: &S,
        story: &Story<S::Id>,
        num_scenes: u32,
        approach: PedagogicalApproach,
        cancel: &CancellationToken,
    ) -> Result<Vec<Scenario<S::Id>>, String> {
        let extractor = &self.generators.scenarios;
        let extracted = guarded(
            extractor.name(),
            self.limits.scenario_timeout_seconds,
            cancel,
            extractor.extract(&story.title, &story.body, num_scenes, approach),
        )
        .await
        .map_err(|e| e.to_string())?;

        if extracted.is_empty() {
            return Err(ProviderError::empty(extractor.name()).to_string());
        }
        if extracted.len() != num_scenes as usize {
            warn!(
                requested = num_scenes,
                extracted = extracted.len(),
                "Extractor returned a different scene count"
            );
        }

        // Extractor order is kept as returned
        let mut scenarios = Vec::with_capacity(extracted.len());
        for item in extracted {
            let draft = ScenarioDraft {
                sequence_number: item.sequence_number,
                description: item.description,
                image_prompt: item.image_prompt,
                created_at: timestamp_now(),
            };
            let scenario = sink
                .scenario(story.id, draft)
                .await
                .map_err(|e| e.to_string())?;
            scenarios.push(scenario);
        }
        Ok(scenarios)
    }

    /// Render one image per scenario; the result is aligned with `scenarios`
    async fn image_stage<I: RecordId>(
        &self,
        scenarios: &[Scenario<I>],
        style: &ImageStyle,
        cancel: &CancellationToken,
    ) -> Vec<Option<GeneratedImage>> {
        let seconds = self.limits.image_timeout_seconds;
        let workers = self.limits.image_workers();

        if workers == 1 {
            let mut results = Vec::with_capacity(scenarios.len());
            for scenario in scenarios {
                let outcome = render(
                    self.generators.images.clone(),
                    scenario.image_prompt.clone(),
                    style.clone(),
                    seconds,
                    cancel.clone(),
                )
                .await;
                results.push(settle(scenario.sequence_number, outcome));
            }
            return results;
        }

        debug!(workers, "Rendering images concurrently");
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut set = JoinSet::new();
        for (index, scenario) in scenarios.iter().enumerate() {
            let semaphore = semaphore.clone();
            let generator = self.generators.images.clone();
            let prompt = scenario.image_prompt.clone();
            let sequence_number = scenario.sequence_number;
            let style = style.clone();
            let cancel = cancel.clone();
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let outcome = render(generator, prompt, style, seconds, cancel).await;
                (index, sequence_number, outcome)
            });
        }

        // Completion order is arbitrary; slot results back by index
        let mut results: Vec<Option<GeneratedImage>> = vec![None; scenarios.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, sequence_number, outcome)) => {
                    results[index] = settle(sequence_number, outcome);
                }
                Err(e) => error!(error = %e, "Image task aborted"),
            }
        }
        results
    }
}

/// Rebuild a persisted bundle from the stores
///
/// When a scenario has several images the most recent one is attached,
/// with the later insert winning a timestamp tie.
#[instrument(skip(stores), fields(story_id = %story_id))]
pub async fn fetch_bundle(
    stores: &Stores,
    story_id: DurableId,
) -> Result<Bundle<DurableId>, Failure> {
    let story = stores
        .stories
        .get(story_id)
        .await?
        .ok_or_else(|| Failure::not_found("story", story_id))?;
    let scenarios = stores.scenarios.list_by_story(story_id).await?;
    let images = stores.images.list_by_story(story_id).await?;

    // Oldest first, so a later entry replaces an earlier one
    let mut current: HashMap<DurableId, Image<DurableId>> = HashMap::new();
    for image in images {
        let replace = current
            .get(&image.scenario_id)
            .map_or(true, |held| image.created_at >= held.created_at);
        if replace {
            current.insert(image.scenario_id, image);
        }
    }

    let scenarios = scenarios
        .into_iter()
        .map(|scenario| {
            let image = current.remove(&scenario.id);
            IllustratedScenario { scenario, image }
        })
        .collect();

    let bundle = Bundle::assemble(story, scenarios);
    debug!(summary = %bundle.summary, "Bundle fetched");
    Ok(bundle)
}

async fn render(
    generator: Arc<dyn ImageGenerator>,
    prompt: String,
    style: ImageStyle,
    seconds: u64,
    cancel: CancellationToken,
) -> Result<GeneratedImage, ProviderError> {
    guarded(
        generator.name(),
        seconds,
        &cancel,
        generator.generate(&prompt, &style),
    )
    .await
}

fn settle(
    sequence_number: u32,
    outcome: Result<GeneratedImage, ProviderError>,
) -> Option<GeneratedImage> {
    match outcome {
        Ok(image) => {
            debug!(scenario = sequence_number, url = %image.artifact_url, "Image generated");
            Some(image)
        }
        Err(e) => {
            warn!(scenario = sequence_number, error = %e, "Image generation failed");
            None
        }
    }
}
