//! Single-scene image regeneration.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::adapters::ImageGenerator;
use crate::domain::{timestamp_now, DurableId, Image, ImageDraft, ImageStyle, StyleOverrides};
use crate::error::Failure;
use crate::store::Stores;

use super::limits::{guarded, GenerationLimits};

/// A freshly generated image and the one it supersedes
#[derive(Debug, Clone, Serialize)]
pub struct Regenerated {
    pub image: Image<DurableId>,

    /// Image that was current for the scenario before this call
    pub replaces: Option<DurableId>,
}

/// Regenerates one scenario's image from its stored prompt
pub struct Regenerator {
    images: Arc<dyn ImageGenerator>,
    stores: Stores,
    limits: GenerationLimits,
    style_defaults: StyleOverrides,
    shutdown: CancellationToken,
}

impl Regenerator {
    pub fn new(images: Arc<dyn ImageGenerator>, stores: Stores) -> Self {
        Self {
            images,
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

    /// Style label and dimensions used when the caller does not override them
    pub fn with_style_defaults(mut self, defaults: StyleOverrides) -> Self {
        self.style_defaults = defaults;
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Render a new image for a scenario and store it alongside the old ones
    ///
    /// The prompt always comes from the stored scenario. The approach
    /// defaults to the owning story's. Earlier images are left as they are.
    #[instrument(skip(self, overrides), fields(scenario_id = %scenario_id))]
    pub async fn regenerate(
        &self,
        scenario_id: DurableId,
        overrides: &StyleOverrides,
    ) -> Result<Regenerated, Failure> {
        let scenario = self
            .stores
            .scenarios
            .get(scenario_id)
            .await?
            .ok_or_else(|| Failure::not_found("scenario", scenario_id))?;
        let story = self
            .stores
            .stories
            .get(scenario.story_id)
            .await?
            .ok_or_else(|| Failure::not_found("story", scenario.story_id))?;

        let style = ImageStyle::for_approach(story.approach)
            .with_overrides(&StyleOverrides {
                approach: None,
                ..self.style_defaults.clone()
            })
            .with_overrides(overrides);
        style.validate()?;

        let replaces = self
            .stores
            .images
            .get_by_scenario(scenario_id)
            .await?
            .map(|image| image.id);

        let generated = guarded(
            self.images.name(),
            self.limits.image_timeout_seconds,
            &self.shutdown.child_token(),
            self.images.generate(&scenario.image_prompt, &style),
        )
        .await?;

        let draft = ImageDraft {
            prompt: generated.resolved_prompt,
            artifact_url: generated.artifact_url,
            created_at: timestamp_now(),
        };
        let id = self.stores.images.create(scenario_id, draft.clone()).await?;
        let image = Image::from_draft(id, scenario_id, draft);

        info!(
            image_id = %image.id,
            replaces = ?replaces,
            sequence_number = scenario.sequence_number,
            "Image regenerated"
        );

        Ok(Regenerated { image, replaces })
    }
}
