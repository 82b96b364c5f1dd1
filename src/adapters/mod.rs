//! Generator interfaces for external AI providers.
//!
//! The pipeline depends only on the three capability traits below. Concrete
//! providers (Gemini for text, Stability AI for images) live in submodules.

pub mod gemini;
pub mod stability;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Brief, ImageStyle, PedagogicalApproach};

pub use gemini::{GeminiClient, GeminiConfig};
pub use stability::{StabilityClient, StabilityConfig};

/// Errors raised by generator providers
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider} request failed: {message}")]
    Request { provider: String, message: String },

    #[error("{provider} returned HTTP {status}: {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{provider} returned no usable output")]
    EmptyOutput { provider: String },

    #[error("{provider} rejected the request: {reason}")]
    Rejected { provider: String, reason: String },

    #[error("{provider} call timed out after {seconds}s")]
    Timeout { provider: String, seconds: u64 },

    #[error("{provider} call cancelled")]
    Cancelled { provider: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProviderError {
    pub fn empty(provider: impl Into<String>) -> Self {
        Self::EmptyOutput {
            provider: provider.into(),
        }
    }

    pub fn request(provider: impl Into<String>, message: impl ToString) -> Self {
        Self::Request {
            provider: provider.into(),
            message: message.to_string(),
        }
    }
}

/// Title and body produced by a story generator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedStory {
    pub title: String,
    pub body: String,
}

/// One scene as returned by a scenario extractor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedScenario {
    pub sequence_number: u32,
    pub description: String,
    #[serde(alias = "prompt_for_image")]
    pub image_prompt: String,
}

/// Artifact produced by an image generator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    /// Where the artifact can be fetched from
    pub artifact_url: String,

    /// Prompt actually sent to the provider, after style augmentation
    pub resolved_prompt: String,
}

/// Produces story text from a brief
#[async_trait]
pub trait StoryGenerator: Send + Sync {
    /// Human-readable provider name
    fn name(&self) -> &str;

    async fn generate(&self, brief: &Brief) -> Result<GeneratedStory, ProviderError>;

    async fn health_check(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Decomposes a story into ordered scenes
#[async_trait]
pub trait ScenarioExtractor: Send + Sync {
    fn name(&self) -> &str;

    /// Extract up to `count` scenes; an empty list means nothing usable
    async fn extract(
        &self,
        title: &str,
        body: &str,
        count: u32,
        approach: PedagogicalApproach,
    ) -> Result<Vec<ExtractedScenario>, ProviderError>;

    async fn health_check(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Renders an illustration for a prompt
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(
        &self,
        prompt: &str,
        style: &ImageStyle,
    ) -> Result<GeneratedImage, ProviderError>;

    async fn health_check(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// The three generator capabilities a pipeline run needs
#[derive(Clone)]
pub struct Generators {
    pub story: Arc<dyn StoryGenerator>,
    pub scenarios: Arc<dyn ScenarioExtractor>,
    pub images: Arc<dyn ImageGenerator>,
}

impl Generators {
    pub fn new(
        story: Arc<dyn StoryGenerator>,
        scenarios: Arc<dyn ScenarioExtractor>,
        images: Arc<dyn ImageGenerator>,
    ) -> Self {
        Self {
            story,
            scenarios,
            images,
        }
    }

    /// Health of every provider, by name
    pub async fn health(&self) -> Vec<(String, Result<(), ProviderError>)> {
        vec![
            (self.story.name().to_string(), self.story.health_check().await),
            (
                self.scenarios.name().to_string(),
                self.scenarios.health_check().await,
            ),
            (self.images.name().to_string(), self.images.health_check().await),
        ]
    }
}
