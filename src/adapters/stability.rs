//! Stability AI adapter for scene illustrations.
//!
//! Sends a multipart request to the Stable Image `core` endpoint and stores the
//! returned PNG under the configured image directory.

use std::path::PathBuf;
use std::time::Instant;

use async_trait::async_trait;
use reqwest::multipart::Form;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::{GeneratedImage, ImageGenerator, ProviderError};
use crate::domain::{ImageStyle, PedagogicalApproach};

const PROVIDER: &str = "stability";

/// Configuration for the Stability AI client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilityConfig {
    pub api_key: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Directory generated PNG files are written to
    pub image_dir: PathBuf,

    /// URL prefix under which `image_dir` is served
    #[serde(default = "default_public_prefix")]
    pub public_prefix: String,
}

pub(crate) fn default_base_url() -> String {
    "https://api.stability.ai/v2beta/stable-image/generate/core".to_string()
}
pub(crate) fn default_public_prefix() -> String {
    "/static/images".to_string()
}

/// Prompt decoration for one pedagogical approach
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApproachStyle {
    pub prompt_suffix: &'static str,
    pub negative_prompt: &'static str,
    pub style_preset: &'static str,
}

impl ApproachStyle {
    pub fn for_approach(approach: PedagogicalApproach) -> Self {
        match approach {
            PedagogicalApproach::Montessori => Self {
                prompt_suffix: "realistic scene with natural materials, orderly surroundings, \
                                true-to-life colors, children doing hands-on activities on their \
                                own, purposeful setting, precise and accurate details",
                negative_prompt: "fantasy characters, unreal colors, chaotic scenes, magical \
                                  elements, talking animals, unrealistic proportions, cartoons",
                style_preset: "photographic",
            },
            PedagogicalApproach::Waldorf => Self {
                prompt_suffix: "soft watercolor illustration, warm pastel colors, organic and \
                                natural elements, dreamy ethereal feeling, harmonious setting \
                                inspired by nature, traditional folk elements",
                negative_prompt: "digital look, perfect lines, artificial or neon colors, modern \
                                  technology, industrial settings, minimalist style",
                style_preset: "fantasy-art",
            },
            PedagogicalApproach::Traditional => Self {
                prompt_suffix: "colorful vivid children's illustration, expressive well-defined \
                                characters, clear narrative scene, bright colors, detailed \
                                backgrounds, classic picture book style",
                negative_prompt: "abstract style, confusing scenes, dull or monotone colors, \
                                  disturbing elements",
                style_preset: "digital-art",
            },
        }
    }

    /// Append the approach suffix to a scene prompt
    pub fn decorate(&self, prompt: &str) -> String {
        format!("{}, {}", prompt.trim(), self.prompt_suffix)
    }
}

/// Nearest aspect ratio the API accepts for the given dimensions
pub fn aspect_ratio(width: u32, height: u32) -> &'static str {
    if height == 0 {
        return "21:9";
    }
    let ratio = width as f64 / height as f64;

    if ratio > 2.0 {
        "21:9"
    } else if ratio > 1.6 {
        "16:9"
    } else if ratio > 1.4 {
        "3:2"
    } else if ratio > 1.1 {
        "5:4"
    } else if ratio > 0.9 {
        "1:1"
    } else if ratio > 0.7 {
        "4:5"
    } else if ratio > 0.5 {
        "2:3"
    } else if ratio > 0.4 {
        "9:16"
    } else {
        "9:21"
    }
}

/// Stability AI REST client
pub struct StabilityClient {
    config: StabilityConfig,
    client: reqwest::Client,
}

impl StabilityClient {
    pub fn new(config: StabilityConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn public_url(&self, file_name: &str) -> String {
        format!(
            "{}/{}",
            self.config.public_prefix.trim_end_matches('/'),
            file_name
        )
    }
}

#[async_trait]
impl ImageGenerator for StabilityClient {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn generate(
        &self,
        prompt: &str,
        style: &ImageStyle,
    ) -> Result<GeneratedImage, ProviderError> {
        let approach_style = ApproachStyle::for_approach(style.approach);
        let resolved_prompt = approach_style.decorate(prompt);
        let ratio = aspect_ratio(style.width, style.height);

        let form = Form::new()
            .text("prompt", resolved_prompt.clone())
            .text("negative_prompt", approach_style.negative_prompt)
            .text("aspect_ratio", ratio)
            .text("seed", "0")
            .text("style_preset", approach_style.style_preset)
            .text("output_format", "png");

        let started = Instant::now();
        let response = self
            .client
            .post(&self.config.base_url)
            .bearer_auth(&self.config.api_key)
            .header(reqwest::header::ACCEPT, "image/*")
            .multipart(form)
            .send()
            .await
            .map_err(|e| ProviderError::request(PROVIDER, e))?;

        let status = response.status();
        info!(
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            aspect_ratio = ratio,
            "Stability response received"
        );

        if !status.is_success() {
            return Err(ProviderError::Status {
                provider: PROVIDER.to_string(),
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let finish_reason = response
            .headers()
            .get("finish-reason")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if finish_reason.as_deref() == Some("CONTENT_FILTERED") {
            warn!("Image rejected by content filter");
            return Err(ProviderError::Rejected {
                provider: PROVIDER.to_string(),
                reason: "content filtered".to_string(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProviderError::request(PROVIDER, e))?;
        if bytes.is_empty() {
            return Err(ProviderError::empty(PROVIDER));
        }

        let file_name = format!("{}.png", Uuid::new_v4());
        tokio::fs::create_dir_all(&self.config.image_dir).await?;
        tokio::fs::write(self.config.image_dir.join(&file_name), &bytes).await?;

        Ok(GeneratedImage {
            artifact_url: self.public_url(&file_name),
            resolved_prompt,
        })
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        if self.config.api_key.trim().is_empty() {
            return Err(ProviderError::request(PROVIDER, "API key is not set"));
        }
        tokio::fs::create_dir_all(&self.config.image_dir).await?;
        Ok(())
    }
}
