//! Generation limits and deadline enforcement for provider calls.
//!
//! Every external call runs under:
//! - A per-stage deadline
//! - A cancellation token shared by the whole run

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::adapters::ProviderError;

/// Limits applied to one pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationLimits {
    /// Deadline for story generation in seconds (default: 120)
    #[serde(default = "default_story_timeout")]
    pub story_timeout_seconds: u64,

    /// Deadline for scenario extraction in seconds (default: 120)
    #[serde(default = "default_scenario_timeout")]
    pub scenario_timeout_seconds: u64,

    /// Deadline for each image in seconds (default: 180)
    #[serde(default = "default_image_timeout")]
    pub image_timeout_seconds: u64,

    /// Image calls allowed in flight at once (default: 1, sequential)
    #[serde(default = "default_image_concurrency")]
    pub image_concurrency: usize,

    /// Upper bound on requested scenes (default: 20)
    #[serde(default = "default_max_scenes")]
    pub max_scenes: u32,
}

fn default_story_timeout() -> u64 {
    120
}
fn default_scenario_timeout() -> u64 {
    120
}
fn default_image_timeout() -> u64 {
    180
}
fn default_image_concurrency() -> usize {
    1
}
fn default_max_scenes() -> u32 {
    20
}

impl Default for GenerationLimits {
    fn default() -> Self {
        Self {
            story_timeout_seconds: default_story_timeout(),
            scenario_timeout_seconds: default_scenario_timeout(),
            image_timeout_seconds: default_image_timeout(),
            image_concurrency: default_image_concurrency(),
            max_scenes: default_max_scenes(),
        }
    }
}

impl GenerationLimits {
    /// Clamp a requested scene count into 1..=max_scenes
    pub fn clamp_scenes(&self, requested: u32) -> u32 {
        requested.clamp(1, self.max_scenes.max(1))
    }

    /// Worker count for the image stage, never zero
    pub fn image_workers(&self) -> usize {
        self.image_concurrency.max(1)
    }
}

/// Run a provider call under a deadline and a cancellation token
///
/// Expiry maps to `ProviderError::Timeout`, cancellation to
/// `ProviderError::Cancelled`. Cancellation wins if both are ready.
pub async fn guarded<T, F>(
    provider: &str,
    seconds: u64,
    cancel: &CancellationToken,
    call: F,
) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProviderError::Cancelled {
            provider: provider.to_string(),
        }),
        result = tokio::time::timeout(Duration::from_secs(seconds), call) => match result {
            Ok(inner) => inner,
            Err(_) => Err(ProviderError::Timeout {
                provider: provider.to_string(),
                seconds,
            }),
        },
    }
}
