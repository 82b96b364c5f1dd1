//! Gemini adapter for story generation and scene extraction.
//!
//! Talks to the `generateContent` REST endpoint with a plain reqwest client.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    ExtractedScenario, GeneratedStory, ProviderError, ScenarioExtractor, StoryGenerator,
};
use crate::domain::{Brief, PedagogicalApproach};

const PROVIDER: &str = "gemini";

/// Configuration for the Gemini client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    pub api_key: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,
}

pub(crate) fn default_model() -> String {
    "gemini-2.0-flash".to_string()
}
pub(crate) fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

/// Gemini REST client
pub struct GeminiClient {
    config: GeminiConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/models/{}:{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.model,
            method
        )
    }

    /// Send a single-turn prompt and return the concatenated reply text
    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(self.api_url("generateContent"))
            .query(&[("key", self.config.api_key.as_str())])
            .json(&serde_json::json!({
                "contents": [{ "parts": [{ "text": prompt }] }],
            }))
            .send()
            .await
            .map_err(|e| ProviderError::request(PROVIDER, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                provider: PROVIDER.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::request(PROVIDER, e))?;

        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        debug!(chars = text.len(), "Gemini reply received");
        Ok(text)
    }
}

#[async_trait]
impl StoryGenerator for GeminiClient {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn generate(&self, brief: &Brief) -> Result<GeneratedStory, ProviderError> {
        let reply = self.complete(&story_prompt(brief)).await?;
        parse_story(&reply)
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        let response = self
            .client
            .get(format!(
                "{}/models/{}",
                self.config.base_url.trim_end_matches('/'),
                self.config.model
            ))
            .query(&[("key", self.config.api_key.as_str())])
            .send()
            .await
            .map_err(|e| ProviderError::request(PROVIDER, e))?;

        if !response.status().is_success() {
            return Err(ProviderError::Status {
                provider: PROVIDER.to_string(),
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ScenarioExtractor for GeminiClient {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn extract(
        &self,
        title: &str,
        body: &str,
        count: u32,
        approach: PedagogicalApproach,
    ) -> Result<Vec<ExtractedScenario>, ProviderError> {
        let reply = self
            .complete(&scenario_prompt(title, body, count, approach))
            .await?;
        Ok(parse_scenarios(&reply))
    }
}

fn story_prompt(brief: &Brief) -> String {
    let mut prompt = format!(
        "Write a children's story.\nCategory: {}\nSituation: {}\nPedagogical approach: {}\n",
        brief.category, brief.context, brief.approach
    );
    if let Some(ref age) = brief.target_age {
        prompt.push_str(&format!("Target age: {}\n", age));
    }
    if let Some(max_length) = brief.max_length {
        prompt.push_str(&format!("Maximum length: {} words\n", max_length));
    }
    prompt.push_str("Put the title alone on the first line, then the story.");
    prompt
}

fn scenario_prompt(title: &str, body: &str, count: u32, approach: PedagogicalApproach) -> String {
    format!(
        "Select exactly {count} key scenes, in chronological order, from the story below for \
         illustration in a {approach} style. Keep every character's appearance identical across \
         scenes. Reply with a JSON array of objects with fields sequence_number (starting at 1), \
         description, and prompt_for_image (a detailed English image prompt).\n\n\
         Title: {title}\n\n{body}"
    )
}

/// Split a reply into title (first non-empty line) and body (the rest)
pub(crate) fn parse_story(reply: &str) -> Result<GeneratedStory, ProviderError> {
    let mut lines = reply.trim().lines();
    let title = lines
        .by_ref()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(|l| l.trim_start_matches('#').trim().trim_matches('*').trim().to_string())
        .unwrap_or_default();
    let body = lines.collect::<Vec<_>>().join("\n").trim().to_string();

    if title.is_empty() || body.is_empty() {
        return Err(ProviderError::empty(PROVIDER));
    }

    Ok(GeneratedStory { title, body })
}

fn fallback_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r#"(?s)"sequence_number"\s*:\s*(\d+).*?"description"\s*:\s*"([^"]*)".*?"(?:prompt_for_image|image_prompt)"\s*:\s*"([^"]*)""#,
        )
        .expect("static regex is valid")
    })
}

/// Parse the scene list out of a model reply
///
/// Looks for the outermost JSON array first; if that does not parse, recovers
/// whatever complete scene triples a regex can find. Returns an empty list
/// when nothing usable is present.
pub(crate) fn parse_scenarios(reply: &str) -> Vec<ExtractedScenario> {
    let candidate = match (reply.find('['), reply.rfind(']')) {
        (Some(start), Some(end)) if start < end => &reply[start..=end],
        _ => reply,
    };

    match serde_json::from_str::<Vec<ExtractedScenario>>(candidate) {
        Ok(scenarios) => scenarios,
        Err(e) => {
            warn!(error = %e, "Scene list is not valid JSON, falling back to pattern match");
            fallback_pattern()
                .captures_iter(reply)
                .filter_map(|cap| {
                    Some(ExtractedScenario {
                        sequence_number: cap[1].parse().ok()?,
                        description: cap[2].trim().to_string(),
                        image_prompt: cap[3].trim().to_string(),
                    })
                })
                .collect()
        }
    }
}
