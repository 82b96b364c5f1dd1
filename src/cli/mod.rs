//! Command-line interface for taleweaver.
//!
//! Provides commands for generating, previewing and illustrating stories,
//! committing previews, regenerating scene images, and browsing saved stories.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::adapters::{GeminiClient, Generators, StabilityClient};
use crate::config::ResolvedConfig;
use crate::core::{fetch_bundle, Orchestrator, PreviewReconciler, Regenerator};
use crate::domain::{
    Brief, Bundle, DurableId, EphemeralId, PedagogicalApproach, PipelineFailure, PipelineOutcome,
    PipelineStep, StyleOverrides,
};
use crate::error::Failure;
use crate::response::Envelope;
use crate::store::{SqliteStore, Stores};

/// taleweaver - Illustrated story generator
#[derive(Parser, Debug)]
#[command(name = "taleweaver")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate a story and save every record as it is produced
    Generate {
        #[command(flatten)]
        brief: BriefArgs,
    },

    /// Generate a story without saving anything
    Preview {
        #[command(flatten)]
        brief: BriefArgs,

        /// Also write the bundle to this file (for `commit`)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Save a previously generated preview
    Commit {
        /// Preview bundle JSON file
        file: PathBuf,
    },

    /// Show a saved story with its scenes and current images
    Show {
        /// Story ID (UUID)
        story_id: String,
    },

    /// Extract scenes from a saved story and illustrate them
    Illustrate {
        /// Story ID (UUID)
        story_id: String,

        /// Number of scenes to illustrate
        #[arg(short, long, default_value = "4")]
        scenes: u32,
    },

    /// Generate a new image for one scene
    Regenerate {
        /// Scenario ID (UUID)
        scenario_id: String,

        /// Approach (defaults to the story's)
        #[arg(short, long, value_enum)]
        approach: Option<ApproachArg>,

        /// Style label
        #[arg(short, long)]
        style: Option<String>,

        /// Image width in pixels
        #[arg(long)]
        width: Option<u32>,

        /// Image height in pixels
        #[arg(long)]
        height: Option<u32>,
    },

    /// List saved stories
    Stories {
        /// Only stories belonging to this user
        #[arg(short, long)]
        owner: Option<Uuid>,

        /// Maximum number of stories to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Delete a saved story with its scenes and images
    Delete {
        /// Story ID (UUID)
        story_id: String,
    },

    /// Show resolved configuration (debug)
    Config,

    /// Check providers and the database
    Doctor,
}

/// Creative brief as command-line arguments
#[derive(Args, Debug, Clone)]
pub struct BriefArgs {
    /// Situation the story should address
    #[arg(short, long)]
    pub context: String,

    /// Category or genre
    #[arg(long)]
    pub category: String,

    /// Pedagogical approach
    #[arg(short, long, value_enum, default_value = "traditional")]
    pub approach: ApproachArg,

    /// Target age, e.g. "4-6"
    #[arg(long)]
    pub age: Option<String>,

    /// Maximum story length in words
    #[arg(long)]
    pub max_length: Option<u32>,

    /// Number of scenes to illustrate
    #[arg(short, long)]
    pub scenes: Option<u32>,

    /// User the story belongs to
    #[arg(long)]
    pub owner: Option<Uuid>,
}

impl BriefArgs {
    fn into_brief(self) -> Brief {
        Brief {
            context: self.context,
            category: self.category,
            approach: self.approach.into(),
            owner_id: self.owner,
            target_age: self.age,
            max_length: self.max_length,
            scene_count: self.scenes,
        }
    }
}

/// Pedagogical approach for CLI (maps to PedagogicalApproach)
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ApproachArg {
    Traditional,
    Montessori,
    Waldorf,
}

impl From<ApproachArg> for PedagogicalApproach {
    fn from(a: ApproachArg) -> Self {
        match a {
            ApproachArg::Traditional => PedagogicalApproach::Traditional,
            ApproachArg::Montessori => PedagogicalApproach::Montessori,
            ApproachArg::Waldorf => PedagogicalApproach::Waldorf,
        }
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<Completion> {
        match self.command {
            Commands::Generate { brief } => run_generation(brief, true, None).await,
            Commands::Preview { brief, output } => run_generation(brief, false, output).await,
            Commands::Commit { file } => commit_preview(&file).await,
            Commands::Show { story_id } => show_story(&story_id).await,
            Commands::Illustrate { story_id, scenes } => illustrate_story(&story_id, scenes).await,
            Commands::Regenerate {
                scenario_id,
                approach,
                style,
                width,
                height,
            } => {
                let overrides = StyleOverrides {
                    approach: approach.map(Into::into),
                    style,
                    width,
                    height,
                };
                regenerate_image(&scenario_id, overrides).await
            }
            Commands::Stories { owner, limit } => list_stories(owner, limit).await,
            Commands::Delete { story_id } => delete_story(&story_id).await,
            Commands::Config => show_config(),
            Commands::Doctor => doctor().await,
        }
    }
}

/// Resolved configuration plus the stores it points at
struct Runtime {
    config: ResolvedConfig,
    stores: Stores,
}

impl Runtime {
    fn load() -> Result<Self> {
        let config = ResolvedConfig::load()?;
        let store = SqliteStore::open(&config.database).with_context(|| {
            format!("Failed to open database: {}", config.database.display())
        })?;
        Ok(Self {
            config,
            stores: Stores::from_backend(Arc::new(store)),
        })
    }

    /// Configuration only; nothing is read from or written to disk
    fn ephemeral() -> Result<Self> {
        Ok(Self {
            config: ResolvedConfig::load()?,
            stores: Stores::in_memory(),
        })
    }

    fn generators(&self) -> Result<Generators> {
        let gemini = Arc::new(GeminiClient::new(self.config.gemini()?));
        let stability = Arc::new(StabilityClient::new(self.config.stability()?));
        Ok(Generators::new(gemini.clone(), gemini, stability))
    }

    fn orchestrator(&self) -> Result<Orchestrator> {
        Ok(Orchestrator::new(self.generators()?, self.stores.clone())
            .with_limits(self.config.limits.clone())
            .with_style_defaults(self.config.style_defaults()))
    }
}

/// Cancel in-flight provider calls on Ctrl-C
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling provider calls");
            token.cancel();
        }
    });
}

/// How a command ended once its output was printed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Succeeded,
    /// The printed envelope reports a failure
    Failed,
}

impl From<Completion> for ExitCode {
    fn from(completion: Completion) -> Self {
        match completion {
            Completion::Succeeded => ExitCode::SUCCESS,
            Completion::Failed => ExitCode::FAILURE,
        }
    }
}

/// Print the envelope and report whether it succeeded
fn emit(envelope: Envelope) -> Result<Completion> {
    println!("{}", envelope.to_json_pretty());
    Ok(if envelope.is_success() {
        Completion::Succeeded
    } else {
        Completion::Failed
    })
}

fn parse_durable(entity: &'static str, raw: &str) -> Result<DurableId, Envelope> {
    raw.parse::<DurableId>().map_err(|e| {
        Envelope::from_failure(
            PipelineStep::Retrieval,
            &Failure::Validation(format!("Invalid {} ID: {}", entity, e)),
        )
    })
}

/// Run the pipeline in either mode
async fn run_generation(
    args: BriefArgs,
    persist: bool,
    output: Option<PathBuf>,
) -> Result<Completion> {
    let brief = args.into_brief();
    if let Err(e) = brief.validate() {
        return emit(Envelope::failed("validation", e));
    }

    let runtime = if persist {
        Runtime::load()?
    } else {
        Runtime::ephemeral()?
    };
    let orchestrator = runtime.orchestrator()?;
    cancel_on_ctrl_c(orchestrator.shutdown_token());

    let scenes = brief
        .scene_count
        .unwrap_or(runtime.config.generation.scene_count);

    let envelope = match orchestrator.run(&brief, scenes, persist).await {
        Ok(outcome) => {
            if let (Some(path), PipelineOutcome::Preview(bundle)) = (&output, &outcome) {
                write_bundle(path, bundle)?;
                eprintln!("[Preview written to {}]", path.display());
            }
            eprintln!("[{}]", outcome.summary());
            Envelope::from(outcome)
        }
        Err(failure) => Envelope::from(failure),
    };
    emit(envelope)
}

fn write_bundle(path: &Path, bundle: &Bundle<EphemeralId>) -> Result<()> {
    let json = serde_json::to_string_pretty(bundle).context("Failed to encode preview")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write preview file: {}", path.display()))
}

/// Commit a preview bundle read from disk
async fn commit_preview(file: &Path) -> Result<Completion> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read preview file: {}", file.display()))?;

    // Accepts both the `--output` file and a captured preview envelope
    let bundle: Bundle<EphemeralId> = match serde_json::from_str(&content) {
        Ok(bundle) => bundle,
        Err(e) => {
            return emit(Envelope::failed(
                PipelineStep::Reconciliation.as_str(),
                format!("Not a preview bundle: {}", e),
            ))
        }
    };

    let runtime = Runtime::load()?;
    let reconciler = PreviewReconciler::new(runtime.stores.clone());
    let envelope = match reconciler.commit(&bundle).await {
        Ok(committed) => Envelope::from(committed),
        Err(e) => Envelope::from(e),
    };
    emit(envelope)
}

/// Show a saved story
async fn show_story(raw_id: &str) -> Result<Completion> {
    let story_id = match parse_durable("story", raw_id) {
        Ok(id) => id,
        Err(envelope) => return emit(envelope),
    };

    let runtime = Runtime::load()?;
    let envelope = match fetch_bundle(&runtime.stores, story_id).await {
        Ok(bundle) => Envelope::ok(bundle),
        Err(failure) => Envelope::from_failure(PipelineStep::Retrieval, &failure),
    };
    emit(envelope)
}

/// Run the scenario and image stages for a saved story
async fn illustrate_story(raw_id: &str, scenes: u32) -> Result<Completion> {
    let story_id = match parse_durable("story", raw_id) {
        Ok(id) => id,
        Err(envelope) => return emit(envelope),
    };

    let runtime = Runtime::load()?;
    let orchestrator = runtime.orchestrator()?;
    cancel_on_ctrl_c(orchestrator.shutdown_token());

    let envelope = match orchestrator.illustrate(story_id, scenes).await {
        Ok(bundle) => {
            eprintln!("[{}]", bundle.summary);
            Envelope::from(PipelineOutcome::Saved(bundle))
        }
        Err(report) => Envelope::from(PipelineFailure::Saved(report)),
    };
    emit(envelope)
}

/// Regenerate one scene's image
async fn regenerate_image(
    raw_id: &str,
    overrides: StyleOverrides,
) -> Result<Completion> {
    let scenario_id = match parse_durable("scenario", raw_id) {
        Ok(id) => id,
        Err(envelope) => return emit(envelope),
    };

    let runtime = Runtime::load()?;
    let images = Arc::new(StabilityClient::new(runtime.config.stability()?));
    let regenerator = Regenerator::new(images, runtime.stores.clone())
        .with_limits(runtime.config.limits.clone())
        .with_style_defaults(runtime.config.style_defaults());
    cancel_on_ctrl_c(regenerator.shutdown_token());

    let envelope = match regenerator.regenerate(scenario_id, &overrides).await {
        Ok(regenerated) => Envelope::from(regenerated),
        Err(failure) => Envelope::from_failure(PipelineStep::ImageGeneration, &failure),
    };
    emit(envelope)
}

/// List saved stories, newest first
async fn list_stories(owner: Option<Uuid>, limit: usize) -> Result<Completion> {
    let runtime = Runtime::load()?;
    let listed = match owner {
        Some(owner) => runtime.stores.stories.list_by_owner(owner, limit).await,
        None => runtime.stores.stories.list_recent(limit).await,
    };

    let envelope = match listed {
        Ok(stories) => Envelope::ok(json!({ "count": stories.len(), "stories": stories })),
        Err(e) => Envelope::from_failure(PipelineStep::Retrieval, &Failure::from(e)),
    };
    emit(envelope)
}

/// Delete a story; scenarios and images go with it
async fn delete_story(raw_id: &str) -> Result<Completion> {
    let story_id = match parse_durable("story", raw_id) {
        Ok(id) => id,
        Err(envelope) => return emit(envelope),
    };

    let runtime = Runtime::load()?;
    let envelope = match runtime.stores.stories.delete(story_id).await {
        Ok(true) => Envelope::ok(json!({ "story_id": story_id, "deleted": true })),
        Ok(false) => Envelope::from_failure(
            PipelineStep::Retrieval,
            &Failure::not_found("story", story_id),
        ),
        Err(e) => Envelope::from_failure(PipelineStep::Retrieval, &Failure::from(e)),
    };
    emit(envelope)
}

/// Check provider configuration and database access
async fn doctor() -> Result<Completion> {
    let runtime = Runtime::load()?;
    let mut checks = Vec::new();

    let database = runtime.stores.stories.list_recent(1).await;
    checks.push(json!({
        "name": "database",
        "ok": database.is_ok(),
        "error": database.err().map(|e| e.to_string()),
    }));

    match runtime.generators() {
        Ok(generators) => {
            for (name, health) in generators.health().await {
                checks.push(json!({
                    "name": name,
                    "ok": health.is_ok(),
                    "error": health.err().map(|e| e.to_string()),
                }));
            }
        }
        Err(e) => checks.push(json!({
            "name": "providers",
            "ok": false,
            "error": e.to_string(),
        })),
    }

    let healthy = checks.iter().all(|c| c["ok"] == true);
    let envelope = if healthy {
        Envelope::ok(json!({ "checks": checks }))
    } else {
        Envelope::failed("doctor", "One or more checks failed").with("checks", checks)
    };
    emit(envelope)
}

/// Show resolved configuration
fn show_config() -> Result<Completion> {
    let cfg = ResolvedConfig::load()?;
    let key_state = |key: &Option<String>| if key.is_some() { "set" } else { "missing" };

    println!("╔═══════════════════════════════════════════════════════════════╗");
    println!("  Taleweaver Configuration");
    println!("╚═══════════════════════════════════════════════════════════════╝");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:     {}", cfg.home.display());
    println!("  Database: {}", cfg.database.display());
    println!("  Images:   {}", cfg.image_dir.display());
    println!();
    println!("Providers:");
    println!(
        "  Gemini:    {} ({}, key {})",
        cfg.providers.gemini_model,
        cfg.providers.gemini_base_url,
        key_state(&cfg.providers.gemini_api_key)
    );
    println!(
        "  Stability: {} (key {})",
        cfg.providers.stability_base_url,
        key_state(&cfg.providers.stability_api_key)
    );
    println!("  Image URL prefix: {}", cfg.providers.public_prefix);
    println!();
    println!("Generation defaults:");
    println!("  Scenes: {}", cfg.generation.scene_count);
    println!("  Style:  {}", cfg.generation.style);
    println!("  Size:   {}x{}", cfg.generation.width, cfg.generation.height);
    println!();
    println!("Limits:");
    println!("  Story timeout:     {}s", cfg.limits.story_timeout_seconds);
    println!("  Scenario timeout:  {}s", cfg.limits.scenario_timeout_seconds);
    println!("  Image timeout:     {}s", cfg.limits.image_timeout_seconds);
    println!("  Image concurrency: {}", cfg.limits.image_concurrency);
    println!("  Max scenes:        {}", cfg.limits.max_scenes);

    Ok(Completion::Succeeded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brief_args_parsing() {
        let cli = Cli::try_parse_from([
            "taleweaver",
            "preview",
            "--context",
            "A shy hedgehog joins the choir",
            "--category",
            "music",
            "--approach",
            "waldorf",
            "--scenes",
            "4",
            "--output",
            "preview.json",
        ])
        .unwrap();

        let Commands::Preview { brief, output } = cli.command else {
            panic!("expected preview command");
        };
        assert_eq!(output, Some(PathBuf::from("preview.json")));

        let brief = brief.into_brief();
        assert_eq!(brief.approach, PedagogicalApproach::Waldorf);
        assert_eq!(brief.scene_count, Some(4));
        assert!(brief.validate().is_ok());
    }

    #[test]
    fn test_regenerate_args_parsing() {
        let cli = Cli::try_parse_from([
            "taleweaver",
            "regenerate",
            "6f1c1a9e-6a0f-4f4e-9a59-2f6a1d2b9c11",
            "--width",
            "768",
        ])
        .unwrap();

        let Commands::Regenerate {
            scenario_id,
            approach,
            width,
            ..
        } = cli.command
        else {
            panic!("expected regenerate command");
        };
        assert!(scenario_id.parse::<DurableId>().is_ok());
        assert!(approach.is_none());
        assert_eq!(width, Some(768));
    }

    #[test]
    fn test_illustrate_args_parsing() {
        let cli = Cli::try_parse_from([
            "taleweaver",
            "illustrate",
            "6f1c1a9e-6a0f-4f4e-9a59-2f6a1d2b9c11",
        ])
        .unwrap();

        let Commands::Illustrate { story_id, scenes } = cli.command else {
            panic!("expected illustrate command");
        };
        assert!(story_id.parse::<DurableId>().is_ok());
        assert_eq!(scenes, 4);
    }

    #[test]
    fn test_failed_envelope_completes_as_failure() {
        let failed = emit(Envelope::failed("validation", "context too short")).unwrap();
        assert_eq!(failed, Completion::Failed);

        let ok = emit(Envelope::ok(json!({ "deleted": true }))).unwrap();
        assert_eq!(ok, Completion::Succeeded);
    }

    #[test]
    fn test_ephemeral_id_rejected_as_durable() {
        let id = EphemeralId::mint().to_string();
        let envelope = parse_durable("story", &id).unwrap_err();
        assert!(!envelope.is_success());
        assert_eq!(envelope.step.as_deref(), Some("retrieval"));
    }
}
