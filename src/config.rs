//! Configuration for taleweaver.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (TALEWEAVER_HOME, TALEWEAVER_DATABASE,
//!    TALEWEAVER_IMAGE_DIR, GEMINI_API_KEY, STABILITY_API_KEY)
//! 2. Config file (.taleweaver/config.yaml)
//! 3. Defaults (~/.taleweaver)
//!
//! Config file discovery:
//! - Searches current directory and parents for .taleweaver/config.yaml
//! - Paths in the config file are relative to the .taleweaver/ directory
//!
//! Configuration is loaded explicitly and handed to whoever needs it.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::{gemini, stability, GeminiConfig, StabilityConfig};
use crate::core::GenerationLimits;
use crate::domain::brief::{DEFAULT_IMAGE_EDGE, DEFAULT_IMAGE_STYLE, DEFAULT_SCENE_COUNT};
use crate::domain::StyleOverrides;

const CONFIG_DIR: &str = ".taleweaver";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub limits: Option<GenerationLimits>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .taleweaver/)
    pub home: Option<String>,
    /// SQLite database file
    pub database: Option<String>,
    /// Directory generated images are written to
    pub images: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub gemini: Option<GeminiFileConfig>,
    #[serde(default)]
    pub stability: Option<StabilityFileConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeminiFileConfig {
    pub model: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StabilityFileConfig {
    pub base_url: Option<String>,
    pub public_prefix: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerationConfig {
    pub scene_count: Option<u32>,
    pub style: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Values taken from the process environment
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub home: Option<PathBuf>,
    pub database: Option<PathBuf>,
    pub image_dir: Option<PathBuf>,
    pub gemini_api_key: Option<String>,
    pub stability_api_key: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            home: var("TALEWEAVER_HOME").map(PathBuf::from),
            database: var("TALEWEAVER_DATABASE").map(PathBuf::from),
            image_dir: var("TALEWEAVER_IMAGE_DIR").map(PathBuf::from),
            gemini_api_key: var("GEMINI_API_KEY"),
            stability_api_key: var("STABILITY_API_KEY"),
        }
    }
}

/// Defaults applied to every generation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationDefaults {
    pub scene_count: u32,
    pub style: String,
    pub width: u32,
    pub height: u32,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            scene_count: DEFAULT_SCENE_COUNT,
            style: DEFAULT_IMAGE_STYLE.to_string(),
            width: DEFAULT_IMAGE_EDGE,
            height: DEFAULT_IMAGE_EDGE,
        }
    }
}

/// Provider endpoints and credentials
#[derive(Debug, Clone, Serialize)]
pub struct ProviderSettings {
    #[serde(skip_serializing)]
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_base_url: String,

    #[serde(skip_serializing)]
    pub stability_api_key: Option<String>,
    pub stability_base_url: String,
    pub public_prefix: String,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    /// State directory
    pub home: PathBuf,
    /// SQLite database file
    pub database: PathBuf,
    /// Directory generated images are written to
    pub image_dir: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub providers: ProviderSettings,
    pub generation: GenerationDefaults,
    pub limits: GenerationLimits,
}

impl ResolvedConfig {
    /// Load from the environment, the nearest config file, and defaults
    pub fn load() -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to determine current directory")?;
        let default_home = dirs::home_dir()
            .context("Failed to determine home directory")?
            .join(CONFIG_DIR);
        let config_file = find_config_file(&cwd);
        let parsed = match config_file {
            Some(ref path) => Some(load_config_file(path)?),
            None => None,
        };
        Ok(Self::resolve(
            default_home,
            config_file,
            parsed.unwrap_or_default(),
            EnvOverrides::from_env(),
        ))
    }

    /// Combine the sources; environment wins over file, file over defaults
    pub fn resolve(
        default_home: PathBuf,
        config_file: Option<PathBuf>,
        file: ConfigFile,
        env: EnvOverrides,
    ) -> Self {
        let config_dir = config_file
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf);
        let from_file = |value: &Option<String>| -> Option<PathBuf> {
            match (value, config_dir.as_deref()) {
                (Some(v), Some(dir)) => Some(resolve_path(dir, v)),
                (Some(v), None) => Some(PathBuf::from(v)),
                _ => None,
            }
        };

        let home = env
            .home
            .or_else(|| from_file(&file.paths.home))
            .unwrap_or(default_home);
        let database = env
            .database
            .or_else(|| from_file(&file.paths.database))
            .unwrap_or_else(|| home.join("taleweaver.db"));
        let image_dir = env
            .image_dir
            .or_else(|| from_file(&file.paths.images))
            .unwrap_or_else(|| home.join("images"));

        let gemini_file = file.providers.gemini.unwrap_or_default();
        let stability_file = file.providers.stability.unwrap_or_default();
        let providers = ProviderSettings {
            gemini_api_key: env.gemini_api_key,
            gemini_model: gemini_file.model.unwrap_or_else(gemini::default_model),
            gemini_base_url: gemini_file
                .base_url
                .unwrap_or_else(gemini::default_base_url),
            stability_api_key: env.stability_api_key,
            stability_base_url: stability_file
                .base_url
                .unwrap_or_else(stability::default_base_url),
            public_prefix: stability_file
                .public_prefix
                .unwrap_or_else(stability::default_public_prefix),
        };

        let defaults = GenerationDefaults::default();
        let generation = GenerationDefaults {
            scene_count: file.generation.scene_count.unwrap_or(defaults.scene_count),
            style: file.generation.style.unwrap_or(defaults.style),
            width: file.generation.width.unwrap_or(defaults.width),
            height: file.generation.height.unwrap_or(defaults.height),
        };

        Self {
            home,
            database,
            image_dir,
            config_file,
            providers,
            generation,
            limits: file.limits.unwrap_or_default(),
        }
    }

    /// Gemini client settings; fails without an API key
    pub fn gemini(&self) -> Result<GeminiConfig> {
        let api_key = self
            .providers
            .gemini_api_key
            .clone()
            .context("GEMINI_API_KEY is not set")?;
        Ok(GeminiConfig {
            api_key,
            model: self.providers.gemini_model.clone(),
            base_url: self.providers.gemini_base_url.clone(),
        })
    }

    /// Stability client settings; fails without an API key
    pub fn stability(&self) -> Result<StabilityConfig> {
        let api_key = self
            .providers
            .stability_api_key
            .clone()
            .context("STABILITY_API_KEY is not set")?;
        Ok(StabilityConfig {
            api_key,
            base_url: self.providers.stability_base_url.clone(),
            image_dir: self.image_dir.clone(),
            public_prefix: self.providers.public_prefix.clone(),
        })
    }

    /// Style label and dimensions as overrides on a per-approach style
    pub fn style_defaults(&self) -> StyleOverrides {
        StyleOverrides {
            approach: None,
            style: Some(self.generation.style.clone()),
            width: Some(self.generation.width),
            height: Some(self.generation.height),
        }
    }
}

/// Find config file by searching a directory and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}
