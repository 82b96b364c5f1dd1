//! Creative brief and image style parameters.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Default number of scenes extracted from a story
pub const DEFAULT_SCENE_COUNT: u32 = 6;

/// Default image style label
pub const DEFAULT_IMAGE_STYLE: &str = "children_illustration";

/// Default image edge in pixels
pub const DEFAULT_IMAGE_EDGE: u32 = 512;

/// A brief that failed validation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BriefError {
    #[error("context must be at least 10 characters")]
    ContextTooShort,

    #[error("category must be at least 2 characters")]
    CategoryTooShort,

    #[error("max_length must be between 100 and 5000 words, got {0}")]
    MaxLengthOutOfRange(u32),

    #[error("scene count must be between 1 and 20, got {0}")]
    SceneCountOutOfRange(u32),

    #[error("image {dimension} must be between 256 and 1024 pixels, got {value}")]
    DimensionOutOfRange { dimension: &'static str, value: u32 },

    #[error("unknown pedagogical approach '{0}' (expected traditional, montessori or waldorf)")]
    UnknownApproach(String),
}

/// Pedagogical approach shaping both text and illustration style
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PedagogicalApproach {
    #[default]
    Traditional,
    Montessori,
    Waldorf,
}

impl PedagogicalApproach {
    pub fn as_str(&self) -> &'static str {
        match self {
            PedagogicalApproach::Traditional => "traditional",
            PedagogicalApproach::Montessori => "montessori",
            PedagogicalApproach::Waldorf => "waldorf",
        }
    }
}

impl fmt::Display for PedagogicalApproach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PedagogicalApproach {
    type Err = BriefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "traditional" => Ok(PedagogicalApproach::Traditional),
            "montessori" => Ok(PedagogicalApproach::Montessori),
            "waldorf" => Ok(PedagogicalApproach::Waldorf),
            _ => Err(BriefError::UnknownApproach(s.to_string())),
        }
    }
}

/// Creative parameters driving story generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Brief {
    /// Free-text situation the story should address
    pub context: String,

    /// Category or genre label
    pub category: String,

    #[serde(default)]
    pub approach: PedagogicalApproach,

    /// User the generated story belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<Uuid>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_age: Option<String>,

    /// Upper bound on story length, in words
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,

    /// Number of scenes to illustrate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_count: Option<u32>,
}

impl Brief {
    /// Create a brief with the default approach and no optional fields
    pub fn new(context: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            category: category.into(),
            approach: PedagogicalApproach::default(),
            owner_id: None,
            target_age: None,
            max_length: None,
            scene_count: None,
        }
    }

    pub fn with_approach(mut self, approach: PedagogicalApproach) -> Self {
        self.approach = approach;
        self
    }

    pub fn with_owner(mut self, owner_id: Uuid) -> Self {
        self.owner_id = Some(owner_id);
        self
    }

    pub fn with_scene_count(mut self, scene_count: u32) -> Self {
        self.scene_count = Some(scene_count);
        self
    }

    /// Requested scene count, falling back to the default
    pub fn scene_count(&self) -> u32 {
        self.scene_count.unwrap_or(DEFAULT_SCENE_COUNT)
    }

    /// Check the brief against the accepted ranges
    ///
    /// The pipeline itself does not call this; callers validate at the edge.
    pub fn validate(&self) -> Result<(), BriefError> {
        if self.context.trim().chars().count() < 10 {
            return Err(BriefError::ContextTooShort);
        }
        if self.category.trim().chars().count() < 2 {
            return Err(BriefError::CategoryTooShort);
        }
        if let Some(max_length) = self.max_length {
            if !(100..=5000).contains(&max_length) {
                return Err(BriefError::MaxLengthOutOfRange(max_length));
            }
        }
        if let Some(count) = self.scene_count {
            if !(1..=20).contains(&count) {
                return Err(BriefError::SceneCountOutOfRange(count));
            }
        }
        Ok(())
    }
}

/// Style parameters sent alongside every image prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageStyle {
    #[serde(default)]
    pub approach: PedagogicalApproach,

    /// Free-form style label passed through to the generator
    #[serde(default = "default_style")]
    pub style: String,

    #[serde(default = "default_edge")]
    pub width: u32,

    #[serde(default = "default_edge")]
    pub height: u32,
}

fn default_style() -> String {
    DEFAULT_IMAGE_STYLE.to_string()
}
fn default_edge() -> u32 {
    DEFAULT_IMAGE_EDGE
}

impl Default for ImageStyle {
    fn default() -> Self {
        Self::for_approach(PedagogicalApproach::default())
    }
}

impl ImageStyle {
    /// Default style for an approach
    pub fn for_approach(approach: PedagogicalApproach) -> Self {
        Self {
            approach,
            style: default_style(),
            width: default_edge(),
            height: default_edge(),
        }
    }

    /// Apply overrides on top of this style
    pub fn with_overrides(mut self, overrides: &StyleOverrides) -> Self {
        if let Some(approach) = overrides.approach {
            self.approach = approach;
        }
        if let Some(ref style) = overrides.style {
            self.style = style.clone();
        }
        if let Some(width) = overrides.width {
            self.width = width;
        }
        if let Some(height) = overrides.height {
            self.height = height;
        }
        self
    }

    /// Check dimensions against the accepted range
    pub fn validate(&self) -> Result<(), BriefError> {
        for (dimension, value) in [("width", self.width), ("height", self.height)] {
            if !(256..=1024).contains(&value) {
                return Err(BriefError::DimensionOutOfRange { dimension, value });
            }
        }
        Ok(())
    }
}

/// Caller-supplied replacements for individual style fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approach: Option<PedagogicalApproach>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}
