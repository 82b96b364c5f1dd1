//! Domain types for taleweaver.
//!
//! This module contains the core data structures:
//! - Ids: Ephemeral vs durable record identifiers
//! - Brief: Creative input and image style parameters
//! - Records: Story, Scenario, Image
//! - Bundle: Pipeline result and failure report

pub mod brief;
pub mod bundle;
pub mod ids;
pub mod records;

// Re-export commonly used types
pub use brief::{Brief, BriefError, ImageStyle, PedagogicalApproach, StyleOverrides};
pub use bundle::{
    Bundle, FailureReport, IllustratedScenario, PipelineFailure, PipelineOutcome, PipelineStep,
};
pub use ids::{DurableId, EphemeralId, IdParseError, Mode, RecordId};
pub use records::{
    timestamp_now, Image, ImageDraft, Scenario, ScenarioDraft, Story, StoryDraft,
};
