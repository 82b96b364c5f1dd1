//! taleweaver - Illustrated story generator
//!
//! Turns a creative brief into a story, a sequence of key scenes, and one
//! illustration per scene.
//!
//! # Modes
//!
//! A run is either a preview or a saved run:
//! - Preview records carry ephemeral identifiers and never touch a store
//! - Saved runs write every record through the stores as it is produced
//! - A preview can be committed later, remapping every identifier
//!
//! # Modules
//!
//! - `adapters`: Generator capabilities (Gemini text, Stability images)
//! - `core`: Orchestration logic (Orchestrator, PreviewReconciler, Regenerator)
//! - `domain`: Data structures (Brief, Story, Scenario, Image, Bundle)
//! - `store`: Persistence (SQLite, in-memory)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Preview a story without saving it
//! taleweaver preview --context "A shy hedgehog joins the choir" --category music -o preview.json
//!
//! # Save the preview
//! taleweaver commit preview.json
//!
//! # Redraw one scene
//! taleweaver regenerate <scenario-id> --approach waldorf
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;
pub mod response;
pub mod store;

// Re-export main types at crate root for convenience
pub use crate::core::{Orchestrator, PreviewReconciler, Regenerator};
pub use domain::{Brief, Bundle, DurableId, EphemeralId, Mode, PedagogicalApproach};
pub use error::Failure;
pub use response::Envelope;
pub use store::Stores;
