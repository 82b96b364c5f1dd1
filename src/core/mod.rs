//! Core generation logic.
//!
//! This module contains:
//! - Limits: Deadlines, cancellation and concurrency bounds
//! - Sink: Ephemeral vs write-through record identity
//! - Orchestrator: Three-stage pipeline and bundle fetch
//! - Reconciler: Preview commit with identifier remapping
//! - Regenerate: Single-scene image regeneration

pub mod limits;
pub mod orchestrator;
pub mod reconciler;
pub mod regenerate;
pub mod sink;

// Re-export commonly used types
pub use limits::{guarded, GenerationLimits};
pub use orchestrator::{fetch_bundle, Orchestrator};
pub use reconciler::{
    commit_key, hash_content, CommitPhase, CommitProgress, Committed, PreviewReconciler,
    ReconcileError,
};
pub use regenerate::{Regenerated, Regenerator};
pub use sink::{EphemeralSink, RecordSink, StoreSink};
