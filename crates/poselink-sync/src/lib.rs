//! poselink-sync: the per-tick context synchronizer. Ingests frame states
//! from the active provider, diffs them against the previous tick, keeps the
//! local-origin anchor centered on the primary viewer, and re-serializes
//! filtered state for downstream subscribers.
//!
//! Pure and deterministic like the graph crate: no IO, no async, driven by
//! an external tick callback.

pub mod context;
pub mod frame_state;

pub use context::{ApplyResult, ContextEvent, ContextSynchronizer, SyncConfig};
pub use frame_state::{FrameState, FrameStateError};
