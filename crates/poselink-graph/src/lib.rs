//! poselink-graph: the reference-frame pose graph. Entities with
//! constant or time-sampled position/orientation properties, ancestor-chain
//! resolution into arbitrary target frames, and edge-triggered
//! known/found/lost pose status.
//!
//! Pure and deterministic: no IO, no async, all time passed in as
//! parameters.

pub mod entity;
pub mod graph;
pub mod property;

pub use entity::Entity;
pub use graph::{EntityGraph, GraphConfig, Pose};
pub use property::{FrameProperty, Interpolate, PropertyValue, SampleRing};
