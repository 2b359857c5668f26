//! One tick's complete serialized world update, as published by the active
//! provider and re-published (filtered) to subscribers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use poselink_core::wire::SerializedPose;

/// Validation failure for an inbound frame state. Malformed numerics are
/// rejected here, before anything reaches the graph.
#[derive(Debug, Error, PartialEq)]
pub enum FrameStateError {
    #[error("frame time is not finite")]
    NonFiniteTime,
    #[error("pose for entity '{0}' contains a non-finite value")]
    NonFinitePose(String),
}

/// Immutable-per-tick record: monotonic frame index, absolute time, an
/// opaque viewport description, and a map from entity id to serialized pose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameState {
    pub frame_number: u64,
    pub time: f64,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub view: serde_json::Value,
    #[serde(default)]
    pub entities: HashMap<String, SerializedPose>,
}

impl FrameState {
    pub fn new(frame_number: u64, time: f64) -> Self {
        Self {
            frame_number,
            time,
            view: serde_json::Value::Null,
            entities: HashMap::new(),
        }
    }

    pub fn with_entity(mut self, id: impl Into<String>, pose: SerializedPose) -> Self {
        self.entities.insert(id.into(), pose);
        self
    }

    /// Every numeric field must be finite.
    pub fn validate(&self) -> Result<(), FrameStateError> {
        if !self.time.is_finite() {
            return Err(FrameStateError::NonFiniteTime);
        }
        for (id, pose) in &self.entities {
            if !pose.is_finite() {
                return Err(FrameStateError::NonFinitePose(id.clone()));
            }
        }
        Ok(())
    }
}

// ─── Tests ────────────────────────────────────────────────────────
