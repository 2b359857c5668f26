use glam::{DQuat, DVec3};

use crate::property::FrameProperty;

/// An identified point of reference.
///
/// The graph owns entities by id. An entity never owns its reference frame;
/// the position property's frame defines the graph topology, and frames are
/// referenced by id only.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: String,
    pub name: Option<String>,
    pub position: FrameProperty<DVec3>,
    pub orientation: FrameProperty<DQuat>,
}

impl Entity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            position: FrameProperty::undefined(),
            orientation: FrameProperty::undefined(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Whether either pose component currently carries a value.
    pub fn has_defined_pose(&self) -> bool {
        self.position.value.is_defined() || self.orientation.value.is_defined()
    }
}

// ─── Tests ────────────────────────────────────────────────────────
