//! Serialized pose wire shape: `{p, o, r}` with zero/identity sentinels.
//!
//! The sentinel `0` stands in for a zero position or identity orientation so
//! the common "entity at its frame's origin" case costs three bytes instead
//! of a full vector/quaternion.

use glam::{DQuat, DVec3};
use serde::de::Error as _;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::types::{FrameRef, PoselinkError};

// ─── Position ─────────────────────────────────────────────────────

/// Wire form of a position: `0` (origin sentinel) or `{x, y, z}`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WirePosition {
    Origin,
    Value(DVec3),
}

impl WirePosition {
    pub fn from_vec(v: DVec3) -> Self {
        if v == DVec3::ZERO {
            Self::Origin
        } else {
            Self::Value(v)
        }
    }

    pub fn vec(self) -> DVec3 {
        match self {
            Self::Origin => DVec3::ZERO,
            Self::Value(v) => v,
        }
    }

    pub fn is_finite(self) -> bool {
        match self {
            Self::Origin => true,
            Self::Value(v) => v.is_finite(),
        }
    }
}

impl Serialize for WirePosition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Origin => serializer.serialize_u64(0),
            Self::Value(v) => {
                let mut s = serializer.serialize_struct("WirePosition", 3)?;
                s.serialize_field("x", &v.x)?;
                s.serialize_field("y", &v.y)?;
                s.serialize_field("z", &v.z)?;
                s.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for WirePosition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        match &value {
            Value::Number(n) if n.as_f64() == Some(0.0) => Ok(Self::Origin),
            Value::Object(map) => {
                let x = field_f64(map, "x").map_err(D::Error::custom)?;
                let y = field_f64(map, "y").map_err(D::Error::custom)?;
                let z = field_f64(map, "z").map_err(D::Error::custom)?;
                Ok(Self::Value(DVec3::new(x, y, z)))
            }
            other => Err(D::Error::custom(PoselinkError::MalformedPose(format!(
                "expected 0 or {{x,y,z}}, got {other}"
            )))),
        }
    }
}

// ─── Orientation ──────────────────────────────────────────────────

/// Wire form of an orientation: `0` (identity sentinel) or `{x, y, z, w}`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WireOrientation {
    Identity,
    Value(DQuat),
}

impl WireOrientation {
    pub fn from_quat(q: DQuat) -> Self {
        if q == DQuat::IDENTITY {
            Self::Identity
        } else {
            Self::Value(q)
        }
    }

    pub fn quat(self) -> DQuat {
        match self {
            Self::Identity => DQuat::IDENTITY,
            Self::Value(q) => q,
        }
    }

    pub fn is_finite(self) -> bool {
        match self {
            Self::Identity => true,
            Self::Value(q) => q.is_finite(),
        }
    }
}

impl Serialize for WireOrientation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Identity => serializer.serialize_u64(0),
            Self::Value(q) => {
                let mut s = serializer.serialize_struct("WireOrientation", 4)?;
                s.serialize_field("x", &q.x)?;
                s.serialize_field("y", &q.y)?;
                s.serialize_field("z", &q.z)?;
                s.serialize_field("w", &q.w)?;
                s.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for WireOrientation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        match &value {
            Value::Number(n) if n.as_f64() == Some(0.0) => Ok(Self::Identity),
            Value::Object(map) => {
                let x = field_f64(map, "x").map_err(D::Error::custom)?;
                let y = field_f64(map, "y").map_err(D::Error::custom)?;
                let z = field_f64(map, "z").map_err(D::Error::custom)?;
                let w = field_f64(map, "w").map_err(D::Error::custom)?;
                Ok(Self::Value(DQuat::from_xyzw(x, y, z, w)))
            }
            other => Err(D::Error::custom(PoselinkError::MalformedPose(format!(
                "expected 0 or {{x,y,z,w}}, got {other}"
            )))),
        }
    }
}

fn field_f64(
    map: &serde_json::Map<String, Value>,
    key: &str,
) -> Result<f64, PoselinkError> {
    map.get(key)
        .and_then(Value::as_f64)
        .ok_or_else(|| PoselinkError::MalformedPose(format!("missing numeric field {key}")))
}

// ─── Serialized Pose ──────────────────────────────────────────────

/// One entity's pose as carried inside a frame snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedPose {
    /// Position in frame `r`, or the origin sentinel.
    pub p: WirePosition,
    /// Orientation in frame `r`, or the identity sentinel.
    pub o: WireOrientation,
    /// Reference frame: numeric well-known constant or entity id.
    pub r: FrameRef,
}

impl SerializedPose {
    pub fn new(position: DVec3, orientation: DQuat, frame: FrameRef) -> Self {
        Self {
            p: WirePosition::from_vec(position),
            o: WireOrientation::from_quat(orientation),
            r: frame,
        }
    }

    /// Pose at a frame's origin with identity rotation.
    pub fn at_origin(frame: FrameRef) -> Self {
        Self {
            p: WirePosition::Origin,
            o: WireOrientation::Identity,
            r: frame,
        }
    }

    /// All numeric fields are finite. Snapshots failing this check must be
    /// rejected before they reach the entity graph.
    pub fn is_finite(&self) -> bool {
        self.p.is_finite() && self.o.is_finite()
    }
}

// ─── Tests ────────────────────────────────────────────────────────
