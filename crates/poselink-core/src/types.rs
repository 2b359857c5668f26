use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

// ─── Peer Role ────────────────────────────────────────────────────

/// Role a peer declares during the session handshake.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    /// Arbitrates providers and fans state out to other peers.
    Manager,
    /// Consumes world state without supplying it.
    #[default]
    Augmenter,
    /// Supplies frame snapshots (a world-description provider).
    Viewer,
}

impl PeerRole {
    pub const ALL: [Self; 3] = [Self::Manager, Self::Augmenter, Self::Viewer];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manager => "manager",
            Self::Augmenter => "augmenter",
            Self::Viewer => "viewer",
        }
    }
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeerRole {
    type Err = PoselinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "manager" => Ok(Self::Manager),
            "augmenter" => Ok(Self::Augmenter),
            "viewer" => Ok(Self::Viewer),
            _ => Err(PoselinkError::InvalidRole(s.to_owned())),
        }
    }
}

// ─── Session Configuration ────────────────────────────────────────

/// Capabilities a peer advertises in its `session.open` handshake payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub role: PeerRole,
    /// Protocol extensions this peer understands, by name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub protocols: Vec<String>,
    /// Opaque application data carried alongside the handshake.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub user_data: Value,
}

impl SessionConfig {
    pub fn new(role: PeerRole) -> Self {
        Self {
            role,
            protocols: Vec::new(),
            user_data: Value::Null,
        }
    }

    pub fn with_user_data(mut self, user_data: Value) -> Self {
        self.user_data = user_data;
        self
    }
}

// ─── Reference Frame ──────────────────────────────────────────────

/// Wire constant for the well-known fixed/global frame.
pub const FIXED_FRAME_WIRE: u64 = 0;

/// The coordinate frame a position/orientation is expressed in.
///
/// On the wire this is either a numeric well-known constant (`0` for the
/// fixed/global frame) or an entity id string.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub enum FrameRef {
    /// The well-known fixed/global frame.
    #[default]
    Fixed,
    /// The frame defined by another entity's pose.
    Entity(String),
}

impl FrameRef {
    pub fn entity(id: impl Into<String>) -> Self {
        Self::Entity(id.into())
    }

    /// Entity id if this frame is entity-relative.
    pub fn entity_id(&self) -> Option<&str> {
        match self {
            Self::Fixed => None,
            Self::Entity(id) => Some(id),
        }
    }

    pub fn to_wire(&self) -> Value {
        match self {
            Self::Fixed => Value::from(FIXED_FRAME_WIRE),
            Self::Entity(id) => Value::from(id.as_str()),
        }
    }

    pub fn from_wire(value: &Value) -> Result<Self, PoselinkError> {
        match value {
            Value::Number(n) if n.as_u64() == Some(FIXED_FRAME_WIRE) => Ok(Self::Fixed),
            Value::Number(n) => Err(PoselinkError::InvalidFrameRef(n.to_string())),
            Value::String(id) => Ok(Self::Entity(id.clone())),
            other => Err(PoselinkError::InvalidFrameRef(other.to_string())),
        }
    }
}

impl fmt::Display for FrameRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed => f.write_str("fixed"),
            Self::Entity(id) => write!(f, "entity:{id}"),
        }
    }
}

impl Serialize for FrameRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Fixed => serializer.serialize_u64(FIXED_FRAME_WIRE),
            Self::Entity(id) => serializer.serialize_str(id),
        }
    }
}

impl<'de> Deserialize<'de> for FrameRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_wire(&value).map_err(D::Error::custom)
    }
}

// ─── Pose Status ──────────────────────────────────────────────────

/// Bitmask describing the resolvability of a pose at query time.
///
/// `KNOWN` is level-triggered (set whenever the pose currently resolves);
/// `FOUND` and `LOST` are edge-triggered transition flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoseStatus(u8);

impl PoseStatus {
    pub const NONE: Self = Self(0);
    /// The pose currently resolves.
    pub const KNOWN: Self = Self(1);
    /// The pose flipped from unresolved to resolved since the last query.
    pub const FOUND: Self = Self(2);
    /// The pose flipped from resolved to unresolved since the last query.
    pub const LOST: Self = Self(4);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for PoseStatus {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

// ─── Error ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoselinkError {
    InvalidRole(String),
    InvalidFrameRef(String),
    MalformedPose(String),
    NonFiniteValue(String),
}

impl fmt::Display for PoselinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRole(s) => write!(f, "unknown peer role: {s}"),
            Self::InvalidFrameRef(s) => write!(f, "invalid frame reference: {s}"),
            Self::MalformedPose(msg) => write!(f, "malformed serialized pose: {msg}"),
            Self::NonFiniteValue(field) => write!(f, "non-finite value in field: {field}"),
        }
    }
}

impl std::error::Error for PoselinkError {}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serde_roundtrip() {
        for role in PeerRole::ALL {
            let json = serde_json::to_string(&role).expect("serialize");
            let back: PeerRole = serde_json::from_str(&json).expect("deserialize");
            assert_eq!(role, back);
        }
    }

    #[test]
    fn role_display_and_parse() {
        for role in PeerRole::ALL {
            let s = role.to_string();
            let parsed = s.parse::<PeerRole>().expect("parse");
            assert_eq!(role, parsed);
        }
    }

    #[test]
    fn role_parse_unknown_fails() {
        let err = "spectator".parse::<PeerRole>().unwrap_err();
        assert!(err.to_string().contains("spectator"));
    }

    #[test]
    fn session_config_serde_roundtrip() {
        let config = SessionConfig::new(PeerRole::Manager)
            .with_user_data(serde_json::json!({"x": 1}));
        let json = serde_json::to_string(&config).expect("serialize");
        let back: SessionConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(config, back);
    }

    #[test]
    fn session_config_default_user_data_omitted() {
        let config = SessionConfig::new(PeerRole::Augmenter);
        let json = serde_json::to_string(&config).expect("serialize");
        assert!(!json.contains("user_data"));
    }

    #[test]
    fn frame_ref_wire_fixed_is_zero() {
        assert_eq!(FrameRef::Fixed.to_wire(), serde_json::json!(0));
        assert_eq!(
            FrameRef::from_wire(&serde_json::json!(0)).expect("fixed"),
            FrameRef::Fixed
        );
    }

    #[test]
    fn frame_ref_wire_entity_is_string() {
        let frame = FrameRef::entity("anchor-1");
        assert_eq!(frame.to_wire(), serde_json::json!("anchor-1"));
        assert_eq!(
            FrameRef::from_wire(&serde_json::json!("anchor-1")).expect("entity"),
            frame
        );
    }

    #[test]
    fn frame_ref_unknown_numeric_rejected() {
        assert!(FrameRef::from_wire(&serde_json::json!(7)).is_err());
        assert!(FrameRef::from_wire(&serde_json::json!([1, 2])).is_err());
    }

    #[test]
    fn pose_status_bit_operations() {
        let mut status = PoseStatus::NONE;
        assert!(status.is_empty());
        status.insert(PoseStatus::KNOWN);
        status.insert(PoseStatus::FOUND);
        assert!(status.contains(PoseStatus::KNOWN));
        assert!(status.contains(PoseStatus::FOUND));
        assert!(!status.contains(PoseStatus::LOST));
        assert_eq!(status, PoseStatus::KNOWN | PoseStatus::FOUND);
    }

    #[test]
    fn pose_status_serde_is_numeric() {
        let status = PoseStatus::KNOWN | PoseStatus::LOST;
        let json = serde_json::to_string(&status).expect("serialize");
        assert_eq!(json, "5");
    }
}
