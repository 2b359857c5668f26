//! poselink-core: shared vocabulary for the poselink peers.
//! Peer roles, session configuration, reference-frame constants, the
//! pose-status bitmask, reserved/domain topic names, and the serialized
//! pose wire shape.

pub mod topics;
pub mod types;
pub mod wire;

pub use types::{FrameRef, PeerRole, PoseStatus, PoselinkError, SessionConfig};
pub use wire::{SerializedPose, WireOrientation, WirePosition};
