//! Reserved and domain topic names, plus the synthetic reply-topic scheme
//! used for request/response correlation.

// ─── Reserved Topics ──────────────────────────────────────────────

/// Handshake; payload is the sender's `SessionConfig`.
pub const SESSION_OPEN: &str = "session.open";
/// Orderly shutdown; no payload.
pub const SESSION_CLOSE: &str = "session.close";
/// Error surfaced to the peer; payload is an `ErrorPayload`.
pub const SESSION_ERROR: &str = "session.error";

// ─── Domain Topics ────────────────────────────────────────────────

/// Provider pushes one frame snapshot per tick on this topic.
pub const REALITY_FRAME_STATE: &str = "reality.frameState";
/// Manager pushes the filtered per-subscriber frame state on this topic.
pub const CONTEXT_UPDATE: &str = "context.update";
/// Peer registers interest in an entity id; payload `{"id": <string>}`.
pub const CONTEXT_SUBSCRIBE: &str = "context.subscribe";
/// Peer drops interest in an entity id; payload `{"id": <string>}`.
pub const CONTEXT_UNSUBSCRIBE: &str = "context.unsubscribe";
/// Peer declares the provider it would like active; payload is a provider
/// descriptor, or null to withdraw the desire.
pub const REALITY_DESIRED: &str = "reality.desired";

// ─── Reply Topics ─────────────────────────────────────────────────

const RESOLVE_MARKER: &str = ":resolve:";
const REJECT_MARKER: &str = ":reject:";

/// Outcome half of a synthetic reply topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Resolve,
    Reject,
}

/// Synthetic topic that resolves request `id` made on `topic`.
pub fn resolve_topic(topic: &str, id: u64) -> String {
    format!("{topic}{RESOLVE_MARKER}{id}")
}

/// Synthetic topic that rejects request `id` made on `topic`.
pub fn reject_topic(topic: &str, id: u64) -> String {
    format!("{topic}{REJECT_MARKER}{id}")
}

/// Split a reply topic into (base topic, kind, request id).
///
/// Returns `None` for ordinary topics. The trailing id must be a bare
/// integer; anything else is treated as an ordinary topic name.
pub fn parse_reply_topic(topic: &str) -> Option<(&str, ReplyKind, u64)> {
    for (marker, kind) in [
        (RESOLVE_MARKER, ReplyKind::Resolve),
        (REJECT_MARKER, ReplyKind::Reject),
    ] {
        if let Some(at) = topic.rfind(marker) {
            let base = &topic[..at];
            let id = topic[at + marker.len()..].parse::<u64>().ok()?;
            return Some((base, kind, id));
        }
    }
    None
}

// ─── Tests ────────────────────────────────────────────────────────
