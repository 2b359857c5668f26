//! poselink-session: one endpoint of a two-party, topic-addressed message
//! channel. Envelope codec, handler table, request/response correlation,
//! and the open/connect/close lifecycle.

pub mod channel;
pub mod envelope;
pub mod error;
pub mod port;

pub use channel::{ChannelError, LoopbackChannel, MessageChannel, loopback_pair};
pub use envelope::Envelope;
pub use error::{ErrorPayload, SessionError};
pub use port::{ConnectionState, PendingReply, SessionEvent, SessionPort, TopicHandler};
