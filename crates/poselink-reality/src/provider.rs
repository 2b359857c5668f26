//! Provider descriptors and the registration boundary through which a
//! provider type opens its own session.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use poselink_session::MessageChannel;

use crate::error::RealityError;

/// What a peer asks for when it declares a desired provider: a registered
/// type name plus type-specific options the selector never interprets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub options: Value,
}

impl ProviderDescriptor {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            options: Value::Null,
        }
    }

    pub fn with_options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }
}

/// One registered provider type. The handler owns the provider's side of
/// the link: it must open its own session on the endpoint it is handed.
pub trait ProviderHandler {
    fn connect(
        &mut self,
        descriptor: &ProviderDescriptor,
        endpoint: Box<dyn MessageChannel>,
    ) -> Result<(), RealityError>;
}

// ─── Tests ────────────────────────────────────────────────────────
