//! Envelope codec: every message on a channel is a JSON array
//! `[correlation_id, topic, payload]`, with a trailing `true` when the
//! sender expects a response.

use serde_json::Value;

use crate::error::SessionError;

/// One decoded message.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Correlation id, unique per sending side.
    pub id: u64,
    pub topic: String,
    pub payload: Value,
    /// The sender is waiting on a `topic:resolve:<id>` / `topic:reject:<id>`
    /// reply.
    pub expects_response: bool,
}

impl Envelope {
    pub fn new(id: u64, topic: impl Into<String>, payload: Value) -> Self {
        Self {
            id,
            topic: topic.into(),
            payload,
            expects_response: false,
        }
    }

    pub fn expecting_response(mut self) -> Self {
        self.expects_response = true;
        self
    }

    pub fn encode(&self) -> String {
        let value = if self.expects_response {
            serde_json::json!([self.id, self.topic, self.payload, true])
        } else {
            serde_json::json!([self.id, self.topic, self.payload])
        };
        value.to_string()
    }

    /// Decode a raw message. Peers are not trusted: every malformation is a
    /// reported error, never a panic.
    pub fn decode(data: &str) -> Result<Self, SessionError> {
        let value: Value = serde_json::from_str(data)
            .map_err(|e| SessionError::MalformedEnvelope(e.to_string()))?;

        let items = value
            .as_array()
            .ok_or_else(|| SessionError::MalformedEnvelope("not an array".to_owned()))?;
        if items.len() < 3 || items.len() > 4 {
            return Err(SessionError::MalformedEnvelope(format!(
                "expected 3 or 4 elements, got {}",
                items.len()
            )));
        }

        let id = items[0]
            .as_u64()
            .ok_or_else(|| SessionError::MalformedEnvelope("id is not an integer".to_owned()))?;
        let topic = items[1]
            .as_str()
            .ok_or_else(|| SessionError::MalformedEnvelope("topic is not a string".to_owned()))?
            .to_owned();
        let expects_response = match items.get(3) {
            None => false,
            Some(Value::Bool(b)) => *b,
            Some(_) => {
                return Err(SessionError::MalformedEnvelope(
                    "response flag is not a bool".to_owned(),
                ));
            }
        };

        Ok(Self {
            id,
            topic,
            payload: items[2].clone(),
            expects_response,
        })
    }
}

// ─── Tests ────────────────────────────────────────────────────────
