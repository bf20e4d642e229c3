//! Outbound request envelopes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{ProtocolError, Result};

/// Client-generated correlation id attached to a request and echoed in
/// its response.
///
/// Uniqueness comes from UUID v4 generation. While a subscription is
/// being established its tag is both in flight and registered; the
/// in-flight correlator claims the confirmation frame, the subscription
/// every later frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientTag(String);

impl ClientTag {
    /// Generate a fresh unique tag.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Tag value as it appears on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ClientTag {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for ClientTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Request kind carried in the `CommuniqueType` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommuniqueType {
    /// Read the resource at the target URL.
    ReadRequest,
    /// Update the resource at the target URL.
    UpdateRequest,
    /// Create a sub-resource under the target URL.
    CreateRequest,
    /// Execute a command against the target URL.
    ExecuteRequest,
    /// Register for unsolicited updates from the target URL.
    SubscribeRequest,
    /// Tear down a previously registered subscription.
    UnsubscribeRequest,
}

/// Header of an outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MessageHeader {
    /// Correlation tag, echoed by the processor in the response.
    pub client_tag: ClientTag,

    /// Target resource URL, e.g. `/device/2/buttongroup`.
    pub url: String,

    /// Optional request sub-type, used by command-style messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_type: Option<String>,
}

/// One outbound protocol envelope.
///
/// Serializes to exactly one JSON object; the channel appends the line
/// terminator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Message {
    /// Request kind.
    pub communique_type: CommuniqueType,

    /// Routing and correlation header.
    pub header: MessageHeader,

    /// Optional request body, passed through as raw JSON.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

impl Message {
    /// Build a bodyless message for `url` with a fresh tag.
    pub fn new(communique_type: CommuniqueType, url: impl Into<String>) -> Self {
        Self {
            communique_type,
            header: MessageHeader {
                client_tag: ClientTag::generate(),
                url: url.into(),
                request_type: None,
            },
            body: None,
        }
    }

    /// Attach a request body.
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Serialize to one wire line, without the terminator.
    pub fn to_line(&self) -> Result<String> {
        serde_json::to_string(self).map_err(ProtocolError::UnencodableMessage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_serializes_wire_field_names() {
        let msg = Message {
            communique_type: CommuniqueType::ReadRequest,
            header: MessageHeader {
                client_tag: ClientTag::from("7".to_string()),
                url: "/device/2".to_string(),
                request_type: None,
            },
            body: None,
        };

        let line = msg.to_line().unwrap();
        assert_eq!(
            line,
            r#"{"CommuniqueType":"ReadRequest","Header":{"ClientTag":"7","Url":"/device/2"}}"#
        );
    }

    #[test]
    fn generated_tags_are_unique() {
        let a = ClientTag::generate();
        let b = ClientTag::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn body_round_trips_as_raw_json() {
        let msg = Message::new(CommuniqueType::UpdateRequest, "/zone/5/status")
            .with_body(serde_json::json!({"ZoneStatus": {"Level": 80}}));

        let line = msg.to_line().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["Body"]["ZoneStatus"]["Level"], 80);
    }
}
