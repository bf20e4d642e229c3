//! Typed response body union.
//!
//! The wire format nests payloads under a single type-name key, e.g.
//! `{"Body": {"SigningResult": {...}}}`. Decoding unwraps that key and
//! matches the type name against the known payload table; anything
//! unrecognized is preserved as [`ResponseBody::Unknown`].
//!
//! When a body object carries more than one key, only the first observed
//! key is decoded. This mirrors the processor's observed behavior; the
//! intended multi-key semantics are unknown.

use serde::{Deserialize, Serialize};

/// Server-side exception payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExceptionDetail {
    /// Human-readable failure description.
    pub message: String,
}

/// Permission set announced by the processor, used during pairing to
/// signal that physical access was granted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PairingStatus {
    /// Granted permission names.
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl PairingStatus {
    /// Whether the permission set includes physical access.
    pub fn has_physical_access(&self) -> bool {
        self.permissions.iter().any(|p| p == "PhysicalAccess")
    }
}

/// Issued certificate material returned by the pairing handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SigningResult {
    /// Client certificate issued for the submitted CSR, PEM text.
    pub certificate: String,
    /// Root CA of the processor, PEM text.
    pub root_certificate: String,
}

/// Keepalive probe reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PingResponse {
    /// Firmware service version reported by the processor.
    #[serde(default)]
    pub service_version: Option<String>,
}

/// Raw press/release edge of a physical button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ButtonEdge {
    /// Button went down.
    Press,
    /// Button came up.
    Release,
}

/// Button edge notification, fed to the gesture detector by the device
/// layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ButtonStatus {
    /// The raw edge that occurred.
    pub button_event: ButtonEdge,
}

/// Tagged union over all known payload shapes, keyed by the header's
/// `MessageBodyType` with the body key as fallback.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// Exception-shaped failure body.
    Exception(ExceptionDetail),
    /// Pairing permission announcement.
    PairingStatus(PairingStatus),
    /// Certificate material from a pairing CSR.
    SigningResult(SigningResult),
    /// Keepalive reply.
    Ping(PingResponse),
    /// Raw button edge.
    ButtonStatus(ButtonStatus),
    /// Anything this crate does not model, payload preserved verbatim.
    Unknown {
        /// Type name as observed on the wire.
        type_name: String,
        /// Undecoded payload.
        value: serde_json::Value,
    },
}

impl ResponseBody {
    /// Decode a raw body value.
    ///
    /// Returns `None` when the body is absent in spirit: not an object,
    /// or an object with no keys. The type name comes from the header's
    /// `MessageBodyType` when present, else the first observed body key.
    pub fn decode(message_body_type: Option<&str>, value: serde_json::Value) -> Option<Self> {
        let serde_json::Value::Object(map) = value else {
            return None;
        };
        let (first_key, inner) = map.into_iter().next()?;
        let type_name = message_body_type.unwrap_or(first_key.as_str());

        let known = match type_name {
            "ExceptionDetail" => {
                serde_json::from_value(inner.clone()).map(Self::Exception).ok()
            }
            "Status" | "PairingStatus" => {
                serde_json::from_value(inner.clone()).map(Self::PairingStatus).ok()
            }
            "SigningResult" => {
                serde_json::from_value(inner.clone()).map(Self::SigningResult).ok()
            }
            "PingResponse" => serde_json::from_value(inner.clone()).map(Self::Ping).ok(),
            "ButtonStatus" => {
                serde_json::from_value(inner.clone()).map(Self::ButtonStatus).ok()
            }
            _ => None,
        };

        Some(known.unwrap_or(Self::Unknown { type_name: type_name.to_string(), value: inner }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn one_key_body_unwraps_to_value() {
        let body = ResponseBody::decode(
            None,
            json!({"ExceptionDetail": {"Message": "no such url"}}),
        );
        assert_eq!(
            body,
            Some(ResponseBody::Exception(ExceptionDetail { message: "no such url".to_string() }))
        );
    }

    #[test]
    fn empty_body_is_absent() {
        assert_eq!(ResponseBody::decode(None, json!({})), None);
        assert_eq!(ResponseBody::decode(None, json!(null)), None);
    }

    #[test]
    fn multi_key_body_takes_first_observed_key() {
        let body = ResponseBody::decode(
            None,
            json!({"PingResponse": {"ServiceVersion": "1.1"}, "Other": 3}),
        );
        assert_eq!(
            body,
            Some(ResponseBody::Ping(PingResponse { service_version: Some("1.1".to_string()) }))
        );
    }

    #[test]
    fn header_type_wins_over_body_key() {
        let body = ResponseBody::decode(
            Some("Status"),
            json!({"WhateverWrapper": {"Permissions": ["PhysicalAccess"]}}),
        );
        match body {
            Some(ResponseBody::PairingStatus(status)) => assert!(status.has_physical_access()),
            other => panic!("expected pairing status, got {other:?}"),
        }
    }

    #[test]
    fn unrecognized_type_is_preserved_as_unknown() {
        let body = ResponseBody::decode(None, json!({"OneZoneStatus": {"Level": 75}}));
        match body {
            Some(ResponseBody::Unknown { type_name, value }) => {
                assert_eq!(type_name, "OneZoneStatus");
                assert_eq!(value["Level"], 75);
            }
            other => panic!("expected unknown body, got {other:?}"),
        }
    }

    #[test]
    fn button_edges_decode() {
        let body = ResponseBody::decode(None, json!({"ButtonStatus": {"ButtonEvent": "Press"}}));
        assert_eq!(
            body,
            Some(ResponseBody::ButtonStatus(ButtonStatus { button_event: ButtonEdge::Press }))
        );
    }
}
