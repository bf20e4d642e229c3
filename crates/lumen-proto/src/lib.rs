//! Wire format for the Lumen processor control protocol.
//!
//! The protocol exchanges one JSON object per line over TLS. Outbound
//! [`Message`] envelopes carry a request kind, a client-generated
//! correlation tag and a target URL; inbound [`Response`] envelopes carry
//! a `"NNN text"` status, an optional echo of the tag, and a body nested
//! under a single type-name key.
//!
//! Decoding is split in two layers: [`FrameDecoder`] reassembles a byte
//! stream into complete lines regardless of chunk boundaries, and
//! [`Response`] decoding turns each line into a typed envelope with a
//! [`ResponseBody`] tagged union. Unrecognized body types are preserved
//! as [`ResponseBody::Unknown`] rather than dropped, so higher layers can
//! route payloads this crate has never heard of.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod body;
pub mod decoder;
pub mod errors;
pub mod message;
pub mod response;

pub use body::{ButtonEdge, ButtonStatus, ExceptionDetail, PairingStatus, ResponseBody, SigningResult};
pub use decoder::FrameDecoder;
pub use errors::{ProtocolError, Result};
pub use message::{ClientTag, CommuniqueType, Message, MessageHeader};
pub use response::{Response, ResponseHeader, StatusCode};
