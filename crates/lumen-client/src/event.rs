//! Client events.

use lumen_proto::Response;

/// Events broadcast by the connection manager.
///
/// Consumers obtain a receiver from [`crate::LumenClient::events`]; the
/// event contract is independent of any transport implementation.
#[derive(Debug, Clone)]
pub enum LumenEvent {
    /// The connection reached `Connected`. Carries the negotiated
    /// protocol name. On reconnects this fires only after every
    /// registered subscription has been replayed.
    Connect(String),

    /// The connection was deliberately torn down. Not emitted for
    /// transient drops, which reconnect silently.
    Disconnect,

    /// An untagged frame arrived: pairing signals and unsolicited
    /// pushes.
    Message(Response),

    /// The channel went quiet past the inactivity window. Does not by
    /// itself force a reconnect.
    Timeout,

    /// A fatal channel error that is not auto-recovered at this layer.
    Error(String),
}
