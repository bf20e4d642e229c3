//! Connection manager.
//!
//! Composes the secure channel and frame decoder; owns request
//! correlation, the subscription registry, the reconnection policy, and
//! the pairing handshake.
//!
//! # State Machine
//!
//! ```text
//! Disconnected → Connecting → [PhysicalAccessPending] → Connected
//!       ↑                                                   │
//!       └───────────── disconnect / channel loss ───────────┘
//! ```
//!
//! A channel loss that was not requested through [`disconnect`] drains
//! in-flight requests and immediately reconnects; registered
//! subscriptions are replayed against the new channel before the
//! `Connect` event is broadcast, so subscribers never observe an update
//! gap.
//!
//! [`disconnect`]: LumenClient::disconnect

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use lumen_proto::{ClientTag, CommuniqueType, Message, Response, ResponseBody};
use tokio::sync::{Mutex, broadcast, mpsc, oneshot};

use crate::channel::{ChannelSignal, DISCONNECT_DEBOUNCE, FrameSink, SecureChannel};
use crate::endpoint::{CertificateBundle, ConnectionMode, Endpoint};
use crate::error::{ClientError, Result};
use crate::event::LumenEvent;
use crate::pairing;
use crate::transport::{TlsTransport, Transport};

/// How long a correlated request may wait for its response.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// How long an unauthenticated connection waits for the out-of-band
/// physical-access confirmation.
const PHYSICAL_ACCESS_TIMEOUT: Duration = Duration::from_secs(60);

/// Bound on the pairing CSR round trip.
const PAIRING_TIMEOUT: Duration = Duration::from_secs(5);

const PAIR_URL: &str = "/pair";
const EVENT_CAPACITY: usize = 64;

/// Connection manager lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No channel.
    Disconnected,
    /// Dial and TLS handshake in progress.
    Connecting,
    /// Handshake done on an unauthenticated channel; waiting for the
    /// processor to confirm physical access.
    PhysicalAccessPending,
    /// Ready for traffic.
    Connected,
}

type Listener = Arc<dyn Fn(Response) + Send + Sync>;

/// One correlated request awaiting its response. Exactly one resolution
/// per tag: response arrival, timeout, or forced drain.
struct InFlight {
    message: Message,
    resolver: oneshot::Sender<Result<Response>>,
}

/// One standing subscription. Survives reconnects until explicit
/// teardown; the stored message is re-issued verbatim on every
/// successful reconnect.
struct Subscription {
    tag: ClientTag,
    message: Message,
    listener: Listener,
}

struct Inner<T: Transport> {
    transport: T,
    endpoint: Endpoint,
    credentials: Option<CertificateBundle>,
    state: StdMutex<ConnectionState>,
    in_flight: StdMutex<HashMap<String, InFlight>>,
    subscriptions: StdMutex<Vec<Subscription>>,
    channel: Mutex<Option<Arc<SecureChannel>>>,
    events: broadcast::Sender<LumenEvent>,
    teardown: AtomicBool,
}

/// Client for one logical processor connection.
///
/// All I/O and timers run on tokio; the in-flight and subscription maps
/// are owned by this instance and serialized behind mutexes, preserving
/// single-writer semantics on a multi-threaded runtime.
pub struct LumenClient<T: Transport = TlsTransport> {
    inner: Arc<Inner<T>>,
}

// Handles share one connection; not derived so `T: Clone` is not
// required.
impl<T: Transport> Clone for LumenClient<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl LumenClient<TlsTransport> {
    /// Client for a paired processor on the default secure port.
    pub fn authenticated(host: impl Into<String>, bundle: CertificateBundle) -> Self {
        Self::with_transport(TlsTransport, Endpoint::authenticated(host), Some(bundle))
    }

    /// Client for an unpaired processor on the default pairing port.
    pub fn physical(host: impl Into<String>) -> Self {
        Self::with_transport(TlsTransport, Endpoint::physical(host), None)
    }

    /// Client for an arbitrary endpoint, e.g. a non-default port.
    pub fn with_endpoint(endpoint: Endpoint, credentials: Option<CertificateBundle>) -> Self {
        Self::with_transport(TlsTransport, endpoint, credentials)
    }
}

impl<T: Transport> LumenClient<T> {
    /// Client over a custom transport. Production code wants the
    /// [`TlsTransport`] constructors; tests inject in-memory transports.
    pub fn with_transport(
        transport: T,
        endpoint: Endpoint,
        credentials: Option<CertificateBundle>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                transport,
                endpoint,
                credentials,
                state: StdMutex::new(ConnectionState::Disconnected),
                in_flight: StdMutex::new(HashMap::new()),
                subscriptions: StdMutex::new(Vec::new()),
                channel: Mutex::new(None),
                events,
                teardown: AtomicBool::new(false),
            }),
        }
    }

    /// Subscribe to client events.
    pub fn events(&self) -> broadcast::Receiver<LumenEvent> {
        self.inner.events.subscribe()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.lock_state()
    }

    /// Open a channel to the processor.
    ///
    /// On unauthenticated endpoints this resolves only once the
    /// processor confirms physical access; authenticated endpoints skip
    /// that wait. Later channel losses reconnect automatically until
    /// [`disconnect`] is called.
    ///
    /// [`disconnect`]: Self::disconnect
    pub async fn connect(&self) -> Result<()> {
        if self.state() != ConnectionState::Disconnected {
            return Err(ClientError::AlreadyConnected);
        }
        self.inner.teardown.store(false, Ordering::SeqCst);
        let signals = self.inner.open_channel().await?;
        tokio::spawn(Inner::supervise(self.inner.clone(), signals));
        Ok(())
    }

    /// Tear the connection down.
    ///
    /// Force-rejects every in-flight request, clears the subscription
    /// table, closes the channel, suppresses automatic reconnect, and
    /// emits one terminal [`LumenEvent::Disconnect`].
    pub async fn disconnect(&self) {
        self.inner.teardown.store(true, Ordering::SeqCst);
        self.inner.drain_in_flight();
        self.inner.lock_subscriptions().clear();
        if let Some(channel) = self.inner.channel.lock().await.take() {
            channel.close().await;
        }
        self.inner.set_state(ConnectionState::Disconnected);
        let _ = self.inner.events.send(LumenEvent::Disconnect);
    }

    /// Send a correlated request and await its response.
    ///
    /// A request that receives no response within the request window
    /// resolves with a synthetic exception-bodied response carrying the
    /// message `"Request timeout"`, so callers handle every failure mode
    /// through the same body shape.
    pub async fn request(
        &self,
        communique_type: CommuniqueType,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Response> {
        self.require_authenticated()?;
        let mut message = Message::new(communique_type, url);
        if let Some(body) = body {
            message = message.with_body(body);
        }
        self.inner.dispatch(message).await
    }

    /// Read the resource at `url`.
    pub async fn read(&self, url: &str) -> Result<Response> {
        let response = self.request(CommuniqueType::ReadRequest, url, None).await?;
        reject_protocol_exception(response)
    }

    /// Update the resource at `url`.
    pub async fn update(&self, url: &str, body: serde_json::Value) -> Result<Response> {
        let response = self.request(CommuniqueType::UpdateRequest, url, Some(body)).await?;
        reject_protocol_exception(response)
    }

    /// Execute a command against `url`.
    pub async fn command(&self, url: &str, body: serde_json::Value) -> Result<()> {
        let response = self.request(CommuniqueType::CreateRequest, url, Some(body)).await?;
        if response.is_successful() {
            Ok(())
        } else {
            Err(ClientError::Protocol(failure_message(&response)))
        }
    }

    /// Register `listener` for updates from `url`.
    ///
    /// The subscription is removed again unless the processor accepts
    /// it; once accepted it survives reconnects without caller
    /// involvement: it is re-issued to every new channel, in original
    /// registration order, before the `Connect` event fires.
    pub async fn subscribe(
        &self,
        url: &str,
        listener: impl Fn(Response) + Send + Sync + 'static,
    ) -> Result<()> {
        self.require_authenticated()?;
        let message = Message::new(CommuniqueType::SubscribeRequest, url);
        let tag = message.header.client_tag.clone();

        // Installed before the send so updates decoded in the same
        // read chunk as the confirmation still reach the listener; the
        // pending correlator claims the confirmation frame itself.
        self.inner.lock_subscriptions().push(Subscription {
            tag: tag.clone(),
            message: message.clone(),
            listener: Arc::new(listener),
        });

        let accepted = match self.inner.dispatch(message).await {
            Ok(response) if response.is_successful() => Ok(()),
            Ok(response) => Err(ClientError::Protocol(failure_message(&response))),
            Err(e) => Err(e),
        };
        if accepted.is_err() {
            self.inner.lock_subscriptions().retain(|s| s.tag != tag);
        }
        accepted
    }

    /// Run the pairing handshake on an unauthenticated channel.
    ///
    /// Generates an RSA key pair and a certificate-signing request for
    /// the fixed client identity, submits it, and combines the issued
    /// certificate and root CA with the private key into a new
    /// [`CertificateBundle`]. Persisting the bundle is the caller's
    /// concern.
    pub async fn authenticate(&self) -> Result<CertificateBundle> {
        if self.inner.endpoint.mode != ConnectionMode::Physical {
            return Err(ClientError::Capability { required: "physical" });
        }

        // RSA key generation is CPU-heavy; keep it off the reactor.
        let identity = tokio::task::spawn_blocking(pairing::generate_identity)
            .await
            .map_err(|e| ClientError::Protocol(format!("key generation task failed: {e}")))??;

        let body = serde_json::json!({
            "CommandType": "CSR",
            "Parameters": {
                "CSR": identity.csr_pem,
                "DisplayName": pairing::CLIENT_IDENTITY,
                "Role": "Admin",
            }
        });
        let message = Message::new(CommuniqueType::ExecuteRequest, PAIR_URL).with_body(body);
        let tag = message.header.client_tag.clone();

        // The signing result may come back tagged or as an unsolicited
        // push, so watch both paths.
        let mut events = self.inner.events.subscribe();
        let resolved = self.inner.register_and_send(message).await?;

        let response = tokio::select! {
            direct = resolved => match direct {
                Ok(result) => result?,
                Err(_) => return Err(ClientError::Disconnected),
            },
            pushed = wait_for_signing(&mut events) => pushed?,
            () = tokio::time::sleep(PAIRING_TIMEOUT) => {
                self.inner.lock_in_flight().remove(tag.as_str());
                return Err(ClientError::HandshakeTimeout);
            }
        };
        self.inner.lock_in_flight().remove(tag.as_str());

        match response.body {
            Some(ResponseBody::SigningResult(signing)) => Ok(CertificateBundle {
                ca: signing.root_certificate,
                cert: signing.certificate,
                key: identity.key_pem,
            }),
            Some(ResponseBody::Exception(detail)) => Err(ClientError::Protocol(detail.message)),
            _ => Err(ClientError::Protocol("pairing response had no signing result".to_string())),
        }
    }

    fn require_authenticated(&self) -> Result<()> {
        if self.inner.endpoint.mode == ConnectionMode::Authenticated {
            Ok(())
        } else {
            Err(ClientError::Capability { required: "authenticated" })
        }
    }
}

impl<T: Transport> Inner<T> {
    fn lock_state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<String, InFlight>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_subscriptions(&self) -> MutexGuard<'_, Vec<Subscription>> {
        self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ConnectionState) {
        *self.lock_state() = state;
    }

    /// Dial, hand the stream to a new channel, and bring the connection
    /// to `Connected`: physical-access wait on unauthenticated
    /// endpoints, subscription replay on authenticated ones.
    async fn open_channel(self: &Arc<Self>) -> Result<mpsc::UnboundedReceiver<ChannelSignal>> {
        self.set_state(ConnectionState::Connecting);

        // Subscribed before the pump starts so the physical-access
        // signal cannot slip past.
        let mut events = self.events.subscribe();

        let dialed = self.transport.connect(&self.endpoint, self.credentials.as_ref()).await;
        let (stream, protocol) = match dialed {
            Ok(established) => established,
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(ClientError::Transport(e));
            }
        };
        tracing::debug!(host = %self.endpoint.host, %protocol, "channel established");

        let weak = Arc::downgrade(self);
        let on_frame: FrameSink = Arc::new(move |response| {
            if let Some(inner) = weak.upgrade() {
                inner.route_frame(response);
            }
        });
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let channel = Arc::new(SecureChannel::open(stream, on_frame, signal_tx));
        *self.channel.lock().await = Some(channel.clone());

        if self.endpoint.mode == ConnectionMode::Physical {
            self.set_state(ConnectionState::PhysicalAccessPending);
            if let Err(e) = wait_for_physical_access(&mut events).await {
                channel.close().await;
                *self.channel.lock().await = None;
                self.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        } else {
            self.replay_subscriptions().await;
        }

        self.set_state(ConnectionState::Connected);
        let _ = self.events.send(LumenEvent::Connect(protocol));
        Ok(signal_rx)
    }

    /// Consume lifecycle signals from the live channel; on a
    /// non-deliberate disconnect, drain and reconnect.
    async fn supervise(inner: Arc<Self>, mut signals: mpsc::UnboundedReceiver<ChannelSignal>) {
        loop {
            let lost = loop {
                match signals.recv().await {
                    Some(ChannelSignal::Disconnected) => break true,
                    Some(ChannelSignal::TimedOut) => {
                        let _ = inner.events.send(LumenEvent::Timeout);
                    }
                    Some(ChannelSignal::Fatal(description)) => {
                        tracing::error!(error = %description, "fatal channel error");
                        let _ = inner.events.send(LumenEvent::Error(description));
                    }
                    // All senders gone: the pump and monitor stopped
                    // without a debounced disconnect. Deliberate
                    // teardown owns its own event; anything else is a
                    // channel loss.
                    None => break !inner.teardown.load(Ordering::SeqCst),
                }
            };
            if !lost {
                return;
            }

            inner.drain_in_flight();
            *inner.channel.lock().await = None;
            inner.set_state(ConnectionState::Disconnected);
            if inner.teardown.load(Ordering::SeqCst) {
                return;
            }

            tracing::info!("connection lost, reconnecting");
            loop {
                match inner.open_channel().await {
                    Ok(new_signals) => {
                        signals = new_signals;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "reconnect attempt failed");
                        tokio::time::sleep(DISCONNECT_DEBOUNCE).await;
                        if inner.teardown.load(Ordering::SeqCst) {
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Route one decoded frame, called by the pump in exact stream
    /// order. A tag resolves a one-shot correlator and/or feeds a
    /// standing subscription; untagged frames broadcast as `Message`.
    fn route_frame(&self, response: Response) {
        let Some(tag) = response.header.client_tag.clone() else {
            let _ = self.events.send(LumenEvent::Message(response));
            return;
        };

        let pending = self.lock_in_flight().remove(tag.as_str());
        let listener = self
            .lock_subscriptions()
            .iter()
            .find(|s| s.tag == tag)
            .map(|s| s.listener.clone());

        match (pending, listener) {
            // Both present means this frame confirms a subscription:
            // it settles the correlator, and the listener only sees
            // later frames.
            (Some(entry), _) => {
                let _ = entry.resolver.send(Ok(response));
            }
            (None, Some(listener)) => listener(response),
            (None, None) => tracing::debug!(tag = %tag, "frame with unmatched tag"),
        }
    }

    /// Register the in-flight entry, then write. Registration precedes
    /// the write so a response cannot race past its resolver.
    async fn register_and_send(
        self: &Arc<Self>,
        message: Message,
    ) -> Result<oneshot::Receiver<Result<Response>>> {
        let tag = message.header.client_tag.clone();
        let (resolver, resolved) = oneshot::channel();
        {
            let mut in_flight = self.lock_in_flight();
            if let Some(stale) = in_flight.remove(tag.as_str()) {
                // Should not occur under UUID generation; defends the
                // registry against corruption.
                tracing::warn!(tag = %tag, "tag already in flight, evicting stale entry");
                let _ = stale.resolver.send(Err(ClientError::Superseded));
            }
            in_flight.insert(tag.to_string(), InFlight { message: message.clone(), resolver });
        }

        let channel = self.channel.lock().await.clone();
        let Some(channel) = channel else {
            self.lock_in_flight().remove(tag.as_str());
            return Err(ClientError::Disconnected);
        };
        if let Err(e) = channel.send(&message).await {
            self.lock_in_flight().remove(tag.as_str());
            return Err(ClientError::Transport(e));
        }
        Ok(resolved)
    }

    /// Send a correlated message and await resolution: response
    /// arrival, forced drain, or the request timeout (which resolves
    /// with a synthetic exception body rather than an error).
    async fn dispatch(self: &Arc<Self>, message: Message) -> Result<Response> {
        let tag = message.header.client_tag.clone();
        let resolved = self.register_and_send(message).await?;

        match tokio::time::timeout(REQUEST_TIMEOUT, resolved).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::Disconnected),
            Err(_) => {
                self.lock_in_flight().remove(tag.as_str());
                Ok(Response::exception(tag, "Request timeout"))
            }
        }
    }

    /// Re-issue every registered subscription against the new channel,
    /// in original registration order. Entries stay installed the whole
    /// time, so updates decoded alongside a confirmation are delivered;
    /// a refused replay is logged, never silently dropped.
    async fn replay_subscriptions(self: &Arc<Self>) {
        let messages: Vec<Message> =
            self.lock_subscriptions().iter().map(|s| s.message.clone()).collect();
        for message in messages {
            let url = message.header.url.clone();
            match self.dispatch(message).await {
                Ok(response) if response.is_successful() => {
                    tracing::debug!(%url, "subscription replayed");
                }
                Ok(response) => {
                    tracing::warn!(%url, status = ?response.header.status_code, "subscription replay refused");
                }
                Err(e) => {
                    tracing::warn!(%url, error = %e, "subscription replay failed");
                }
            }
        }
    }

    /// Settle every in-flight request; none is ever left hanging.
    fn drain_in_flight(&self) {
        let drained: Vec<InFlight> =
            self.lock_in_flight().drain().map(|(_, entry)| entry).collect();
        for entry in drained {
            tracing::debug!(url = %entry.message.header.url, "rejecting in-flight request");
            let _ = entry.resolver.send(Err(ClientError::Disconnected));
        }
    }
}

fn failure_message(response: &Response) -> String {
    if let Some(message) = response.exception_message() {
        return message.to_string();
    }
    match &response.header.status_code {
        Some(status) => format!("{} {}", status.code.map_or(0, |c| c), status.message),
        None => "request failed".to_string(),
    }
}

/// A server-reported exception rejects the call; responses without a
/// wire status (locally synthesized bodies) pass through for uniform
/// body handling by the caller.
fn reject_protocol_exception(response: Response) -> Result<Response> {
    if response.header.status_code.is_some() && !response.is_successful() {
        return Err(ClientError::Protocol(failure_message(&response)));
    }
    Ok(response)
}

async fn wait_for_physical_access(events: &mut broadcast::Receiver<LumenEvent>) -> Result<()> {
    let granted = async {
        loop {
            match events.recv().await {
                Ok(LumenEvent::Message(response)) => {
                    if let Some(ResponseBody::PairingStatus(status)) = &response.body {
                        if status.has_physical_access() {
                            tracing::info!("physical access granted");
                            return Ok(());
                        }
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return Err(ClientError::Disconnected),
            }
        }
    };
    tokio::time::timeout(PHYSICAL_ACCESS_TIMEOUT, granted)
        .await
        .map_err(|_| ClientError::PhysicalAccessTimeout)?
}

async fn wait_for_signing(events: &mut broadcast::Receiver<LumenEvent>) -> Result<Response> {
    loop {
        match events.recv().await {
            Ok(LumenEvent::Message(response)) => {
                if matches!(response.body, Some(ResponseBody::SigningResult(_))) {
                    return Ok(response);
                }
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => return Err(ClientError::Disconnected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChannelError;
    use tokio::io::DuplexStream;

    /// Hands out one duplex stream and keeps the far side alive so the
    /// channel stays open.
    struct StubTransport {
        stream: StdMutex<Option<DuplexStream>>,
        // Owned so the near side never sees EOF during the test.
        _keep_alive: StdMutex<Option<DuplexStream>>,
    }

    impl StubTransport {
        fn new() -> Self {
            let (near, far) = tokio::io::duplex(4096);
            Self {
                stream: StdMutex::new(Some(near)),
                _keep_alive: StdMutex::new(Some(far)),
            }
        }
    }

    impl Transport for StubTransport {
        type Stream = DuplexStream;

        async fn connect(
            &self,
            _endpoint: &Endpoint,
            _credentials: Option<&CertificateBundle>,
        ) -> std::result::Result<(Self::Stream, String), ChannelError> {
            let stream = self.stream.lock().unwrap().take().ok_or(ChannelError::Closed)?;
            Ok((stream, "test".to_string()))
        }
    }

    #[tokio::test]
    async fn duplicate_tag_evicts_and_supersedes_stale_entry() {
        let transport = StubTransport::new();
        let client = LumenClient::with_transport(
            transport,
            Endpoint::authenticated("processor.test"),
            None,
        );
        client.connect().await.unwrap();

        let first = Message::new(CommuniqueType::ReadRequest, "/zone/1/status");
        let mut second = Message::new(CommuniqueType::ReadRequest, "/zone/2/status");
        second.header.client_tag = first.header.client_tag.clone();

        let stale = client.inner.register_and_send(first).await.unwrap();
        let _fresh = client.inner.register_and_send(second).await.unwrap();

        let settled = stale.await.unwrap();
        assert!(matches!(settled, Err(ClientError::Superseded)));
        assert_eq!(client.inner.lock_in_flight().len(), 1);
    }
}
