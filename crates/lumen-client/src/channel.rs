//! Secure channel: one established connection with framing and liveness
//! monitoring.
//!
//! The channel owns a read pump that feeds the frame decoder and hands
//! every decoded frame to the connection manager in arrival order, and
//! an idle monitor that sends keepalive probes and reports inactivity.
//! Socket-level failures are classified here: transient network errors
//! and socket close surface as a debounced `Disconnected` signal, quiet
//! periods as `TimedOut`, everything else as `Fatal`.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};

use lumen_proto::{CommuniqueType, FrameDecoder, Message, Response};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::error::ChannelError;

/// Delay before a socket close or transient error surfaces as a
/// disconnect, so a deliberate `close()` racing in can suppress it.
pub(crate) const DISCONNECT_DEBOUNCE: Duration = Duration::from_secs(1);

/// Quiet period after which the channel reports a timeout.
const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(30);

/// Idle time before the first keepalive probe, and between probes.
const KEEPALIVE_DELAY: Duration = Duration::from_secs(10);

const PING_URL: &str = "/server/status/ping";
const READ_CHUNK: usize = 4096;

/// Lifecycle signals from the channel to the connection manager. Frames
/// do not travel this path; they are routed synchronously by the pump.
#[derive(Debug)]
pub(crate) enum ChannelSignal {
    /// The socket closed or hit a transient network error (debounced).
    Disconnected,
    /// Inactivity or an `ETIMEDOUT`-class socket error.
    TimedOut,
    /// Unclassified socket error; not auto-recovered at this layer.
    Fatal(String),
}

/// Sink invoked by the read pump for every decoded frame.
pub(crate) type FrameSink = Arc<dyn Fn(Response) + Send + Sync>;

type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;
type SharedInstant = Arc<StdMutex<Instant>>;

/// One live connection.
pub(crate) struct SecureChannel {
    writer: Arc<Mutex<BoxedWriter>>,
    closed: Arc<AtomicBool>,
    pump: JoinHandle<()>,
    monitor: JoinHandle<()>,
}

impl SecureChannel {
    /// Take ownership of an established stream and start the read pump
    /// and idle monitor.
    pub(crate) fn open<S>(
        stream: S,
        on_frame: FrameSink,
        signals: mpsc::UnboundedSender<ChannelSignal>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let writer: Arc<Mutex<BoxedWriter>> = Arc::new(Mutex::new(Box::new(write_half)));
        let closed = Arc::new(AtomicBool::new(false));
        let last_activity: SharedInstant = Arc::new(StdMutex::new(Instant::now()));

        let pump = tokio::spawn(pump(
            read_half,
            on_frame,
            signals.clone(),
            closed.clone(),
            last_activity.clone(),
        ));
        let monitor =
            tokio::spawn(monitor(writer.clone(), last_activity, signals, closed.clone()));

        Self { writer, closed, pump, monitor }
    }

    /// Serialize `message` to one line and write it.
    pub(crate) async fn send(&self, message: &Message) -> Result<(), ChannelError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }
        let mut line = message.to_line()?;
        line.push_str("\r\n");

        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await.map_err(ChannelError::Write)?;
        writer.flush().await.map_err(ChannelError::Write)
    }

    /// Half-close then tear down; idempotent. Suppresses the pending
    /// disconnect debounce.
    pub(crate) async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut writer = self.writer.lock().await;
            let _ = writer.shutdown().await;
        }
        self.pump.abort();
        self.monitor.abort();
    }
}

fn touch(last_activity: &SharedInstant) {
    *last_activity.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
}

fn idle_for(last_activity: &SharedInstant) -> Duration {
    last_activity.lock().unwrap_or_else(PoisonError::into_inner).elapsed()
}

fn is_transient(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::NotFound
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable
    )
}

/// Wait out the debounce window, then report a disconnect unless the
/// channel was deliberately closed in the meantime.
async fn debounced_disconnect(
    closed: &AtomicBool,
    signals: &mpsc::UnboundedSender<ChannelSignal>,
) {
    tokio::time::sleep(DISCONNECT_DEBOUNCE).await;
    if !closed.load(Ordering::SeqCst) {
        let _ = signals.send(ChannelSignal::Disconnected);
    }
}

async fn pump<R>(
    mut reader: R,
    on_frame: FrameSink,
    signals: mpsc::UnboundedSender<ChannelSignal>,
    closed: Arc<AtomicBool>,
    last_activity: SharedInstant,
) where
    R: AsyncRead + Unpin,
{
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::debug!("socket closed by peer");
                debounced_disconnect(&closed, &signals).await;
                break;
            }
            Ok(n) => {
                touch(&last_activity);
                for frame in decoder.feed(&buf[..n]) {
                    match frame {
                        Ok(response) => on_frame(response),
                        Err(e) => tracing::warn!(error = %e, "dropping malformed frame"),
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                let _ = signals.send(ChannelSignal::TimedOut);
                break;
            }
            Err(e) if is_transient(e.kind()) => {
                tracing::debug!(error = %e, "transient socket error");
                debounced_disconnect(&closed, &signals).await;
                break;
            }
            Err(e) => {
                if !closed.load(Ordering::SeqCst) {
                    let _ = signals.send(ChannelSignal::Fatal(e.to_string()));
                }
                break;
            }
        }
    }
    closed.store(true, Ordering::SeqCst);
}

/// Idle watchdog: probes the processor after `KEEPALIVE_DELAY` of
/// silence and reports a timeout once the quiet period reaches
/// `INACTIVITY_TIMEOUT`.
async fn monitor(
    writer: Arc<Mutex<BoxedWriter>>,
    last_activity: SharedInstant,
    signals: mpsc::UnboundedSender<ChannelSignal>,
    closed: Arc<AtomicBool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last_ping: Option<Instant> = None;
    let mut timeout_reported = false;

    loop {
        ticker.tick().await;
        if closed.load(Ordering::SeqCst) {
            break;
        }

        let idle = idle_for(&last_activity);
        if idle >= INACTIVITY_TIMEOUT {
            if !timeout_reported {
                tracing::warn!(idle_secs = idle.as_secs(), "no data within inactivity window");
                let _ = signals.send(ChannelSignal::TimedOut);
                timeout_reported = true;
            }
            continue;
        }
        timeout_reported = false;

        let probe_due = last_ping.is_none_or(|t| t.elapsed() >= KEEPALIVE_DELAY);
        if idle >= KEEPALIVE_DELAY && probe_due {
            let ping = Message::new(CommuniqueType::ReadRequest, PING_URL);
            match ping.to_line() {
                Ok(mut line) => {
                    line.push_str("\r\n");
                    let mut w = writer.lock().await;
                    if let Err(e) = w.write_all(line.as_bytes()).await {
                        tracing::debug!(error = %e, "keepalive probe failed");
                    }
                }
                Err(e) => tracing::debug!(error = %e, "keepalive probe unencodable"),
            }
            last_ping = Some(Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_proto::ResponseBody;
    use std::sync::Mutex as TestMutex;

    fn collector() -> (FrameSink, Arc<TestMutex<Vec<Response>>>) {
        let seen = Arc::new(TestMutex::new(Vec::new()));
        let sink = seen.clone();
        let on_frame: FrameSink = Arc::new(move |r| sink.lock().unwrap().push(r));
        (on_frame, seen)
    }

    #[tokio::test]
    async fn frames_are_delivered_in_arrival_order() {
        let (client_side, mut server_side) = tokio::io::duplex(4096);
        let (on_frame, seen) = collector();
        let (tx, _rx) = mpsc::unbounded_channel();
        let channel = SecureChannel::open(client_side, on_frame, tx);

        let wire = concat!(
            r#"{"Header":{"StatusCode":"200 OK","ClientTag":"a"}}"#,
            "\r\n",
            r#"{"Header":{"StatusCode":"200 OK","ClientTag":"b"}}"#,
            "\r\n",
        );
        server_side.write_all(wire.as_bytes()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let tags: Vec<String> = seen
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.header.client_tag.clone().unwrap().to_string())
            .collect();
        assert_eq!(tags, ["a", "b"]);
        channel.close().await;
    }

    #[tokio::test]
    async fn peer_close_signals_disconnect_after_debounce() {
        let (client_side, server_side) = tokio::io::duplex(4096);
        let (on_frame, _seen) = collector();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _channel = SecureChannel::open(client_side, on_frame, tx);

        drop(server_side);
        let signal = tokio::time::timeout(Duration::from_secs(3), rx.recv()).await.unwrap();
        assert!(matches!(signal, Some(ChannelSignal::Disconnected)));
    }

    #[tokio::test]
    async fn deliberate_close_suppresses_disconnect_signal() {
        let (client_side, server_side) = tokio::io::duplex(4096);
        let (on_frame, _seen) = collector();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = SecureChannel::open(client_side, on_frame, tx);

        channel.close().await;
        drop(server_side);

        // The sender side is dropped without ever signalling.
        let signal = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert!(signal.is_none());
    }

    #[tokio::test]
    async fn send_after_close_is_rejected() {
        let (client_side, _server_side) = tokio::io::duplex(4096);
        let (on_frame, _seen) = collector();
        let (tx, _rx) = mpsc::unbounded_channel();
        let channel = SecureChannel::open(client_side, on_frame, tx);

        channel.close().await;
        let err = channel.send(&Message::new(CommuniqueType::ReadRequest, "/x")).await;
        assert!(matches!(err, Err(ChannelError::Closed)));
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped_not_fatal() {
        let (client_side, mut server_side) = tokio::io::duplex(4096);
        let (on_frame, seen) = collector();
        let (tx, _rx) = mpsc::unbounded_channel();
        let channel = SecureChannel::open(client_side, on_frame, tx);

        let wire = concat!(
            "garbage\r\n",
            r#"{"Header":{"StatusCode":"200 OK"},"Body":{"PingResponse":{}}}"#,
            "\r\n",
        );
        server_side.write_all(wire.as_bytes()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(matches!(seen[0].body, Some(ResponseBody::Ping(_))));
        drop(seen);
        channel.close().await;
    }
}
