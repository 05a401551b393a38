//! Topic-addressed publish/subscribe over loopback TCP.
//!
//! One [`Publisher`] binds an endpoint; any number of [`Subscriber`]s connect
//! and register topic prefixes. Each message is two length-prefixed frames,
//! topic first and body second, written with one call so they arrive as a unit.
//! Delivery is at-most-once: nothing is retained for peers that connect later,
//! and a peer whose write fails or stalls is dropped. Each peer has its own
//! bounded outbox drained by a writer thread, so [`Publisher::publish`] never
//! blocks on a socket.
//!
//! Frame: `[u32 LE length][bytes]`. Subscriber control frames carry
//! `[0x01 | 0x00][prefix bytes]` for subscribe / unsubscribe.

use crate::{Result, VrStateError};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Largest frame either side will accept.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

const FRAME_HEADER: usize = 4;
const CONTROL_SUBSCRIBE: u8 = 0x01;
const CONTROL_UNSUBSCRIBE: u8 = 0x00;

/// A stalled subscriber is dropped after this long.
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);
/// Poll period for threads that watch a stop flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);
/// Messages queued per peer before new ones are dropped for it.
const PEER_QUEUE_CAPACITY: usize = 64;

/// A `tcp://host:port` transport address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn parse(address: &str) -> Result<Endpoint> {
        let invalid = || VrStateError::InvalidAddress(address.to_string());
        let rest = address.trim().strip_prefix("tcp://").ok_or_else(invalid)?;
        let (host, port) = rest.rsplit_once(':').ok_or_else(invalid)?;
        let port: u16 = port.parse().map_err(|_| invalid())?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let host = match host {
            "" => return Err(invalid()),
            "*" => "0.0.0.0",
            h => h,
        };
        Ok(Endpoint {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "tcp://[{}]:{}", self.host, self.port)
        } else {
            write!(f, "tcp://{}:{}", self.host, self.port)
        }
    }
}

fn push_frame(out: &mut Vec<u8>, part: &[u8]) {
    out.extend_from_slice(&(part.len() as u32).to_le_bytes());
    out.extend_from_slice(part);
}

/// Encode one two-part message.
pub fn encode_message(topic: &str, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 * FRAME_HEADER + topic.len() + body.len());
    push_frame(&mut out, topic.as_bytes());
    push_frame(&mut out, body);
    out
}

/// Reassembles frames from arbitrarily split stream reads.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Total length (header included) of the frame starting at `offset`, if its header is in.
    fn frame_len(&self, offset: usize) -> Result<Option<usize>> {
        let Some(header) = self.buf.get(offset..offset + FRAME_HEADER) else {
            return Ok(None);
        };
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if len > MAX_FRAME_BYTES {
            return Err(VrStateError::MalformedPayload(format!(
                "frame of {} bytes exceeds limit",
                len
            )));
        }
        Ok(Some(FRAME_HEADER + len))
    }

    /// Pop one complete frame.
    pub fn pop_frame(&mut self) -> Result<Option<Vec<u8>>> {
        match self.frame_len(0)? {
            Some(total) if self.buf.len() >= total => {
                let frame = self.buf[FRAME_HEADER..total].to_vec();
                self.buf.drain(..total);
                Ok(Some(frame))
            }
            _ => Ok(None),
        }
    }

    /// Pop a topic/body pair once both frames are complete.
    pub fn pop_message(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let Some(first) = self.frame_len(0)? else {
            return Ok(None);
        };
        let Some(second) = self.frame_len(first)? else {
            return Ok(None);
        };
        if self.buf.len() < first + second {
            return Ok(None);
        }
        let topic = self.buf[FRAME_HEADER..first].to_vec();
        let body = self.buf[first + FRAME_HEADER..first + second].to_vec();
        self.buf.drain(..first + second);
        Ok(Some((topic, body)))
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

struct Peer {
    id: u64,
    stream: TcpStream,
    prefixes: Arc<Mutex<Vec<Vec<u8>>>>,
    outbox: Sender<Arc<[u8]>>,
}

impl Peer {
    fn wants(&self, topic: &[u8]) -> bool {
        lock(&self.prefixes)
            .iter()
            .any(|prefix| topic.starts_with(prefix))
    }
}

struct PublisherShared {
    peers: Mutex<Vec<Peer>>,
    stop: AtomicBool,
    next_id: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The single producer-side endpoint.
pub struct Publisher {
    shared: Arc<PublisherShared>,
    endpoint: Endpoint,
    acceptor: Option<JoinHandle<()>>,
}

impl Publisher {
    /// Bind `address` and start accepting subscribers in the background.
    pub fn bind(address: &str) -> Result<Publisher> {
        let requested = Endpoint::parse(address)?;
        let bind_err = |source| VrStateError::TransportBind {
            address: address.to_string(),
            source,
        };
        let listener = TcpListener::bind((requested.host.as_str(), requested.port))
            .map_err(bind_err)?;
        listener.set_nonblocking(true).map_err(bind_err)?;
        let port = listener.local_addr().map_err(bind_err)?.port();
        let endpoint = Endpoint {
            host: requested.host,
            port,
        };

        let shared = Arc::new(PublisherShared {
            peers: Mutex::new(Vec::new()),
            stop: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        });
        let accept_shared = shared.clone();
        let acceptor = std::thread::Builder::new()
            .name("vrstate-pub-accept".into())
            .spawn(move || accept_loop(listener, accept_shared))
            .map_err(|e| VrStateError::ThreadSpawn(format!("publisher acceptor: {}", e)))?;

        log::info!("Publisher bound to {}", endpoint);
        Ok(Publisher {
            shared,
            endpoint,
            acceptor: Some(acceptor),
        })
    }

    /// The bound endpoint, with the real port when bound to port 0.
    pub fn local_endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Queue `body` under `topic` for every peer subscribed to a matching prefix.
    ///
    /// Returns the number of peers the message was queued for. A peer whose
    /// outbox is full misses this message; a peer whose writer has died is dropped.
    pub fn publish(&self, topic: &str, body: &[u8]) -> usize {
        let message: Arc<[u8]> = encode_message(topic, body).into();
        let mut delivered = 0;
        let mut peers = lock(&self.shared.peers);
        peers.retain(|peer| {
            if !peer.wants(topic.as_bytes()) {
                return true;
            }
            match peer.outbox.try_send(message.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    log::trace!("Subscriber {} outbox full, dropping {}", peer.id, topic);
                    true
                }
                Err(TrySendError::Disconnected(_)) => {
                    let _ = peer.stream.shutdown(Shutdown::Both);
                    false
                }
            }
        });
        log::trace!("Published {} ({} bytes) to {} peer(s)", topic, body.len(), delivered);
        delivered
    }

    /// Connected subscriber processes.
    pub fn peer_count(&self) -> usize {
        lock(&self.shared.peers).len()
    }

    /// Topic prefixes registered across all peers.
    pub fn subscription_count(&self) -> usize {
        lock(&self.shared.peers)
            .iter()
            .map(|peer| lock(&peer.prefixes).len())
            .sum()
    }

    fn shutdown(&mut self) {
        self.shared.stop.store(true, Ordering::Relaxed);
        if let Some(acceptor) = self.acceptor.take() {
            let _ = acceptor.join();
        }
        for peer in lock(&self.shared.peers).drain(..) {
            let _ = peer.stream.shutdown(Shutdown::Both);
        }
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(listener: TcpListener, shared: Arc<PublisherShared>) {
    loop {
        if shared.stop.load(Ordering::Relaxed) {
            log::debug!("Publisher acceptor stopping");
            break;
        }

        match listener.accept() {
            Ok((stream, addr)) => {
                if let Err(e) = register_peer(stream, &shared) {
                    log::warn!("Failed to register subscriber {}: {}", addr, e);
                } else {
                    log::info!("Subscriber connected from {}", addr);
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_BACKOFF);
            }
            Err(e) => {
                log::warn!("Accept error: {}", e);
                std::thread::sleep(ACCEPT_BACKOFF);
            }
        }
    }
}

fn register_peer(stream: TcpStream, shared: &Arc<PublisherShared>) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    stream.set_write_timeout(Some(WRITE_TIMEOUT))?;

    let reader = stream.try_clone()?;
    reader.set_read_timeout(Some(POLL_INTERVAL))?;
    let writer = stream.try_clone()?;

    let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
    let prefixes = Arc::new(Mutex::new(Vec::new()));
    let (outbox, queued) = crossbeam_channel::bounded(PEER_QUEUE_CAPACITY);

    std::thread::Builder::new()
        .name("vrstate-pub-writer".into())
        .spawn(move || peer_write_loop(id, writer, queued))?;
    lock(&shared.peers).push(Peer {
        id,
        stream,
        prefixes: prefixes.clone(),
        outbox,
    });

    let shared = shared.clone();
    std::thread::Builder::new()
        .name("vrstate-pub-peer".into())
        .spawn(move || peer_control_loop(id, reader, prefixes, shared))?;
    Ok(())
}

/// Writes queued messages to one peer until its outbox is dropped or a write fails.
fn peer_write_loop(id: u64, mut writer: TcpStream, queued: Receiver<Arc<[u8]>>) {
    for message in queued.iter() {
        if let Err(e) = writer.write_all(&message) {
            log::warn!("Dropping subscriber {}: {}", id, e);
            // The control reader sees the shutdown and unregisters the peer.
            let _ = writer.shutdown(Shutdown::Both);
            break;
        }
    }
    log::trace!("Subscriber {} writer finished", id);
}

/// Reads subscribe/unsubscribe frames from one peer until it goes away.
fn peer_control_loop(
    id: u64,
    mut reader: TcpStream,
    prefixes: Arc<Mutex<Vec<Vec<u8>>>>,
    shared: Arc<PublisherShared>,
) {
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 1024];

    loop {
        if shared.stop.load(Ordering::Relaxed) {
            break;
        }

        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => decoder.push(&buf[..n]),
            Err(ref e) if is_timeout(e) => continue,
            Err(e) => {
                log::debug!("Subscriber {} read error: {}", id, e);
                break;
            }
        }

        loop {
            match decoder.pop_frame() {
                Ok(Some(frame)) => apply_control(id, &frame, &prefixes),
                Ok(None) => break,
                Err(e) => {
                    log::warn!("Subscriber {} sent a bad control frame: {}", id, e);
                    let _ = reader.shutdown(Shutdown::Both);
                    break;
                }
            }
        }
    }

    lock(&shared.peers).retain(|peer| peer.id != id);
    log::info!("Subscriber {} disconnected", id);
}

fn apply_control(id: u64, frame: &[u8], prefixes: &Mutex<Vec<Vec<u8>>>) {
    let Some((&op, prefix)) = frame.split_first() else {
        log::warn!("Subscriber {} sent an empty control frame", id);
        return;
    };
    let mut prefixes = lock(prefixes);
    match op {
        CONTROL_SUBSCRIBE => {
            log::debug!(
                "Subscriber {} subscribed to {:?}",
                id,
                String::from_utf8_lossy(prefix)
            );
            prefixes.push(prefix.to_vec());
        }
        CONTROL_UNSUBSCRIBE => {
            if let Some(pos) = prefixes.iter().position(|p| p == prefix) {
                prefixes.remove(pos);
            }
        }
        other => log::warn!("Subscriber {} sent unknown control op 0x{:02x}", id, other),
    }
}

/// A consumer-side connection to a [`Publisher`].
pub struct Subscriber {
    stream: TcpStream,
    decoder: FrameDecoder,
    endpoint: Endpoint,
    /// Set after a framing error; the stream cannot be resynchronised.
    broken: bool,
}

impl Subscriber {
    pub fn connect(address: &str) -> Result<Subscriber> {
        let endpoint = Endpoint::parse(address)?;
        let connect_err = |source| VrStateError::TransportConnect {
            address: address.to_string(),
            source,
        };
        let stream =
            TcpStream::connect((endpoint.host.as_str(), endpoint.port)).map_err(connect_err)?;
        stream.set_nodelay(true).map_err(connect_err)?;
        log::info!("Subscriber connected to {}", endpoint);
        Ok(Subscriber {
            stream,
            decoder: FrameDecoder::new(),
            endpoint,
            broken: false,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Receive messages whose topic starts with `prefix`. Empty matches all.
    pub fn subscribe(&self, prefix: &str) -> Result<()> {
        self.send_control(CONTROL_SUBSCRIBE, prefix)
    }

    pub fn unsubscribe(&self, prefix: &str) -> Result<()> {
        self.send_control(CONTROL_UNSUBSCRIBE, prefix)
    }

    fn send_control(&self, op: u8, prefix: &str) -> Result<()> {
        let mut payload = Vec::with_capacity(1 + prefix.len());
        payload.push(op);
        payload.extend_from_slice(prefix.as_bytes());
        let mut frame = Vec::with_capacity(FRAME_HEADER + payload.len());
        push_frame(&mut frame, &payload);
        (&self.stream).write_all(&frame).map_err(|e| {
            if is_disconnect(&e) {
                VrStateError::TransportClosed
            } else {
                VrStateError::Io(e)
            }
        })
    }

    /// Handle that can unblock [`Subscriber::receive`] from another thread.
    pub fn closer(&self) -> Result<SubscriberCloser> {
        Ok(SubscriberCloser {
            stream: self.stream.try_clone()?,
        })
    }

    /// Block until the next topic/body pair arrives.
    ///
    /// A bad frame header fails once with `MalformedPayload` and closes the
    /// connection; every later call fails with `TransportClosed`.
    pub fn receive(&mut self) -> Result<(String, Vec<u8>)> {
        self.stream.set_read_timeout(None)?;
        self.receive_until(None)
    }

    /// Like [`Subscriber::receive`] but fails with `Timeout` after `timeout`.
    pub fn receive_timeout(&mut self, timeout: Duration) -> Result<(String, Vec<u8>)> {
        self.receive_until(Some(Instant::now() + timeout))
    }

    fn receive_until(&mut self, deadline: Option<Instant>) -> Result<(String, Vec<u8>)> {
        if self.broken {
            return Err(VrStateError::TransportClosed);
        }
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            match self.decoder.pop_message() {
                Ok(Some((topic, body))) => {
                    let topic = String::from_utf8(topic).map_err(|e| {
                        VrStateError::MalformedPayload(format!("topic is not UTF-8: {}", e))
                    })?;
                    return Ok((topic, body));
                }
                Ok(None) => {}
                Err(e) => {
                    self.decoder = FrameDecoder::new();
                    self.broken = true;
                    let _ = self.stream.shutdown(Shutdown::Both);
                    return Err(e);
                }
            }

            if let Some(deadline) = deadline {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    return Err(VrStateError::Timeout);
                }
                self.stream.set_read_timeout(Some(left))?;
            }

            match self.stream.read(&mut buf) {
                Ok(0) => return Err(VrStateError::TransportClosed),
                Ok(n) => self.decoder.push(&buf[..n]),
                Err(ref e) if is_timeout(e) && deadline.is_some() => {
                    return Err(VrStateError::Timeout)
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(ref e) if is_disconnect(e) => return Err(VrStateError::TransportClosed),
                Err(e) => return Err(VrStateError::Io(e)),
            }
        }
    }
}

/// Closes a subscriber's connection from any thread.
pub struct SubscriberCloser {
    stream: TcpStream,
}

impl SubscriberCloser {
    pub fn close(&self) {
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            if e.kind() != io::ErrorKind::NotConnected {
                log::debug!("Subscriber shutdown: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn pair(prefix: &str) -> (Publisher, Subscriber) {
        let publisher = Publisher::bind("tcp://127.0.0.1:0").unwrap();
        let subscriber = Subscriber::connect(&publisher.local_endpoint().to_string()).unwrap();
        subscriber.subscribe(prefix).unwrap();
        wait_for("subscription", || publisher.subscription_count() == 1);
        (publisher, subscriber)
    }

    #[test]
    fn test_endpoint_parse() {
        let ep = Endpoint::parse("tcp://127.0.0.1:5555").unwrap();
        assert_eq!(ep.host, "127.0.0.1");
        assert_eq!(ep.port, 5555);
        assert_eq!(ep.to_string(), "tcp://127.0.0.1:5555");
        assert_eq!(Endpoint::parse("tcp://*:1").unwrap().host, "0.0.0.0");
        assert_eq!(Endpoint::parse("tcp://[::1]:9").unwrap().to_string(), "tcp://[::1]:9");
    }

    #[test]
    fn test_endpoint_rejects_bad_addresses() {
        for bad in ["udp://127.0.0.1:5", "127.0.0.1:5", "tcp://:5", "tcp://host", "tcp://h:99999"] {
            assert!(
                matches!(Endpoint::parse(bad), Err(VrStateError::InvalidAddress(_))),
                "{}",
                bad
            );
        }
    }

    #[test]
    fn test_frame_decoder_partial_input() {
        let message = encode_message("vr.devices", b"body");
        let mut decoder = FrameDecoder::new();
        for byte in &message[..message.len() - 1] {
            decoder.push(std::slice::from_ref(byte));
            assert!(decoder.pop_message().unwrap().is_none());
        }
        decoder.push(&message[message.len() - 1..]);
        let (topic, body) = decoder.pop_message().unwrap().unwrap();
        assert_eq!(topic, b"vr.devices");
        assert_eq!(body, b"body");
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_frame_decoder_rejects_oversize() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&u32::MAX.to_le_bytes());
        assert!(matches!(
            decoder.pop_frame(),
            Err(VrStateError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_bind_failure() {
        let first = Publisher::bind("tcp://127.0.0.1:0").unwrap();
        let taken = first.local_endpoint().to_string();
        assert!(matches!(
            Publisher::bind(&taken),
            Err(VrStateError::TransportBind { .. })
        ));
    }

    #[test]
    fn test_publish_and_receive_in_order() {
        let (publisher, mut subscriber) = pair("vr.");
        assert_eq!(publisher.publish("vr.devices", b"A"), 1);
        assert_eq!(publisher.publish("vr.devices", b"B"), 1);

        let (topic, body) = subscriber.receive().unwrap();
        assert_eq!(topic, "vr.devices");
        assert_eq!(body, b"A");
        assert_eq!(subscriber.receive().unwrap().1, b"B");
    }

    #[test]
    fn test_prefix_filtering() {
        let (publisher, mut subscriber) = pair("vr.devices");
        assert_eq!(publisher.publish("input.mouse", b"skip"), 0);
        assert_eq!(publisher.publish("vr.devices.updated", b"keep"), 1);
        let (topic, body) = subscriber.receive().unwrap();
        assert_eq!(topic, "vr.devices.updated");
        assert_eq!(body, b"keep");
    }

    #[test]
    fn test_unsubscribe() {
        let (publisher, mut subscriber) = pair("vr");
        subscriber.unsubscribe("vr").unwrap();
        wait_for("unsubscribe", || publisher.subscription_count() == 0);
        assert_eq!(publisher.publish("vr.devices", b"x"), 0);
        assert!(matches!(
            subscriber.receive_timeout(Duration::from_millis(50)),
            Err(VrStateError::Timeout)
        ));
    }

    #[test]
    fn test_closer_unblocks_receive() {
        let (_publisher, mut subscriber) = pair("");
        let closer = subscriber.closer().unwrap();
        let receiver = std::thread::spawn(move || subscriber.receive());
        std::thread::sleep(Duration::from_millis(20));
        closer.close();
        assert!(matches!(
            receiver.join().unwrap(),
            Err(VrStateError::TransportClosed)
        ));
    }

    #[test]
    fn test_publisher_drop_closes_subscribers() {
        let (publisher, mut subscriber) = pair("");
        drop(publisher);
        assert!(matches!(
            subscriber.receive_timeout(Duration::from_secs(2)),
            Err(VrStateError::TransportClosed)
        ));
    }

    #[test]
    fn test_bad_frame_header_closes_subscriber() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = format!("tcp://{}", listener.local_addr().unwrap());
        let mut subscriber = Subscriber::connect(&address).unwrap();
        let (mut peer, _) = listener.accept().unwrap();
        peer.write_all(&u32::MAX.to_le_bytes()).unwrap();

        assert!(matches!(
            subscriber.receive_timeout(Duration::from_secs(2)),
            Err(VrStateError::MalformedPayload(_))
        ));
        assert!(matches!(
            subscriber.receive_timeout(Duration::from_secs(2)),
            Err(VrStateError::TransportClosed)
        ));
    }

    #[test]
    fn test_stalled_peer_does_not_block_publish() {
        let (publisher, _stalled) = pair("");
        let mut reader = Subscriber::connect(&publisher.local_endpoint().to_string()).unwrap();
        reader.subscribe("").unwrap();
        wait_for("second subscription", || publisher.subscription_count() == 2);

        // Enough to fill the stalled peer's socket buffers and its outbox.
        let body = vec![0u8; 256 * 1024];
        let started = Instant::now();
        for _ in 0..200 {
            publisher.publish("vr.devices", &body);
        }
        assert!(started.elapsed() < WRITE_TIMEOUT);
        let (_, first) = reader.receive_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(first.len(), body.len());
    }

    #[test]
    fn test_disconnected_peer_is_removed() {
        let (publisher, subscriber) = pair("");
        assert_eq!(publisher.peer_count(), 1);
        drop(subscriber);
        wait_for("peer removal", || publisher.peer_count() == 0);
    }
}
