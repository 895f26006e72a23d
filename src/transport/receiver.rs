//! UDP receiver for mocopi skeleton packets
//!
//! One receiver owns one bound socket and one receive thread. Decoded
//! definitions and frames are fanned out to every registered
//! [`SkeletonSink`]. A bad datagram is logged, counted and reported to the
//! sinks; reception carries on with the next one.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;

use super::packet::{self, Packet};
use super::registry::SubscriptionId;
use super::SkeletonSink;
use crate::error::TransportError;
use crate::skeleton::SkeletonDefinition;

/// Maximum UDP datagram size
const MAX_DATAGRAM_SIZE: usize = 65536;

/// How often the receive thread checks for a stop request
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Packet counters for one receiver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub definitions: u64,
    pub frames: u64,
    pub errors: u64,
}

type Subscriber = (SubscriptionId, Arc<dyn SkeletonSink>);

/// State shared with the receive thread
struct Shared {
    /// Held for reading while callbacks run, so a removed subscriber is
    /// never called once removal returns
    subscribers: RwLock<Vec<Subscriber>>,
    last_definition: Mutex<Option<Arc<SkeletonDefinition>>>,
    definitions: AtomicU64,
    frames: AtomicU64,
    errors: AtomicU64,
}

impl Shared {
    fn dispatch(&self, datagram: &[u8]) {
        match packet::decode(datagram) {
            Ok(Packet::Definition(definition)) => {
                let definition = Arc::new(definition);
                self.definitions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Received skeleton definition ({} bones)", definition.len());

                match self.last_definition.lock() {
                    Ok(mut last) => *last = Some(Arc::clone(&definition)),
                    Err(poisoned) => *poisoned.into_inner() = Some(Arc::clone(&definition)),
                }

                let subscribers = self.read_subscribers();
                for (_, sink) in subscribers.iter() {
                    sink.on_definition(Arc::clone(&definition));
                }
            }
            Ok(Packet::Frame(frame)) => {
                self.frames.fetch_add(1, Ordering::Relaxed);
                let subscribers = self.read_subscribers();
                for (_, sink) in subscribers.iter() {
                    sink.on_frame(frame.clone());
                }
            }
            Err(e) => {
                self.report(TransportError::ReceiveFailed(format!(
                    "Dropped {} byte packet: {}",
                    datagram.len(),
                    e
                )));
            }
        }
    }

    fn report(&self, error: TransportError) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        tracing::warn!("{}", error);
        let subscribers = self.read_subscribers();
        for (_, sink) in subscribers.iter() {
            sink.on_receive_error(&error);
        }
    }

    fn read_subscribers(&self) -> std::sync::RwLockReadGuard<'_, Vec<Subscriber>> {
        match self.subscribers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_subscribers(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Subscriber>> {
        match self.subscribers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn last_definition(&self) -> Option<Arc<SkeletonDefinition>> {
        match self.last_definition.lock() {
            Ok(last) => last.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// A running receiver bound to one endpoint
pub struct TransportReceiver {
    endpoint: SocketAddr,
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for TransportReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportReceiver")
            .field("endpoint", &self.endpoint)
            .field("local_addr", &self.local_addr)
            .field("running", &self.is_running())
            .finish()
    }
}

impl TransportReceiver {
    /// Bind `endpoint` and start the receive thread
    pub fn start(endpoint: SocketAddr) -> Result<Self, TransportError> {
        let start_failed = |reason: String| TransportError::StartFailed {
            endpoint: endpoint.to_string(),
            reason,
        };

        let socket = UdpSocket::bind(endpoint)
            .map_err(|e| start_failed(format!("Failed to bind: {}", e)))?;

        socket
            .set_read_timeout(Some(POLL_INTERVAL))
            .map_err(|e| start_failed(format!("Failed to set read timeout: {}", e)))?;

        let local_addr = socket
            .local_addr()
            .map_err(|e| start_failed(format!("Failed to read local address: {}", e)))?;

        let running = Arc::new(AtomicBool::new(true));
        let shared = Arc::new(Shared {
            subscribers: RwLock::new(Vec::new()),
            last_definition: Mutex::new(None),
            definitions: AtomicU64::new(0),
            frames: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        });

        let thread_running = Arc::clone(&running);
        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("mocopi-rx-{}", local_addr.port()))
            .spawn(move || receive_loop(socket, thread_running, thread_shared))
            .map_err(|e| start_failed(format!("Failed to spawn receive thread: {}", e)))?;

        tracing::info!("Mocopi receiver listening on {}", local_addr);

        Ok(Self {
            endpoint,
            local_addr,
            running,
            thread: Some(handle),
            shared,
        })
    }

    /// Halt the receive thread and release the socket. Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                tracing::error!("Receive thread for {} panicked", self.endpoint);
            }
            tracing::info!("Mocopi receiver on {} stopped", self.local_addr);
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some() && self.running.load(Ordering::Acquire)
    }

    /// Endpoint this receiver was started with
    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// Address actually bound (differs from `endpoint` for port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Register a sink. If a definition was already received it is replayed
    /// to the new sink straight away.
    pub fn add_subscriber(&self, id: SubscriptionId, sink: Arc<dyn SkeletonSink>) {
        // Replay under the write guard so a newer definition cannot be
        // dispatched between reading the last one and handing it over
        let mut subscribers = self.shared.write_subscribers();
        if let Some(definition) = self.shared.last_definition() {
            sink.on_definition(definition);
        }
        subscribers.push((id, sink));
    }

    /// Remove a sink. Once this returns the sink receives no further calls.
    pub fn remove_subscriber(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.shared.write_subscribers();
        let before = subscribers.len();
        subscribers.retain(|(sub, _)| *sub != id);
        subscribers.len() != before
    }

    /// Remove every sink
    pub fn clear_subscribers(&self) {
        self.shared.write_subscribers().clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.read_subscribers().len()
    }

    pub fn stats(&self) -> ReceiverStats {
        ReceiverStats {
            definitions: self.shared.definitions.load(Ordering::Relaxed),
            frames: self.shared.frames.load(Ordering::Relaxed),
            errors: self.shared.errors.load(Ordering::Relaxed),
        }
    }
}

impl Drop for TransportReceiver {
    fn drop(&mut self) {
        self.clear_subscribers();
        self.stop();
    }
}

fn receive_loop(socket: UdpSocket, running: Arc<AtomicBool>, shared: Arc<Shared>) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    while running.load(Ordering::Acquire) {
        match socket.recv_from(&mut buf) {
            Ok((size, from)) => {
                tracing::trace!("Received {} bytes from {}", size, from);
                shared.dispatch(&buf[..size]);
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                // Poll timeout, re-check the stop flag
            }
            Err(e) => {
                shared.report(TransportError::ReceiveFailed(format!("Receive error: {}", e)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skeleton::{BoneDefinition, BoneId, BonePose, FrameEvent};
    use crate::transport::{HandoffMode, Staging};
    use std::collections::BTreeMap;
    use std::time::Instant;

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        condition()
    }

    fn definition() -> SkeletonDefinition {
        SkeletonDefinition::new(vec![
            BoneDefinition {
                id: BoneId(0),
                parent: None,
                rest: BonePose::IDENTITY,
            },
            BoneDefinition {
                id: BoneId(1),
                parent: Some(BoneId(0)),
                rest: BonePose::IDENTITY,
            },
        ])
        .unwrap()
    }

    fn frame(id: u32) -> FrameEvent {
        let mut poses = BTreeMap::new();
        poses.insert(BoneId(0), BonePose::IDENTITY);
        FrameEvent {
            frame_id: id,
            timestamp: 0.0,
            unix_time: 0.0,
            poses,
        }
    }

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn test_receives_definition_and_frame() {
        let mut receiver = TransportReceiver::start(loopback()).unwrap();
        let staging = Staging::new(HandoffMode::Queue, 16);
        receiver.add_subscriber(SubscriptionId::from_raw(1), staging.clone());

        let sender = UdpSocket::bind(loopback()).unwrap();
        let target = receiver.local_addr();
        sender.send_to(&packet::encode_definition(&definition()), target).unwrap();

        assert!(wait_for(|| receiver.stats().definitions == 1));
        sender.send_to(&packet::encode_frame(&frame(5)), target).unwrap();
        assert!(wait_for(|| receiver.stats().frames == 1));

        assert_eq!(staging.take_definition().unwrap().len(), 2);
        assert_eq!(staging.take_frames()[0].frame_id, 5);

        receiver.stop();
        assert!(!receiver.is_running());
    }

    #[test]
    fn test_bad_packet_does_not_stop_reception() {
        let receiver = TransportReceiver::start(loopback()).unwrap();
        let staging = Staging::new(HandoffMode::Latest, 0);
        receiver.add_subscriber(SubscriptionId::from_raw(1), staging.clone());

        let sender = UdpSocket::bind(loopback()).unwrap();
        let target = receiver.local_addr();
        sender.send_to(b"garbage!", target).unwrap();
        assert!(wait_for(|| receiver.stats().errors == 1));
        assert_eq!(staging.receive_errors(), 1);

        sender.send_to(&packet::encode_frame(&frame(9)), target).unwrap();
        assert!(wait_for(|| receiver.stats().frames == 1));
        assert!(receiver.is_running());
    }

    #[test]
    fn test_late_subscriber_gets_last_definition() {
        let receiver = TransportReceiver::start(loopback()).unwrap();
        let sender = UdpSocket::bind(loopback()).unwrap();
        sender
            .send_to(&packet::encode_definition(&definition()), receiver.local_addr())
            .unwrap();
        assert!(wait_for(|| receiver.stats().definitions == 1));

        let staging = Staging::new(HandoffMode::Latest, 0);
        receiver.add_subscriber(SubscriptionId::from_raw(2), staging.clone());
        assert!(staging.take_definition().is_some());
    }

    #[test]
    fn test_subscribers_end_on_newest_definition() {
        fn chain(len: u16) -> SkeletonDefinition {
            SkeletonDefinition::new(
                (0..len)
                    .map(|id| BoneDefinition {
                        id: BoneId(id),
                        parent: id.checked_sub(1).map(BoneId),
                        rest: BonePose::IDENTITY,
                    })
                    .collect(),
            )
            .unwrap()
        }

        let receiver = TransportReceiver::start(loopback()).unwrap();
        let target = receiver.local_addr();
        let total = 60u16;

        let sender = thread::spawn(move || {
            let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
            for len in 1..=total {
                socket.send_to(&packet::encode_definition(&chain(len)), target).unwrap();
                thread::sleep(Duration::from_millis(1));
            }
        });

        let mut sinks = Vec::new();
        for id in 0..40 {
            let staging = Staging::new(HandoffMode::Latest, 0);
            receiver.add_subscriber(SubscriptionId::from_raw(id), staging.clone());
            sinks.push(staging);
            thread::sleep(Duration::from_micros(500));
        }

        sender.join().unwrap();
        assert!(wait_for(|| receiver.stats().definitions == total as u64));

        for staging in sinks {
            assert_eq!(staging.take_definition().unwrap().len(), total as usize);
        }
    }

    #[test]
    fn test_bind_conflict_reports_start_failure() {
        let holder = UdpSocket::bind(loopback()).unwrap();
        let taken = holder.local_addr().unwrap();

        let err = TransportReceiver::start(taken).unwrap_err();
        assert!(matches!(err, TransportError::StartFailed { .. }));
    }
}
