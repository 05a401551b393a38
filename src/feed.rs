use crate::codec;
use crate::config::FeedConfig;
use crate::dispatch::Poster;
use crate::transport::{Endpoint, Subscriber, SubscriberCloser};
use crate::types::Snapshot;
use crate::{Result, VrStateError};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// Consumer-process view of a remote tracker.
///
/// A background thread blocks on the subscriber, decodes each snapshot,
/// records it as the last-known state and posts it to the consumer's
/// dispatcher, so `on_update` only ever runs on the thread draining that
/// dispatcher. Undecodable messages are logged and skipped.
///
/// The dispatcher's queue decides what happens when the consumer stops
/// draining: [`Dispatcher::channel`](crate::Dispatcher::channel) keeps every
/// snapshot, [`Dispatcher::bounded`](crate::Dispatcher::bounded) drops new ones
/// once full. `devices()` always reflects the newest snapshot either way.
pub struct DeviceFeed {
    latest: Arc<RwLock<Snapshot>>,
    ready: Receiver<()>,
    ready_seen: Arc<AtomicBool>,
    closer: SubscriberCloser,
    endpoint: Endpoint,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl DeviceFeed {
    pub fn connect<C, F>(config: &FeedConfig, poster: Poster<C>, on_update: F) -> Result<DeviceFeed>
    where
        C: ?Sized + 'static,
        F: Fn(&mut C, Snapshot) + Send + Sync + 'static,
    {
        let subscriber = Subscriber::connect(&config.address)?;
        subscriber.subscribe(&config.topic_prefix)?;
        let closer = subscriber.closer()?;
        let endpoint = subscriber.endpoint().clone();

        let latest = Arc::new(RwLock::new(Arc::new(Vec::new())));
        let ready_seen = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready) = crossbeam_channel::bounded(1);

        let receive = ReceiveLoop {
            latest: latest.clone(),
            ready: Some(ready_tx),
            ready_seen: ready_seen.clone(),
            poster,
            on_update: Arc::new(on_update),
        };
        let thread = std::thread::Builder::new()
            .name("vrstate-feed".into())
            .spawn(move || receive.run(subscriber))
            .map_err(|e| VrStateError::ThreadSpawn(format!("feed receiver: {}", e)))?;

        log::info!("Device feed on {} (prefix {:?})", endpoint, config.topic_prefix);
        Ok(DeviceFeed {
            latest,
            ready,
            ready_seen,
            closer,
            endpoint,
            thread: Some(thread),
        })
    }

    /// Last snapshot received; empty before the first one.
    pub fn devices(&self) -> Snapshot {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// One-shot signal raised by the first decoded snapshot.
    pub fn ready(&self) -> &Receiver<()> {
        &self.ready
    }

    pub fn wait_ready(&self, timeout: Duration) -> Result<()> {
        if self.ready_seen.load(Ordering::Acquire) {
            return Ok(());
        }
        match self.ready.recv_timeout(timeout) {
            Ok(()) => Ok(()),
            Err(RecvTimeoutError::Timeout) => Err(VrStateError::Timeout),
            Err(RecvTimeoutError::Disconnected) if self.ready_seen.load(Ordering::Acquire) => {
                Ok(())
            }
            Err(RecvTimeoutError::Disconnected) => Err(VrStateError::TransportClosed),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Close the transport and wait for the receive thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.closer.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for DeviceFeed {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct ReceiveLoop<C: ?Sized, F> {
    latest: Arc<RwLock<Snapshot>>,
    ready: Option<Sender<()>>,
    ready_seen: Arc<AtomicBool>,
    poster: Poster<C>,
    on_update: Arc<F>,
}

impl<C, F> ReceiveLoop<C, F>
where
    C: ?Sized + 'static,
    F: Fn(&mut C, Snapshot) + Send + Sync + 'static,
{
    fn run(mut self, mut subscriber: Subscriber) {
        loop {
            let (topic, body) = match subscriber.receive() {
                Ok(message) => message,
                Err(e) if e.is_closed() => {
                    log::debug!("Feed transport closed");
                    break;
                }
                Err(VrStateError::MalformedPayload(reason)) => {
                    log::warn!("Dropping malformed message: {}", reason);
                    continue;
                }
                Err(e) => {
                    log::warn!("Feed receive failed: {}", e);
                    break;
                }
            };

            let snapshot = match codec::decode_snapshot(&body) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    log::warn!("Dropping {} message ({} bytes): {}", topic, body.len(), e);
                    continue;
                }
            };

            if !self.deliver(snapshot) {
                log::debug!("Consumer dispatcher gone, stopping feed");
                break;
            }
        }
    }

    fn deliver(&mut self, snapshot: Snapshot) -> bool {
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = snapshot.clone();

        if let Some(ready) = self.ready.take() {
            self.ready_seen.store(true, Ordering::Release);
            let _ = ready.send(());
        }

        let on_update = self.on_update.clone();
        match self.poster.try_post(move |ctx: &mut C| (*on_update)(ctx, snapshot)) {
            Ok(()) => true,
            Err(VrStateError::DispatcherFull) => {
                log::trace!("Consumer dispatcher full, dropping snapshot");
                true
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Dispatcher;
    use crate::transport::Publisher;
    use crate::types::{DeviceClass, TrackedDevice};
    use crate::topics;
    use std::io::Write;
    use std::net::TcpListener;
    use std::time::Instant;

    const WAIT: Duration = Duration::from_secs(5);

    fn device(slot: u32) -> TrackedDevice {
        TrackedDevice {
            slot,
            class: DeviceClass::GenericTracker,
            connected: true,
            manufacturer: "Tundra".into(),
            model: "TL3".into(),
            serial: format!("T-{}", slot),
            tracking_style: None,
            role: None,
            pose: None,
        }
    }

    fn wait_subscribed(publisher: &Publisher) {
        let deadline = Instant::now() + WAIT;
        while publisher.subscription_count() == 0 {
            assert!(Instant::now() < deadline, "feed never subscribed");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn feed_for(publisher: &Publisher) -> (DeviceFeed, Dispatcher<Vec<Snapshot>>) {
        let (poster, dispatcher) = Dispatcher::<Vec<Snapshot>>::channel();
        let config = FeedConfig {
            address: publisher.local_endpoint().to_string(),
            topic_prefix: topics::DEVICES.to_string(),
        };
        let feed = DeviceFeed::connect(&config, poster, |seen: &mut Vec<Snapshot>, s| {
            seen.push(s)
        })
        .unwrap();
        wait_subscribed(publisher);
        (feed, dispatcher)
    }

    #[test]
    fn test_snapshots_reach_dispatcher() {
        let publisher = Publisher::bind("tcp://127.0.0.1:0").unwrap();
        let (feed, dispatcher) = feed_for(&publisher);
        assert!(feed.devices().is_empty());

        let snapshot: Snapshot = Arc::new(vec![device(1), device(2)]);
        publisher.publish(topics::DEVICES_UPDATED, &codec::encode_snapshot(&snapshot));

        feed.wait_ready(WAIT).unwrap();
        assert_eq!(feed.devices(), snapshot);

        let mut seen = Vec::new();
        dispatcher.run_timeout(&mut seen, WAIT).unwrap();
        assert_eq!(seen, vec![snapshot]);
    }

    #[test]
    fn test_malformed_message_is_skipped() {
        let publisher = Publisher::bind("tcp://127.0.0.1:0").unwrap();
        let (feed, dispatcher) = feed_for(&publisher);

        publisher.publish(topics::DEVICES_UPDATED, &[1, 2, 3]);
        let snapshot: Snapshot = Arc::new(vec![device(7)]);
        publisher.publish(topics::DEVICES_UPDATED, &codec::encode_snapshot(&snapshot));

        let mut seen = Vec::new();
        dispatcher.run_timeout(&mut seen, WAIT).unwrap();
        assert_eq!(seen, vec![snapshot.clone()]);
        assert_eq!(feed.devices(), snapshot);
    }

    #[test]
    fn test_stop_joins_receiver() {
        let publisher = Publisher::bind("tcp://127.0.0.1:0").unwrap();
        let (feed, _dispatcher) = feed_for(&publisher);
        assert!(matches!(
            feed.wait_ready(Duration::from_millis(20)),
            Err(VrStateError::Timeout)
        ));
        feed.stop();
        let deadline = Instant::now() + WAIT;
        while publisher.peer_count() > 0 {
            assert!(Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_bad_frame_header_ends_feed() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let (poster, _dispatcher) = Dispatcher::<Vec<Snapshot>>::channel();
        let config = FeedConfig {
            address: format!("tcp://{}", listener.local_addr().unwrap()),
            topic_prefix: String::new(),
        };
        let feed = DeviceFeed::connect(&config, poster, |seen: &mut Vec<Snapshot>, s| {
            seen.push(s)
        })
        .unwrap();
        let (mut peer, _) = listener.accept().unwrap();
        peer.write_all(&u32::MAX.to_le_bytes()).unwrap();

        let (done_tx, done) = crossbeam_channel::bounded(1);
        std::thread::spawn(move || {
            feed.stop();
            let _ = done_tx.send(());
        });
        done.recv_timeout(WAIT).expect("feed did not stop after a bad frame");
        drop(peer);
    }

    #[test]
    fn test_bounded_dispatcher_keeps_latest() {
        let publisher = Publisher::bind("tcp://127.0.0.1:0").unwrap();
        let (poster, dispatcher) = Dispatcher::<Vec<Snapshot>>::bounded(1);
        let config = FeedConfig {
            address: publisher.local_endpoint().to_string(),
            topic_prefix: topics::DEVICES.to_string(),
        };
        let feed = DeviceFeed::connect(&config, poster, |seen: &mut Vec<Snapshot>, s| {
            seen.push(s)
        })
        .unwrap();
        wait_subscribed(&publisher);

        let snapshots: Vec<Snapshot> = (1..=3).map(|slot| Arc::new(vec![device(slot)])).collect();
        for snapshot in &snapshots {
            publisher.publish(topics::DEVICES_UPDATED, &codec::encode_snapshot(snapshot));
        }

        let deadline = Instant::now() + WAIT;
        while feed.devices() != snapshots[2] {
            assert!(Instant::now() < deadline, "last snapshot never arrived");
            std::thread::sleep(Duration::from_millis(5));
        }
        let mut seen = Vec::new();
        assert_eq!(dispatcher.run_pending(&mut seen), 1);
        assert_eq!(seen, vec![snapshots[0].clone()]);
    }

    #[test]
    fn test_connect_failure() {
        let (poster, _dispatcher) = Dispatcher::<u32>::channel();
        let config = FeedConfig {
            address: "tcp://127.0.0.1:1".into(),
            topic_prefix: String::new(),
        };
        assert!(matches!(
            DeviceFeed::connect(&config, poster, |_: &mut u32, _| {}),
            Err(VrStateError::TransportConnect { .. })
        ));
    }
}
