use crate::codec;
use crate::config::TrackerConfig;
use crate::dispatch::{Dispatcher, Poster};
use crate::registry::DeviceRegistry;
use crate::runtime::{classify, RuntimeEvent, VrRuntime};
use crate::topics;
use crate::transport::{Endpoint, Publisher};
use crate::types::{DeviceClass, Snapshot, MAX_TRACKED_DEVICES};
use crate::{Result, VrStateError};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

/// Snapshots buffered per update listener before new ones are dropped.
const LISTENER_CAPACITY: usize = 64;

/// Lifecycle of one tracking loop. There is no way back from `Terminated`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Uninitialized = 0,
    Initializing = 1,
    Polling = 2,
    Terminated = 3,
}

impl TrackerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => TrackerState::Uninitialized,
            1 => TrackerState::Initializing,
            2 => TrackerState::Polling,
            _ => TrackerState::Terminated,
        }
    }
}

struct Shared {
    state: AtomicU8,
    stop: AtomicBool,
    ready: AtomicBool,
    latest: RwLock<Snapshot>,
    listeners: Mutex<Vec<Sender<Snapshot>>>,
}

impl Shared {
    fn set_state(&self, state: TrackerState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// Handle to a running tracking loop.
///
/// The loop owns the runtime connection and the device registry on its own
/// thread. Consumers observe it through a one-shot ready signal, per-cycle
/// snapshot channels, the last-known snapshot, and the published wire stream.
pub struct Tracker {
    shared: Arc<Shared>,
    ready: Receiver<()>,
    poster: Poster<dyn VrRuntime>,
    endpoint: Option<Endpoint>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl Tracker {
    /// Start the tracking thread.
    ///
    /// `init` opens the runtime connection on the tracking thread. If it fails
    /// the loop terminates without signalling ready. A publish address that
    /// cannot be bound is logged and the tracker runs without publishing.
    pub fn start<R, F>(config: TrackerConfig, init: F) -> Result<Tracker>
    where
        R: VrRuntime + 'static,
        F: FnOnce() -> Result<R> + Send + 'static,
    {
        let publisher = config
            .publish_address
            .as_deref()
            .and_then(|address| match Publisher::bind(address) {
                Ok(publisher) => Some(publisher),
                Err(e) => {
                    log::error!("{}; snapshots will not be published", e);
                    None
                }
            });
        let endpoint = publisher.as_ref().map(|p| p.local_endpoint().clone());

        let shared = Arc::new(Shared {
            state: AtomicU8::new(TrackerState::Uninitialized as u8),
            stop: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            latest: RwLock::new(Arc::new(Vec::new())),
            listeners: Mutex::new(Vec::new()),
        });
        let (ready_tx, ready) = crossbeam_channel::bounded(1);
        let (poster, dispatcher) = Dispatcher::channel();

        let tracking = TrackingLoop {
            config,
            shared: shared.clone(),
            publisher,
            dispatcher,
            ready: Some(ready_tx),
            registry: DeviceRegistry::new(),
        };

        let thread = std::thread::Builder::new()
            .name("vrstate-tracker".into())
            .spawn(move || tracking.run(init))
            .map_err(|e| VrStateError::ThreadSpawn(format!("tracking loop: {}", e)))?;

        Ok(Tracker {
            shared,
            ready,
            poster,
            endpoint,
            thread: Some(thread),
        })
    }

    /// One-shot signal raised after the first enumeration.
    pub fn ready(&self) -> &Receiver<()> {
        &self.ready
    }

    /// Block until ready, the loop dies, or `timeout` elapses.
    pub fn wait_ready(&self, timeout: Duration) -> Result<()> {
        if self.shared.ready.load(Ordering::Acquire) {
            return Ok(());
        }
        match self.ready.recv_timeout(timeout) {
            Ok(()) => Ok(()),
            Err(RecvTimeoutError::Timeout) => Err(VrStateError::Timeout),
            Err(RecvTimeoutError::Disconnected) if self.shared.ready.load(Ordering::Acquire) => {
                Ok(())
            }
            Err(RecvTimeoutError::Disconnected) => Err(VrStateError::RuntimeInit(
                "tracking loop terminated before ready".into(),
            )),
        }
    }

    /// New channel receiving one snapshot per tracking cycle.
    ///
    /// A listener that falls `LISTENER_CAPACITY` snapshots behind misses
    /// cycles; dropping the receiver unsubscribes it.
    pub fn subscribe(&self) -> Receiver<Snapshot> {
        let (sender, receiver) = crossbeam_channel::bounded(LISTENER_CAPACITY);
        self.shared
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sender);
        receiver
    }

    /// Last published snapshot, without waiting for the next cycle.
    pub fn devices(&self) -> Snapshot {
        self.shared
            .latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Queue work to run on the tracking thread with the runtime connection.
    pub fn poster(&self) -> Poster<dyn VrRuntime> {
        self.poster.clone()
    }

    /// Endpoint snapshots are published on, if publishing is active.
    pub fn publish_endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    pub fn state(&self) -> TrackerState {
        TrackerState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    pub fn is_active(&self) -> bool {
        !self.shared.stop.load(Ordering::Relaxed) && self.state() != TrackerState::Terminated
    }

    /// Ask the loop to finish its current cycle, then wait for it.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.shared.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct TrackingLoop {
    config: TrackerConfig,
    shared: Arc<Shared>,
    publisher: Option<Publisher>,
    dispatcher: Dispatcher<dyn VrRuntime>,
    ready: Option<Sender<()>>,
    registry: DeviceRegistry,
}

impl TrackingLoop {
    fn run<R, F>(mut self, init: F)
    where
        R: VrRuntime + 'static,
        F: FnOnce() -> Result<R>,
    {
        self.shared.set_state(TrackerState::Initializing);
        let mut runtime = match init() {
            Ok(runtime) => runtime,
            Err(e) => {
                log::error!("Tracking loop not started: {}", e);
                self.shared.set_state(TrackerState::Terminated);
                return;
            }
        };

        self.enumerate(&runtime);
        let snapshot = self.registry.snapshot();
        self.emit(&snapshot, true);

        if let Some(ready) = self.ready.take() {
            self.shared.ready.store(true, Ordering::Release);
            let _ = ready.send(());
        }
        log::info!(
            "Tracking loop ready with {} device(s), cycle {:?}",
            self.registry.len(),
            self.config.cycle_interval
        );
        self.shared.set_state(TrackerState::Polling);

        while !self.shared.stop.load(Ordering::Relaxed) {
            self.cycle(&mut runtime);
            std::thread::sleep(self.config.cycle_interval);
        }

        self.shared.set_state(TrackerState::Terminated);
        log::info!("Tracking loop stopped");
    }

    fn enumerate(&mut self, runtime: &dyn VrRuntime) {
        for slot in 0..MAX_TRACKED_DEVICES {
            let class = runtime.device_class(slot);
            if class != DeviceClass::Invalid {
                let device = self.registry.upsert(slot, classify(runtime, slot, class));
                log::info!(
                    "Found {} at slot {}: {} {} ({})",
                    class.as_str(),
                    slot,
                    device.manufacturer,
                    device.model,
                    device.serial
                );
            }
        }
    }

    fn cycle<R: VrRuntime + 'static>(&mut self, runtime: &mut R) {
        let posted = self.dispatcher.run_pending(runtime);
        if posted > 0 {
            log::trace!("Ran {} posted job(s)", posted);
        }

        let changed = self.drain_events(runtime);
        self.sample_poses(runtime);

        let snapshot = self.registry.snapshot();
        self.emit(&snapshot, changed);
    }

    /// Apply every pending runtime event. Returns true if the registry changed.
    fn drain_events(&mut self, runtime: &mut dyn VrRuntime) -> bool {
        let mut changed = false;
        while let Some(event) = runtime.poll_event() {
            match event {
                RuntimeEvent::DeviceActivated { slot } | RuntimeEvent::PropertyChanged { slot }
                    if slot >= MAX_TRACKED_DEVICES =>
                {
                    log::warn!("Ignoring event for out-of-range slot {}", slot);
                }
                RuntimeEvent::DeviceActivated { slot } => {
                    let class = runtime.device_class(slot);
                    if class == DeviceClass::Invalid {
                        log::debug!("Slot {} activated without a device class", slot);
                        continue;
                    }
                    self.registry.upsert(slot, classify(&*runtime, slot, class));
                    log::info!("Device activated: slot {} ({})", slot, class.as_str());
                    changed = true;
                }
                RuntimeEvent::DeviceDeactivated { slot } => {
                    // Kept in the registry; the next pose sample clears `connected`.
                    log::info!("Device deactivated: slot {}", slot);
                }
                RuntimeEvent::PropertyChanged { slot } => {
                    let class = runtime.device_class(slot);
                    if class == DeviceClass::Invalid {
                        changed |= self.registry.remove(slot).is_some();
                    } else {
                        self.registry.upsert(slot, classify(&*runtime, slot, class));
                        changed = true;
                    }
                }
                RuntimeEvent::Other { kind } => {
                    log::trace!("Ignoring runtime event {}", kind);
                }
            }
        }
        changed
    }

    fn sample_poses(&mut self, runtime: &mut dyn VrRuntime) {
        let count = self.registry.slot_bound();
        if count == 0 {
            return;
        }
        let samples = runtime.poses(self.config.universe, count);
        for (slot, sample) in (0u32..).zip(samples) {
            let Some(device) = self.registry.get(slot) else {
                continue;
            };
            // A record stays pose-less until the runtime reports a valid sample.
            if device.pose.is_some() || sample.pose.valid {
                self.registry.apply_pose(slot, sample.pose);
            }
            self.registry.set_connected(slot, sample.connected);
        }
    }

    fn emit(&mut self, snapshot: &Snapshot, changed: bool) {
        *self
            .shared
            .latest
            .write()
            .unwrap_or_else(PoisonError::into_inner) = snapshot.clone();

        self.shared
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|listener| match listener.try_send(snapshot.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    log::trace!("Update listener full, dropping snapshot");
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            });

        if let Some(publisher) = &self.publisher {
            let body = codec::encode_snapshot(snapshot);
            if changed {
                publisher.publish(topics::DEVICE_STATE, &body);
            }
            publisher.publish(topics::DEVICES_UPDATED, &body);
        }
    }
}
