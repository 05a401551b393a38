//! # vrstate - live VR device state for same-machine consumers
//!
//! One privileged process owns the VR runtime connection and streams the state
//! of every tracked device (HMD, controllers, trackers, base stations) to any
//! number of consumer processes at the runtime's update rate. Provides:
//! - A tracking loop that reconciles hot-plug/property events with per-cycle pose sampling
//! - A blitting wire codec for same-binary transport of device snapshots
//! - Topic-based publish/subscribe over loopback TCP
//! - A dispatcher that funnels cross-thread work onto one owning thread
//!
//! ## Quick Start
//! ```no_run
//! use vrstate::{Dispatcher, DeviceFeed, FeedConfig, Snapshot, Tracker, TrackerConfig};
//! use vrstate::sim::{SimulatedHandle, SimulatedRuntime};
//! use std::time::Duration;
//!
//! // Producer
//! let handle = SimulatedHandle::new();
//! let tracker =
//!     Tracker::start(TrackerConfig::default(), move || SimulatedRuntime::init(&handle)).unwrap();
//! tracker.wait_ready(Duration::from_secs(1)).unwrap();
//!
//! // Consumer
//! let (poster, dispatcher) = Dispatcher::<Vec<Snapshot>>::channel();
//! let feed = DeviceFeed::connect(&FeedConfig::default(), poster, |seen: &mut Vec<Snapshot>, s| {
//!     seen.push(s)
//! })
//! .unwrap();
//! let mut seen = Vec::new();
//! dispatcher.run_timeout(&mut seen, Duration::from_secs(1)).unwrap();
//! println!("{} device(s)", feed.devices().len());
//! ```

pub mod error;
pub mod types;
pub mod codec;
pub mod registry;
pub mod runtime;
pub mod sim;
pub mod dispatch;
pub mod transport;
pub mod topics;
pub mod config;
pub mod tracker;
pub mod feed;

pub use error::VrStateError;
pub use types::*;
pub use config::{FeedConfig, TrackerConfig};
pub use dispatch::{Dispatcher, Poster};
pub use feed::DeviceFeed;
pub use registry::{DeviceProperties, DeviceRegistry};
pub use runtime::{PoseSample, RuntimeEvent, StringProperty, VrRuntime};
pub use tracker::{Tracker, TrackerState};
pub use transport::{Endpoint, Publisher, Subscriber};

/// Result type alias for vrstate operations.
pub type Result<T> = std::result::Result<T, VrStateError>;
