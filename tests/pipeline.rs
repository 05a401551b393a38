//! End-to-end: registry -> codec -> transport -> feed.

use std::time::{Duration, Instant};
use vrstate::codec::{decode_snapshot, encode_snapshot};
use vrstate::sim::{SimulatedHandle, SimulatedRuntime};
use vrstate::{
    topics, DeviceClass, DeviceFeed, DevicePose, DeviceProperties, DeviceRegistry, Dispatcher,
    FeedConfig, Publisher, Snapshot, Subscriber, Tracker, TrackerConfig, TrackingResult,
    VrStateError,
};

const WAIT: Duration = Duration::from_secs(5);

fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached");
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn controller_pose() -> DevicePose {
    DevicePose {
        matrix: [
            [0.0, -1.0, 0.0, 0.3],
            [1.0, 0.0, 0.0, 1.2],
            [0.0, 0.0, 1.0, -0.4],
        ],
        velocity: [0.5, 0.0, -0.25],
        angular_velocity: [0.0, 3.0, 0.0],
        valid: true,
        tracking_result: TrackingResult::RunningOutOfRange,
    }
}

#[test]
fn test_hmd_without_pose_round_trips() {
    let mut registry = DeviceRegistry::new();
    registry.upsert(0, DeviceProperties::new(DeviceClass::Hmd));

    let decoded = decode_snapshot(&encode_snapshot(&registry.snapshot())).unwrap();
    assert_eq!(decoded.len(), 1);
    assert_eq!(decoded[0].slot, 0);
    assert_eq!(decoded[0].class, DeviceClass::Hmd);
    assert_eq!(decoded[0].pose, None);
}

#[test]
fn test_controller_pose_round_trips() {
    let mut registry = DeviceRegistry::new();
    registry.upsert(2, DeviceProperties::new(DeviceClass::Controller));
    assert!(registry.apply_pose(2, controller_pose()));

    let decoded = decode_snapshot(&encode_snapshot(&registry.snapshot())).unwrap();
    assert_eq!(decoded[0].slot, 2);
    assert_eq!(decoded[0].pose, Some(controller_pose()));
}

#[test]
fn test_second_upsert_wins() {
    let mut registry = DeviceRegistry::new();
    registry.upsert(
        3,
        DeviceProperties::new(DeviceClass::GenericTracker).with_manufacturer("HTC"),
    );
    registry.upsert(
        3,
        DeviceProperties::new(DeviceClass::GenericTracker).with_manufacturer("Tundra"),
    );

    let decoded = decode_snapshot(&encode_snapshot(&registry.snapshot())).unwrap();
    assert_eq!(decoded.len(), 1);
    assert_eq!(decoded[0].manufacturer, "Tundra");
}

#[test]
fn test_late_subscriber_gets_no_replay() {
    let publisher = Publisher::bind("tcp://127.0.0.1:0").unwrap();
    let address = publisher.local_endpoint().to_string();

    assert_eq!(publisher.publish(topics::DEVICES_UPDATED, b"first"), 0);
    assert_eq!(publisher.publish(topics::DEVICES_UPDATED, b"second"), 0);

    let mut subscriber = Subscriber::connect(&address).unwrap();
    subscriber.subscribe(topics::DEVICES).unwrap();
    wait_until(|| publisher.subscription_count() == 1);

    assert_eq!(publisher.publish(topics::DEVICES_UPDATED, b"third"), 1);
    let (topic, body) = subscriber.receive_timeout(WAIT).unwrap();
    assert_eq!(topic, topics::DEVICES_UPDATED);
    assert_eq!(body, b"third");
    assert!(matches!(
        subscriber.receive_timeout(Duration::from_millis(50)),
        Err(VrStateError::Timeout)
    ));
}

#[test]
fn test_messages_arrive_in_publish_order() {
    let publisher = Publisher::bind("tcp://127.0.0.1:0").unwrap();
    let mut subscriber = Subscriber::connect(&publisher.local_endpoint().to_string()).unwrap();
    subscriber.subscribe("").unwrap();
    wait_until(|| publisher.subscription_count() == 1);

    for i in 0u32..50 {
        publisher.publish(topics::DEVICE_STATE, &i.to_ne_bytes());
    }
    for i in 0u32..50 {
        let (_, body) = subscriber.receive_timeout(WAIT).unwrap();
        assert_eq!(body, i.to_ne_bytes());
    }
}

#[test]
fn test_tracker_feeds_remote_consumer() {
    let handle = SimulatedHandle::new();
    handle.insert(
        0,
        DeviceProperties::new(DeviceClass::Hmd).with_manufacturer("Valve"),
    );
    handle.insert(1, DeviceProperties::new(DeviceClass::Controller));

    let config = TrackerConfig {
        publish_address: Some("tcp://127.0.0.1:0".into()),
        cycle_interval: Duration::from_millis(2),
        ..TrackerConfig::default()
    };
    let runtime_handle = handle.clone();
    let tracker = Tracker::start(config, move || SimulatedRuntime::init(&runtime_handle)).unwrap();
    tracker.wait_ready(WAIT).unwrap();
    let endpoint = tracker.publish_endpoint().unwrap().to_string();

    let (poster, dispatcher) = Dispatcher::<Vec<Snapshot>>::channel();
    let feed = DeviceFeed::connect(
        &FeedConfig {
            address: endpoint,
            topic_prefix: topics::DEVICES_UPDATED.into(),
        },
        poster,
        |seen: &mut Vec<Snapshot>, snapshot| seen.push(snapshot),
    )
    .unwrap();
    feed.wait_ready(WAIT).unwrap();

    handle.set_pose(1, controller_pose());
    let mut seen: Vec<Snapshot> = Vec::new();
    let deadline = Instant::now() + WAIT;
    loop {
        dispatcher.run_timeout(&mut seen, WAIT).unwrap();
        let posed = seen
            .last()
            .and_then(|s| vrstate::find_slot(s, 1))
            .and_then(|d| d.pose);
        if posed == Some(controller_pose()) {
            break;
        }
        assert!(Instant::now() < deadline, "pose never reached the consumer");
    }

    let latest = feed.devices();
    assert_eq!(latest.len(), 2);
    assert!(latest[0].is_hmd());
    assert_eq!(latest[0].manufacturer, "Valve");

    feed.stop();
    tracker.stop();
}
