//! Run a tracker against the simulated runtime and publish its snapshots.
//!
//! Usage: cargo run --example publisher
//! Env: VRSTATE_PUBLISH_ADDR, VRSTATE_CYCLE_MS, VRSTATE_UNIVERSE
//! Press Ctrl+C to stop.

use std::time::{Duration, Instant};
use vrstate::sim::{SimulatedHandle, SimulatedRuntime};
use vrstate::{
    ControllerRole, DeviceClass, DevicePose, DeviceProperties, Tracker, TrackerConfig,
    TrackingResult, TrackingStyle,
};

fn main() {
    env_logger::init();

    let config = TrackerConfig::from_env();
    let handle = SimulatedHandle::new();
    handle.insert(
        0,
        DeviceProperties::new(DeviceClass::Hmd)
            .with_manufacturer("Valve")
            .with_model("Index")
            .with_serial("LHR-0000HMD0")
            .with_tracking_style(TrackingStyle::Lighthouse),
    );
    for (slot, role, serial) in [
        (1, ControllerRole::LeftHand, "LHR-0000CTL1"),
        (2, ControllerRole::RightHand, "LHR-0000CTL2"),
    ] {
        handle.insert(
            slot,
            DeviceProperties::new(DeviceClass::Controller)
                .with_manufacturer("Valve")
                .with_model("Knuckles")
                .with_serial(serial)
                .with_role(role),
        );
    }
    handle.insert(
        3,
        DeviceProperties::new(DeviceClass::TrackingReference)
            .with_manufacturer("Valve")
            .with_model("Base Station 2.0")
            .with_serial("LHB-00000003"),
    );

    let runtime_handle = handle.clone();
    let tracker = match Tracker::start(config, move || SimulatedRuntime::init(&runtime_handle)) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Failed to start tracker: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = tracker.wait_ready(Duration::from_secs(5)) {
        eprintln!("Tracker never became ready: {}", e);
        std::process::exit(1);
    }

    match tracker.publish_endpoint() {
        Some(endpoint) => println!(
            "Publishing {} device(s) on {}",
            tracker.devices().len(),
            endpoint
        ),
        None => println!("Publishing disabled, tracking locally"),
    }
    println!("Animating poses (Ctrl+C to stop)...");

    let start = Instant::now();
    let mut last_report = Instant::now();
    while tracker.is_active() {
        let t = start.elapsed().as_secs_f32();
        handle.set_pose(0, orbit(t, 0.0, 1.7, 0.0));
        handle.set_pose(1, orbit(t * 2.0, -0.25, 1.1, 0.15));
        handle.set_pose(2, orbit(t * 2.0, 0.25, 1.1, 0.15));

        let now = Instant::now();
        if now.duration_since(last_report) >= Duration::from_secs(3) {
            let devices = tracker.devices();
            let tracked = devices
                .iter()
                .filter(|d| d.pose.map(|p| p.valid).unwrap_or(false))
                .count();
            println!(
                "--- {} device(s), {} tracked, {:.1}s ---",
                devices.len(),
                tracked,
                start.elapsed().as_secs_f64()
            );
            last_report = now;
        }
        std::thread::sleep(Duration::from_millis(8));
    }

    eprintln!("Tracking loop terminated");
}

/// Small circle in the horizontal plane around (`x`, `y`, `z`).
fn orbit(t: f32, x: f32, y: f32, z: f32) -> DevicePose {
    let (s, c) = t.sin_cos();
    DevicePose {
        matrix: [
            [c, 0.0, s, x + 0.1 * c],
            [0.0, 1.0, 0.0, y],
            [-s, 0.0, c, z + 0.1 * s],
        ],
        velocity: [-0.1 * s, 0.0, 0.1 * c],
        angular_velocity: [0.0, 1.0, 0.0],
        valid: true,
        tracking_result: TrackingResult::RunningOk,
    }
}
