//! Follow a remote tracker and print device state from the main thread.
//!
//! Usage: cargo run --example subscriber
//! Env: VRSTATE_PUBLISH_ADDR, VRSTATE_TOPIC_PREFIX
//! Press Ctrl+C to stop.

use std::time::{Duration, Instant};
use vrstate::{DeviceFeed, Dispatcher, FeedConfig, Snapshot};

#[derive(Default)]
struct Consumer {
    updates: u64,
    last: Option<Snapshot>,
}

fn main() {
    env_logger::init();

    let config = FeedConfig::from_env();
    // About two seconds of updates; older ones are dropped if printing falls behind.
    let (poster, dispatcher) = Dispatcher::<Consumer>::bounded(120);
    let feed = match DeviceFeed::connect(&config, poster, |consumer: &mut Consumer, snapshot| {
        consumer.updates += 1;
        consumer.last = Some(snapshot);
    }) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Failed to connect to {}: {}", config.address, e);
            std::process::exit(1);
        }
    };

    println!(
        "Listening on {} for '{}' (Ctrl+C to stop)...",
        feed.endpoint(),
        config.topic_prefix
    );

    let start = Instant::now();
    let mut last_report = Instant::now();
    let mut consumer = Consumer::default();

    loop {
        match dispatcher.run_timeout(&mut consumer, Duration::from_secs(2)) {
            Ok(0) => {
                eprintln!("No snapshot for 2s, is the publisher running?");
                continue;
            }
            Ok(_) => {}
            Err(e) if e.is_closed() => {
                eprintln!("Feed closed");
                break;
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                break;
            }
        }

        let now = Instant::now();
        if now.duration_since(last_report) < Duration::from_secs(1) {
            continue;
        }
        last_report = now;

        let elapsed = start.elapsed().as_secs_f64();
        println!(
            "--- {} updates in {:.1}s ({:.1} Hz) ---",
            consumer.updates,
            elapsed,
            consumer.updates as f64 / elapsed
        );
        if let Some(snapshot) = &consumer.last {
            for device in snapshot.iter() {
                let position = device
                    .pose
                    .map(|p| {
                        let [x, y, z] = p.position();
                        format!("[{:+.3}, {:+.3}, {:+.3}]", x, y, z)
                    })
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "  slot {:<2} {:<18} {:<10} {:<16} connected={:<5} pos={}",
                    device.slot,
                    device.class.as_str(),
                    device.manufacturer,
                    device.model,
                    device.connected,
                    position,
                );
            }
        }
    }
}
