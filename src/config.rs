use crate::topics;
use crate::types::TrackingUniverse;
use std::time::Duration;

pub const DEFAULT_PUBLISH_ADDRESS: &str = "tcp://127.0.0.1:5555";

/// ~60 Hz.
pub const DEFAULT_CYCLE_INTERVAL: Duration = Duration::from_millis(16);

/// Producer-side settings.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    /// Where snapshots are published. `None` keeps the tracker local-only.
    pub publish_address: Option<String>,
    /// Sleep between tracking cycles.
    pub cycle_interval: Duration,
    pub universe: TrackingUniverse,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            publish_address: Some(DEFAULT_PUBLISH_ADDRESS.to_string()),
            cycle_interval: DEFAULT_CYCLE_INTERVAL,
            universe: TrackingUniverse::Standing,
        }
    }
}

impl TrackerConfig {
    /// Defaults overridden by `VRSTATE_PUBLISH_ADDR`, `VRSTATE_CYCLE_MS` and
    /// `VRSTATE_UNIVERSE`. `VRSTATE_PUBLISH_ADDR=off` disables publishing.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let address = read_env_string("VRSTATE_PUBLISH_ADDR", DEFAULT_PUBLISH_ADDRESS);
        let universe = read_env_string("VRSTATE_UNIVERSE", "standing");
        Self {
            publish_address: (address != "off").then_some(address),
            cycle_interval: Duration::from_millis(read_env_u64(
                "VRSTATE_CYCLE_MS",
                defaults.cycle_interval.as_millis() as u64,
            )),
            universe: parse_universe(&universe).unwrap_or_else(|| {
                log::warn!("Unknown VRSTATE_UNIVERSE='{}', using standing", universe);
                defaults.universe
            }),
        }
    }

    /// Local-only tracker, used by tests.
    pub fn unpublished() -> Self {
        Self {
            publish_address: None,
            ..Self::default()
        }
    }
}

/// Consumer-side settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedConfig {
    pub address: String,
    pub topic_prefix: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_PUBLISH_ADDRESS.to_string(),
            topic_prefix: topics::DEVICES_UPDATED.to_string(),
        }
    }
}

impl FeedConfig {
    /// Defaults overridden by `VRSTATE_PUBLISH_ADDR` and `VRSTATE_TOPIC_PREFIX`.
    pub fn from_env() -> Self {
        Self {
            address: read_env_string("VRSTATE_PUBLISH_ADDR", DEFAULT_PUBLISH_ADDRESS),
            topic_prefix: std::env::var("VRSTATE_TOPIC_PREFIX")
                .ok()
                .map(|v| v.trim().to_string())
                .unwrap_or_else(|| topics::DEVICES_UPDATED.to_string()),
        }
    }
}

pub fn parse_universe(value: &str) -> Option<TrackingUniverse> {
    match value.trim().to_ascii_lowercase().as_str() {
        "seated" => Some(TrackingUniverse::Seated),
        "standing" => Some(TrackingUniverse::Standing),
        "raw" | "raw-and-uncalibrated" => Some(TrackingUniverse::RawAndUncalibrated),
        _ => None,
    }
}

fn read_env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn read_env_string(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TrackerConfig::default();
        assert_eq!(config.publish_address.as_deref(), Some("tcp://127.0.0.1:5555"));
        assert_eq!(config.cycle_interval, Duration::from_millis(16));
        assert_eq!(FeedConfig::default().topic_prefix, "vr.devices.updated");
        assert_eq!(TrackerConfig::unpublished().publish_address, None);
    }

    #[test]
    fn test_parse_universe() {
        assert_eq!(parse_universe(" Seated "), Some(TrackingUniverse::Seated));
        assert_eq!(parse_universe("raw"), Some(TrackingUniverse::RawAndUncalibrated));
        assert_eq!(parse_universe("orbit"), None);
    }

    #[test]
    fn test_env_helpers_fall_back() {
        std::env::set_var("VRSTATE_TEST_U64_BAD", "sixteen");
        std::env::set_var("VRSTATE_TEST_U64_GOOD", " 33 ");
        std::env::set_var("VRSTATE_TEST_STR_EMPTY", "   ");
        assert_eq!(read_env_u64("VRSTATE_TEST_U64_BAD", 16), 16);
        assert_eq!(read_env_u64("VRSTATE_TEST_U64_GOOD", 16), 33);
        assert_eq!(read_env_u64("VRSTATE_TEST_U64_MISSING", 7), 7);
        assert_eq!(read_env_string("VRSTATE_TEST_STR_EMPTY", "x"), "x");
    }
}
