use std::path::PathBuf;
use std::time::Duration;

use uuid::Uuid;

use crate::errors::{ClientError, Result};

/// Sonya Watch GATT service (informational only).
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0xf0debc9a_7856_3412_7856_341278563412);
/// RX characteristic: client writes commands here.
pub const RX_UUID: Uuid = Uuid::from_u128(0xf0debc9a_7956_3412_7856_341278563412);
/// TX characteristic: watch notifies frames here.
pub const TX_UUID: Uuid = Uuid::from_u128(0xf0debc9a_7a56_3412_7856_341278563412);

pub const DEFAULT_NAME_FILTER: &str = "SONYA-WATCH";

const SCAN_TIMEOUT_MS: u64 = 6_000;
const KEEPALIVE_MS: u64 = 8_000;
const COMMAND_PACING_MS: u64 = 100;

/// Everything a session run needs besides the transport itself.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Connect to this address directly instead of scanning.
    pub address: Option<String>,
    pub name_filter: String,
    pub scan_timeout: Duration,
    pub service_uuid: Uuid,
    pub rx_uuid: Uuid,
    pub tx_uuid: Uuid,
    /// Commands sent right after subscribing.
    pub commands: Vec<String>,
    pub interactive: bool,
    /// How long one-shot mode listens after its commands.
    pub keepalive: Duration,
    /// Delay after each scripted command.
    pub pacing: Duration,
    pub audio_out: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: None,
            name_filter: DEFAULT_NAME_FILTER.to_string(),
            scan_timeout: Duration::from_millis(SCAN_TIMEOUT_MS),
            service_uuid: SERVICE_UUID,
            rx_uuid: RX_UUID,
            tx_uuid: TX_UUID,
            commands: Vec::new(),
            interactive: true,
            keepalive: Duration::from_millis(KEEPALIVE_MS),
            pacing: Duration::from_millis(COMMAND_PACING_MS),
            audio_out: None,
        }
    }
}

/// Parse a characteristic/service identifier given on the command line.
pub fn parse_uuid(field: &str, value: &str) -> Result<Uuid> {
    value
        .trim()
        .parse::<Uuid>()
        .map_err(|e| ClientError::InvalidConfig(format!("{field}: {value:?} is not a UUID ({e})")))
}

/// Convert a user-supplied number of seconds into a `Duration`.
pub fn seconds(field: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| ClientError::InvalidConfig(format!("{field}: {secs} is not a valid duration")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_watch_firmware() {
        let cfg = ClientConfig::default();
        assert_eq!(
            cfg.service_uuid.to_string(),
            "f0debc9a-7856-3412-7856-341278563412"
        );
        assert_eq!(cfg.rx_uuid.to_string(), "f0debc9a-7956-3412-7856-341278563412");
        assert_eq!(cfg.tx_uuid.to_string(), "f0debc9a-7a56-3412-7856-341278563412");
        assert_eq!(cfg.name_filter, "SONYA-WATCH");
        assert_eq!(cfg.scan_timeout, Duration::from_secs(6));
        assert_eq!(cfg.keepalive, Duration::from_secs(8));
        assert_eq!(cfg.pacing, Duration::from_millis(100));
        assert!(cfg.interactive);
    }

    #[test]
    fn parses_uuids_and_reports_bad_ones() {
        let parsed = parse_uuid("rx", " F0DEBC9A-7956-3412-7856-341278563412 ").unwrap();
        assert_eq!(parsed, RX_UUID);
        let err = parse_uuid("tx", "not-a-uuid").unwrap_err();
        assert!(matches!(err, ClientError::InvalidConfig(msg) if msg.starts_with("tx:")));
    }

    #[test]
    fn rejects_negative_durations() {
        assert_eq!(seconds("keepalive", 1.5).unwrap(), Duration::from_millis(1500));
        assert!(seconds("keepalive", -1.0).is_err());
        assert!(seconds("keepalive", f64::NAN).is_err());
    }
}
