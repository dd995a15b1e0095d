use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use tokio::time::Duration;

use crate::error::ConfigError;
use crate::ingest::{BoundedBackoff, IngestSettings};
use crate::serial::link::DEFAULT_MAX_LINE_LEN;
use crate::serial::{LineProtocol, LinkSettings};

#[cfg(windows)]
const DEFAULT_SERIAL_PORT: &str = "COM3";
#[cfg(not(windows))]
const DEFAULT_SERIAL_PORT: &str = "/dev/ttyUSB0";

const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Everything the ingestion service needs, read from the environment
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub link: LinkSettings,
    pub ingest: IngestSettings,
    pub reconnect: BoundedBackoff,
    pub protocol: LineProtocol,
    pub model_path: Option<PathBuf>,
    pub output_file: Option<PathBuf>,
    pub replay_file: Option<PathBuf>,
    pub probe_window: Option<Duration>,
}

impl AppConfig {
    pub fn new() -> Result<Self, ConfigError> {
        // Load environment variables
        dotenv::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key lookup (the process environment
    /// in production, a map in tests)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = lookup("SACI_SERIAL_PORT").unwrap_or_else(|| DEFAULT_SERIAL_PORT.to_string());
        let baud_rate: u32 = parse_or(&lookup, "SACI_BAUD_RATE", DEFAULT_BAUD_RATE)?;
        if baud_rate == 0 {
            return Err(invalid("SACI_BAUD_RATE", "0", "baud rate must be positive"));
        }

        let read_timeout = millis_or(&lookup, "SACI_READ_TIMEOUT_MS", 2000)?;
        if read_timeout.is_zero() {
            return Err(invalid("SACI_READ_TIMEOUT_MS", "0", "read timeout must be positive"));
        }

        let max_line_len: usize = parse_or(&lookup, "SACI_MAX_LINE_LEN", DEFAULT_MAX_LINE_LEN)?;
        if max_line_len == 0 {
            return Err(invalid("SACI_MAX_LINE_LEN", "0", "line length limit must be positive"));
        }

        let link = LinkSettings {
            settle_delay: millis_or(&lookup, "SACI_SETTLE_DELAY_MS", 2000)?,
            max_line_len,
            ..LinkSettings::new(port, baud_rate, read_timeout)
        };

        let mut ingest = IngestSettings {
            idle_interval: millis_or(&lookup, "SACI_IDLE_INTERVAL_MS", 100)?,
            fault_pause: millis_or(&lookup, "SACI_FAULT_PAUSE_MS", 2000)?,
            ..IngestSettings::default()
        };
        if let Some(prefixes) = lookup("SACI_SUPPRESSED_PREFIXES") {
            ingest.suppressed_prefixes = prefixes
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
        }

        let reconnect = BoundedBackoff {
            max_attempts: parse_or(&lookup, "SACI_RECONNECT_MAX_ATTEMPTS", 5)?,
            base: millis_or(&lookup, "SACI_RECONNECT_BACKOFF_MS", 1000)?,
            max: millis_or(&lookup, "SACI_RECONNECT_MAX_BACKOFF_MS", 30_000)?,
        };

        let mut protocol = LineProtocol::default();
        if let Some(token) = lookup("SACI_ERROR_TOKEN").filter(|t| !t.trim().is_empty()) {
            protocol.error_token = token.trim().to_string();
        }

        let probe_window = match lookup("SACI_PROBE_SECS") {
            Some(value) => Some(Duration::from_secs(parse_value("SACI_PROBE_SECS", &value)?)),
            None => None,
        };

        Ok(AppConfig {
            link,
            ingest,
            reconnect,
            protocol,
            model_path: path_var(&lookup, "SACI_MODEL_PATH"),
            output_file: path_var(&lookup, "SACI_OUTPUT_FILE"),
            replay_file: path_var(&lookup, "SACI_REPLAY_FILE"),
            probe_window,
        })
    }
}

fn invalid(key: &str, value: &str, reason: impl Display) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_value<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    value.trim().parse().map_err(|e| invalid(key, value, e))
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => parse_value(key, &value),
        None => Ok(default),
    }
}

fn millis_or<F>(lookup: &F, key: &str, default_ms: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_or(lookup, key, default_ms).map(Duration::from_millis)
}

fn path_var<F>(lookup: &F, key: &str) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_match_sensor_node() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.link.port, DEFAULT_SERIAL_PORT);
        assert_eq!(cfg.link.baud_rate, 115_200);
        assert_eq!(cfg.link.read_timeout, Duration::from_secs(2));
        assert_eq!(cfg.link.settle_delay, Duration::from_secs(2));
        assert_eq!(cfg.link.max_line_len, 4096);
        assert_eq!(cfg.ingest, IngestSettings::default());
        assert_eq!(cfg.reconnect.max_attempts, 5);
        assert_eq!(cfg.protocol, LineProtocol::default());
        assert!(cfg.model_path.is_none());
        assert!(cfg.replay_file.is_none());
        assert!(cfg.probe_window.is_none());
    }

    #[test]
    fn reads_overrides() {
        let cfg = config(&[
            ("SACI_SERIAL_PORT", "/dev/ttyS0"),
            ("SACI_BAUD_RATE", "9600"),
            ("SACI_READ_TIMEOUT_MS", "500"),
            ("SACI_RECONNECT_MAX_ATTEMPTS", "0"),
            ("SACI_MODEL_PATH", "models/saci.json"),
            ("SACI_OUTPUT_FILE", " "),
            ("SACI_SUPPRESSED_PREFIXES", "[INFO], DBG ,"),
            ("SACI_ERROR_TOKEN", "FAIL"),
            ("SACI_PROBE_SECS", "10"),
            ("SACI_MAX_LINE_LEN", "512"),
        ])
        .unwrap();
        assert_eq!(cfg.link.port, "/dev/ttyS0");
        assert_eq!(cfg.link.baud_rate, 9600);
        assert_eq!(cfg.link.read_timeout, Duration::from_millis(500));
        assert_eq!(cfg.reconnect.max_attempts, 0);
        assert_eq!(cfg.model_path, Some(PathBuf::from("models/saci.json")));
        assert_eq!(cfg.output_file, None);
        assert_eq!(cfg.ingest.suppressed_prefixes, vec!["[INFO]", "DBG"]);
        assert_eq!(cfg.protocol.error_token, "FAIL");
        assert_eq!(cfg.probe_window, Some(Duration::from_secs(10)));
        assert_eq!(cfg.link.max_line_len, 512);
    }

    #[test]
    fn rejects_invalid_numbers() {
        let err = config(&[("SACI_BAUD_RATE", "fast")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "SACI_BAUD_RATE"));

        assert!(config(&[("SACI_BAUD_RATE", "0")]).is_err());
        assert!(config(&[("SACI_READ_TIMEOUT_MS", "0")]).is_err());
        assert!(config(&[("SACI_IDLE_INTERVAL_MS", "-1")]).is_err());
        assert!(config(&[("SACI_MAX_LINE_LEN", "0")]).is_err());
    }
}
