//! Configuration types, loaded from the environment with typed defaults.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::error::ConfigError;

/// How the processor hands dequeued tasks to the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Await each execution inside the scheduling cycle. Completion follows
    /// queue order; one slow task holds up everything behind it.
    Serial,
    /// Spawn executions and keep scheduling, up to `max_in_flight` at once.
    /// Completion order may differ from queue order.
    Concurrent { max_in_flight: usize },
}

impl Default for DispatchMode {
    fn default() -> Self {
        Self::Concurrent { max_in_flight: 4 }
    }
}

/// Load thresholds handed to the load probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadThresholds {
    /// CPU usage above this percentage (0–100) counts as overloaded.
    pub max_cpu_percent: f64,
    /// Free-memory ratio (0–1) below this counts as overloaded.
    pub min_free_memory_ratio: f64,
}

impl Default for LoadThresholds {
    fn default() -> Self {
        Self {
            max_cpu_percent: 50.0,
            min_free_memory_ratio: 0.05,
        }
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct TaskConfig {
    pub thresholds: LoadThresholds,
    /// Processor polling interval.
    pub queue_check_interval: Duration,
    /// Lower bound of the simulated work delay.
    pub processing_delay_min: Duration,
    /// Upper bound of the simulated work delay.
    pub processing_delay_max: Duration,
    pub dispatch: DispatchMode,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            thresholds: LoadThresholds::default(),
            queue_check_interval: Duration::from_millis(3000),
            processing_delay_min: Duration::from_millis(2000),
            processing_delay_max: Duration::from_millis(5000),
            dispatch: DispatchMode::default(),
        }
    }
}

impl TaskConfig {
    /// Build from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let min_free_memory_ratio = parse_or(
            &lookup,
            "MIN_FREE_MEM_RATIO",
            defaults.thresholds.min_free_memory_ratio,
        );
        // Given as a ratio (0.7), stored as a percentage.
        let max_cpu_percent = parse_or(&lookup, "MAX_CPU_LOAD_PERCENT", 0.5_f64) * 100.0;

        if !(0.0..=1.0).contains(&min_free_memory_ratio) {
            warn!(
                value = min_free_memory_ratio,
                "MIN_FREE_MEM_RATIO is outside the recommended range (0-1)"
            );
        }
        if !(0.0..=100.0).contains(&max_cpu_percent) {
            warn!(
                value = max_cpu_percent,
                "MAX_CPU_LOAD_PERCENT is outside the recommended range (0-1 as a ratio)"
            );
        }

        let queue_check_interval = Duration::from_millis(parse_or(
            &lookup,
            "QUEUE_CHECK_INTERVAL_MS",
            defaults.queue_check_interval.as_millis() as u64,
        ));
        let mut delay_min = parse_or(
            &lookup,
            "PROCESSING_DELAY_MIN_MS",
            defaults.processing_delay_min.as_millis() as u64,
        );
        let mut delay_max = parse_or(
            &lookup,
            "PROCESSING_DELAY_MAX_MS",
            defaults.processing_delay_max.as_millis() as u64,
        );
        if delay_min > delay_max {
            warn!(
                min = delay_min,
                max = delay_max,
                "PROCESSING_DELAY_MIN_MS exceeds PROCESSING_DELAY_MAX_MS, swapping"
            );
            std::mem::swap(&mut delay_min, &mut delay_max);
        }

        let max_in_flight: usize = parse_or(&lookup, "TASKS_MAX_IN_FLIGHT", 4_usize).max(1);
        let dispatch = match lookup("TASKS_DISPATCH_MODE").as_deref().map(str::trim) {
            Some("serial") => DispatchMode::Serial,
            Some("concurrent") | None => DispatchMode::Concurrent { max_in_flight },
            Some(other) => {
                warn!(
                    value = other,
                    "Unknown TASKS_DISPATCH_MODE, using concurrent"
                );
                DispatchMode::Concurrent { max_in_flight }
            }
        };

        Self {
            thresholds: LoadThresholds {
                max_cpu_percent,
                min_free_memory_ratio,
            },
            queue_check_interval: queue_check_interval.max(Duration::from_millis(1)),
            processing_delay_min: Duration::from_millis(delay_min),
            processing_delay_max: Duration::from_millis(delay_max),
            dispatch,
        }
    }
}

/// Process-level settings for the binary.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// libSQL file; the in-memory store is used when unset.
    pub db_path: Option<PathBuf>,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            host: lookup("HOST")
                .filter(|h| !h.trim().is_empty())
                .unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_or(&lookup, "PORT", 3000_u16),
            db_path: lookup("TASKS_DB_PATH")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    /// Socket address to bind the HTTP server to.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ConfigError::InvalidValue {
                key: "HOST".to_string(),
                message: format!("{}: {e}", self.host),
            })
    }
}

/// Parse `key`, warning and returning `default` when it is unset or invalid.
fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, value = %raw, %default, "Failed to parse environment variable, using default");
                default
            }
        },
        _ => {
            tracing::debug!(key, %default, "Environment variable not set, using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = TaskConfig::from_lookup(lookup(&[]));
        assert_eq!(config.thresholds.max_cpu_percent, 50.0);
        assert_eq!(config.thresholds.min_free_memory_ratio, 0.05);
        assert_eq!(config.queue_check_interval, Duration::from_millis(3000));
        assert_eq!(config.processing_delay_min, Duration::from_millis(2000));
        assert_eq!(config.processing_delay_max, Duration::from_millis(5000));
        assert_eq!(
            config.dispatch,
            DispatchMode::Concurrent { max_in_flight: 4 }
        );
    }

    #[test]
    fn cpu_ratio_is_stored_as_percent() {
        let config = TaskConfig::from_lookup(lookup(&[
            ("MAX_CPU_LOAD_PERCENT", "0.7"),
            ("MIN_FREE_MEM_RATIO", "0.2"),
        ]));
        assert!((config.thresholds.max_cpu_percent - 70.0).abs() < 1e-9);
        assert_eq!(config.thresholds.min_free_memory_ratio, 0.2);
    }

    #[test]
    fn invalid_values_fall_back() {
        let config = TaskConfig::from_lookup(lookup(&[
            ("QUEUE_CHECK_INTERVAL_MS", "soon"),
            ("PROCESSING_DELAY_MIN_MS", ""),
        ]));
        assert_eq!(config.queue_check_interval, Duration::from_millis(3000));
        assert_eq!(config.processing_delay_min, Duration::from_millis(2000));
    }

    #[test]
    fn inverted_delay_bounds_are_swapped() {
        let config = TaskConfig::from_lookup(lookup(&[
            ("PROCESSING_DELAY_MIN_MS", "900"),
            ("PROCESSING_DELAY_MAX_MS", "100"),
        ]));
        assert_eq!(config.processing_delay_min, Duration::from_millis(100));
        assert_eq!(config.processing_delay_max, Duration::from_millis(900));
    }

    #[test]
    fn dispatch_mode_selection() {
        let serial = TaskConfig::from_lookup(lookup(&[("TASKS_DISPATCH_MODE", "serial")]));
        assert_eq!(serial.dispatch, DispatchMode::Serial);

        let concurrent = TaskConfig::from_lookup(lookup(&[
            ("TASKS_DISPATCH_MODE", "concurrent"),
            ("TASKS_MAX_IN_FLIGHT", "0"),
        ]));
        assert_eq!(
            concurrent.dispatch,
            DispatchMode::Concurrent { max_in_flight: 1 }
        );
    }

    #[test]
    fn server_config_from_lookup() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("PORT", "8081"),
            ("TASKS_DB_PATH", "./data/tasks.db"),
        ]));
        assert_eq!(config.port, 8081);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.db_path, Some(PathBuf::from("./data/tasks.db")));

        let config = ServerConfig::from_lookup(lookup(&[("PORT", "not-a-port")]));
        assert_eq!(config.port, 3000);
        assert!(config.db_path.is_none());
        assert_eq!(config.bind_addr().unwrap().to_string(), "127.0.0.1:3000");
    }

    #[test]
    fn unparsable_host_is_a_config_error() {
        let config = ServerConfig::from_lookup(lookup(&[("HOST", "not a host")]));
        let err = config.bind_addr().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == "HOST"));
    }
}
