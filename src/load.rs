//! Load probes consulted before work starts.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::config::LoadThresholds;

/// Answers "is the system too busy to start new work?".
#[async_trait]
pub trait LoadProbe: Send + Sync {
    /// Returns true when CPU usage exceeds `cpu_threshold_percent` or the
    /// free-memory ratio drops below `min_free_memory_ratio`.
    ///
    /// Implementations fail open: if sampling fails they report `false`.
    async fn is_overloaded(&self, cpu_threshold_percent: f64, min_free_memory_ratio: f64) -> bool;

    async fn check(&self, thresholds: LoadThresholds) -> bool {
        self.is_overloaded(thresholds.max_cpu_percent, thresholds.min_free_memory_ratio)
            .await
    }
}

/// Probe whose answer is set explicitly.
#[derive(Default)]
pub struct ManualLoadProbe {
    overloaded: AtomicBool,
    checks: AtomicUsize,
}

impl ManualLoadProbe {
    pub fn new(overloaded: bool) -> Self {
        Self {
            overloaded: AtomicBool::new(overloaded),
            checks: AtomicUsize::new(0),
        }
    }

    pub fn set_overloaded(&self, overloaded: bool) {
        self.overloaded.store(overloaded, Ordering::SeqCst);
    }

    /// How many times the probe has been consulted.
    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LoadProbe for ManualLoadProbe {
    async fn is_overloaded(&self, _cpu: f64, _mem: f64) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.overloaded.load(Ordering::SeqCst)
    }
}

#[derive(Debug, thiserror::Error)]
enum SampleError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("malformed {0}")]
    Malformed(&'static str),
}

/// CPU counters from the aggregate line of `/proc/stat`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct CpuTimes {
    idle: u64,
    total: u64,
}

/// Probe backed by the Linux `/proc` filesystem.
///
/// CPU usage is the busy share between two `/proc/stat` samples taken
/// `sample_window` apart; free memory is `MemAvailable / MemTotal` from
/// `/proc/meminfo`.
pub struct SystemLoadProbe {
    proc_root: PathBuf,
    sample_window: Duration,
}

impl SystemLoadProbe {
    pub fn new() -> Self {
        Self::with_root("/proc", Duration::from_millis(200))
    }

    /// Read from an alternative proc root.
    pub fn with_root(proc_root: impl Into<PathBuf>, sample_window: Duration) -> Self {
        Self {
            proc_root: proc_root.into(),
            sample_window,
        }
    }

    async fn sample(&self) -> Result<(f64, f64), SampleError> {
        let stat = self.proc_root.join("stat");
        let before = parse_cpu_times(&read(&stat).await?)?;
        tokio::time::sleep(self.sample_window).await;
        let after = parse_cpu_times(&read(&stat).await?)?;

        let free_ratio = parse_free_memory_ratio(&read(&self.proc_root.join("meminfo")).await?)?;
        Ok((cpu_busy_percent(before, after), free_ratio))
    }
}

impl Default for SystemLoadProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LoadProbe for SystemLoadProbe {
    async fn is_overloaded(&self, cpu_threshold_percent: f64, min_free_memory_ratio: f64) -> bool {
        let (cpu_percent, free_ratio) = match self.sample().await {
            Ok(sample) => sample,
            Err(e) => {
                error!(error = %e, "Failed to sample system load, treating as not overloaded");
                return false;
            }
        };

        let cpu_overloaded = cpu_percent > cpu_threshold_percent;
        let memory_overloaded = free_ratio < min_free_memory_ratio;

        if cpu_overloaded {
            warn!(
                cpu_percent = %format!("{cpu_percent:.2}"),
                threshold = cpu_threshold_percent,
                "CPU usage high"
            );
        }
        if memory_overloaded {
            warn!(
                free_ratio = %format!("{free_ratio:.2}"),
                threshold = min_free_memory_ratio,
                "Free memory ratio low"
            );
        }
        debug!(cpu_percent, free_ratio, "System load sampled");

        cpu_overloaded || memory_overloaded
    }
}

async fn read(path: &Path) -> Result<String, SampleError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| SampleError::Read {
            path: path.display().to_string(),
            source,
        })
}

fn parse_cpu_times(stat: &str) -> Result<CpuTimes, SampleError> {
    let line = stat
        .lines()
        .find(|l| l.starts_with("cpu "))
        .ok_or(SampleError::Malformed("/proc/stat"))?;

    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(str::parse)
        .collect::<Result<_, _>>()
        .map_err(|_| SampleError::Malformed("/proc/stat"))?;
    if fields.len() < 4 {
        return Err(SampleError::Malformed("/proc/stat"));
    }

    // user nice system idle iowait irq softirq steal; guest time is already
    // counted in user/nice.
    let total: u64 = fields.iter().take(8).sum();
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    Ok(CpuTimes { idle, total })
}

fn cpu_busy_percent(before: CpuTimes, after: CpuTimes) -> f64 {
    let total = after.total.saturating_sub(before.total);
    if total == 0 {
        return 0.0;
    }
    let idle = after.idle.saturating_sub(before.idle).min(total);
    (total - idle) as f64 / total as f64 * 100.0
}

fn parse_free_memory_ratio(meminfo: &str) -> Result<f64, SampleError> {
    let field = |name: &str| {
        meminfo
            .lines()
            .find(|l| l.starts_with(name))
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|v| v.parse::<u64>().ok())
    };

    let total = field("MemTotal:").ok_or(SampleError::Malformed("/proc/meminfo"))?;
    let available = field("MemAvailable:")
        .or_else(|| field("MemFree:"))
        .ok_or(SampleError::Malformed("/proc/meminfo"))?;
    if total == 0 {
        return Err(SampleError::Malformed("/proc/meminfo"));
    }
    Ok(available as f64 / total as f64)
}
