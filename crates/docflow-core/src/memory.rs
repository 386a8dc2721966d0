//! Process memory readings and the pre-batch memory check.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::MemoryConfig;
use crate::{Error, Result};

/// Gatekeeper consulted before memory-heavy work (embedding batches, job starts).
pub trait MemoryManager: Send + Sync {
    /// `Ok(())` when there is headroom, `Err(Error::MemoryPressure)` otherwise.
    fn check_memory(&self) -> Result<()>;

    /// Current readings, for logging.
    fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot::capture()
    }
}

/// Point-in-time memory readings. Zero means "unknown on this platform".
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MemorySnapshot {
    /// Resident set size of this process in bytes.
    pub rss_bytes: u64,
    /// Available system RAM in bytes.
    pub available_bytes: u64,
}

impl MemorySnapshot {
    pub fn capture() -> Self {
        Self {
            rss_bytes: process_rss(),
            available_bytes: available_ram(),
        }
    }

    pub fn rss_mb(&self) -> u64 {
        self.rss_bytes / (1024 * 1024)
    }

    pub fn available_mb(&self) -> u64 {
        self.available_bytes / (1024 * 1024)
    }
}

/// Memory manager backed by `/proc` readings.
pub struct SystemMemory {
    config: MemoryConfig,
}

impl SystemMemory {
    pub fn new(config: MemoryConfig) -> Self {
        Self { config }
    }

    fn evaluate(&self, snap: MemorySnapshot) -> Result<()> {
        if snap.rss_bytes > 0 && snap.rss_mb() > self.config.max_rss_mb {
            warn!(
                rss_mb = snap.rss_mb(),
                limit_mb = self.config.max_rss_mb,
                "Process memory above budget"
            );
            return Err(Error::MemoryPressure(format!(
                "rss {}MB exceeds budget {}MB",
                snap.rss_mb(),
                self.config.max_rss_mb
            )));
        }
        if snap.available_bytes > 0 && snap.available_mb() < self.config.min_available_mb {
            warn!(
                available_mb = snap.available_mb(),
                floor_mb = self.config.min_available_mb,
                "System memory below floor"
            );
            return Err(Error::MemoryPressure(format!(
                "available {}MB below floor {}MB",
                snap.available_mb(),
                self.config.min_available_mb
            )));
        }
        Ok(())
    }
}

impl MemoryManager for SystemMemory {
    fn check_memory(&self) -> Result<()> {
        self.evaluate(MemorySnapshot::capture())
    }
}

fn read_kb_field(path: &str, field: &str) -> u64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(contents) = std::fs::read_to_string(path) {
            for line in contents.lines() {
                if line.starts_with(field) {
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        if let Ok(kb) = kb_str.parse::<u64>() {
                            return kb * 1024;
                        }
                    }
                }
            }
        }
        0
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = (path, field);
        0
    }
}

fn process_rss() -> u64 {
    read_kb_field("/proc/self/status", "VmRSS:")
}

fn available_ram() -> u64 {
    read_kb_field("/proc/meminfo", "MemAvailable:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_readings_pass() {
        let mem = SystemMemory::new(MemoryConfig::default());
        assert!(mem.evaluate(MemorySnapshot::default()).is_ok());
    }

    #[test]
    fn test_rss_over_budget_rejects() {
        let mem = SystemMemory::new(MemoryConfig {
            max_rss_mb: 100,
            min_available_mb: 0,
        });
        let snap = MemorySnapshot {
            rss_bytes: 200 * 1024 * 1024,
            available_bytes: 0,
        };
        assert!(matches!(mem.evaluate(snap), Err(Error::MemoryPressure(_))));
    }

    #[test]
    fn test_low_available_rejects() {
        let mem = SystemMemory::new(MemoryConfig {
            max_rss_mb: 4096,
            min_available_mb: 512,
        });
        let snap = MemorySnapshot {
            rss_bytes: 10 * 1024 * 1024,
            available_bytes: 100 * 1024 * 1024,
        };
        assert!(mem.evaluate(snap).is_err());
    }
}
