//! Instance-wide operator options.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

fn default_arena_path() -> PathBuf {
    PathBuf::from("/dev/hugepages/yanet")
}

fn default_arena_size() -> usize {
    256 << 20
}

fn default_worker_count() -> usize {
    1
}

fn default_batch_size() -> usize {
    64
}

fn default_max_ring_len() -> usize {
    4096
}

fn default_heartbeat_ms() -> u64 {
    500
}

/// Options shared by the data plane and control plane of one NUMA
/// instance. Loadable from JSON for operator tooling; everything has a
/// deployable default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceOptions {
    /// Arena file location; under a hugetlbfs mount in production.
    pub arena_path: PathBuf,
    /// Arena size in bytes.
    pub arena_size: usize,
    /// Instance index within the host.
    pub instance_idx: u32,
    /// NUMA node served by this instance.
    pub numa_idx: u32,
    /// Bind arena pages to the NUMA node.
    pub numa_bind: bool,
    /// Worker threads to spawn.
    pub worker_count: usize,
    /// Devices in the data-plane topology; device ids are validated
    /// against this bound.
    pub device_count: u32,
    /// Packets drained per worker iteration.
    pub batch_size: usize,
    /// The single cap on expanded weight rings.
    pub max_ring_len: usize,
    /// Heartbeat interval; staleness cuts in at three times this.
    pub heartbeat_interval_ms: u64,
}

impl Default for InstanceOptions {
    fn default() -> Self {
        Self {
            arena_path: default_arena_path(),
            arena_size: default_arena_size(),
            instance_idx: 0,
            numa_idx: 0,
            numa_bind: false,
            worker_count: default_worker_count(),
            device_count: 1,
            batch_size: default_batch_size(),
            max_ring_len: default_max_ring_len(),
            heartbeat_interval_ms: default_heartbeat_ms(),
        }
    }
}

impl InstanceOptions {
    /// Parse options from a JSON document.
    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let opts: Self = serde_json::from_str(json).map_err(|e| ConfigError::BadOptions {
            reason: e.to_string(),
        })?;
        opts.validate()?;
        Ok(opts)
    }

    /// Check option combinations an operator can get wrong.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.worker_count == 0 || self.worker_count > riptide_shm::MAX_WORKERS {
            return Err(ConfigError::BadOptions {
                reason: format!("worker_count {} out of range", self.worker_count),
            });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::BadOptions {
                reason: "batch_size must be positive".into(),
            });
        }
        if self.max_ring_len == 0 {
            return Err(ConfigError::BadOptions {
                reason: "max_ring_len must be positive".into(),
            });
        }
        Ok(())
    }

    /// Staleness cutoff in nanoseconds (3x heartbeat).
    #[must_use]
    pub fn stale_timeout_ns(&self) -> u64 {
        self.heartbeat_interval_ms * 1_000_000 * 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_deployable() {
        let opts = InstanceOptions::default();
        opts.validate().unwrap();
        assert_eq!(opts.arena_path, PathBuf::from("/dev/hugepages/yanet"));
        assert_eq!(opts.stale_timeout_ns(), 1_500_000_000);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let opts = InstanceOptions::from_json_str(r#"{"worker_count": 4}"#).unwrap();
        assert_eq!(opts.worker_count, 4);
        assert_eq!(opts.max_ring_len, 4096);
    }

    #[test]
    fn bad_options_rejected() {
        assert!(InstanceOptions::from_json_str(r#"{"worker_count": 0}"#).is_err());
        assert!(InstanceOptions::from_json_str(r#"{"batch_size": 0}"#).is_err());
    }
}
