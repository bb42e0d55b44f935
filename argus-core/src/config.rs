//! Engine configuration
//!
//! Deserializable with serde; every field has a default so a config file
//! only needs to name what it overrides. `validate` normalizes the config
//! and logs warnings for the suspicious-but-legal cases instead of
//! rejecting them.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Default disk↔cpu link bandwidth (comparative units).
pub const DEFAULT_DISK_CPU_BANDWIDTH: u32 = 500;

/// Default cpu↔gpu (PCIe) link bandwidth.
pub const DEFAULT_CPU_GPU_BANDWIDTH: u32 = 12_000;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Task routing mode. Only `simple` is supported; historical names
    /// all reduce to it.
    pub scheduler_mode: String,
    /// GPU device ids used for search.
    pub gpu_search_pool: Vec<i64>,
    /// GPU device ids used for index build.
    pub gpu_build_pool: Vec<i64>,
    /// Memory-map index files on load instead of buffered reads.
    pub enable_mmap: bool,
    /// Staging directory for memory-mapped files.
    pub mmap_dir: Option<PathBuf>,
    /// Root directory for index files; unset disables build/load jobs.
    pub index_root: Option<PathBuf>,
    pub disk_cpu_bandwidth: u32,
    pub cpu_gpu_bandwidth: u32,
    /// Executor threads on the cpu resource (loaders stay at one).
    pub cpu_executor_threads: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scheduler_mode: "simple".to_string(),
            gpu_search_pool: Vec::new(),
            gpu_build_pool: Vec::new(),
            enable_mmap: false,
            mmap_dir: None,
            index_root: None,
            disk_cpu_bandwidth: DEFAULT_DISK_CPU_BANDWIDTH,
            cpu_gpu_bandwidth: DEFAULT_CPU_GPU_BANDWIDTH,
            cpu_executor_threads: num_cpus::get().max(1),
        }
    }
}

impl EngineConfig {
    /// Normalize and sanity-check. Returns the effective config.
    pub fn validate(mut self) -> Result<Self> {
        if self.scheduler_mode != "simple" {
            log::warn!(
                "[config] unknown scheduler mode {:?}, falling back to simple",
                self.scheduler_mode
            );
            self.scheduler_mode = "simple".to_string();
        }
        if self.disk_cpu_bandwidth == 0 || self.cpu_gpu_bandwidth == 0 {
            return Err(Error::Config("link bandwidth must be positive".into()));
        }
        if self.cpu_executor_threads == 0 {
            log::warn!("[config] cpu_executor_threads was 0, using 1");
            self.cpu_executor_threads = 1;
        }
        if self.mmap_dir.is_some() && !self.enable_mmap {
            log::warn!("[config] mmap_dir is set but enable_mmap is false; ignoring it");
        }

        dedup_in_place(&mut self.gpu_search_pool, "search");
        dedup_in_place(&mut self.gpu_build_pool, "build");

        // devices only in the build pool still join the graph as
        // independent gpu resources; flag them so an unintended pool
        // split is visible
        let build_only: Vec<i64> = self
            .gpu_build_pool
            .iter()
            .copied()
            .filter(|id| !self.gpu_search_pool.contains(id))
            .collect();
        if !build_only.is_empty() {
            log::warn!(
                "[config] gpu devices {:?} are build-only; they join the resource graph \
                 as independent gpu resources",
                build_only
            );
        }
        let shared: Vec<i64> = self
            .gpu_build_pool
            .iter()
            .copied()
            .filter(|id| self.gpu_search_pool.contains(id))
            .collect();
        if !shared.is_empty() {
            log::debug!(
                "[config] gpu devices {:?} are shared between search and build",
                shared
            );
        }

        Ok(self)
    }

    /// Devices only present in the build pool.
    pub fn build_only_gpus(&self) -> Vec<i64> {
        self.gpu_build_pool
            .iter()
            .copied()
            .filter(|id| !self.gpu_search_pool.contains(id))
            .collect()
    }

    /// Every configured GPU device id, search pool first.
    pub fn all_gpus(&self) -> Vec<i64> {
        let mut devices = self.gpu_search_pool.clone();
        devices.extend(self.build_only_gpus());
        devices
    }
}

fn dedup_in_place(pool: &mut Vec<i64>, label: &str) {
    let before = pool.len();
    let mut seen = rustc_hash::FxHashSet::default();
    pool.retain(|id| seen.insert(*id));
    if pool.len() != before {
        log::warn!("[config] duplicate device ids removed from the {} pool", label);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.scheduler_mode, "simple");
        assert_eq!(config.disk_cpu_bandwidth, 500);
        assert_eq!(config.cpu_gpu_bandwidth, 12_000);
        assert!(config.gpu_search_pool.is_empty());
        assert!(config.cpu_executor_threads >= 1);
    }

    #[test]
    fn test_unknown_mode_reduces_to_simple() {
        let config = EngineConfig {
            scheduler_mode: "optimized".to_string(),
            ..Default::default()
        };
        let config = config.validate().unwrap();
        assert_eq!(config.scheduler_mode, "simple");
    }

    #[test]
    fn test_zero_bandwidth_rejected() {
        let config = EngineConfig {
            disk_cpu_bandwidth: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pools_dedup_and_build_only() {
        let config = EngineConfig {
            gpu_search_pool: vec![0, 1, 1],
            gpu_build_pool: vec![1, 2],
            ..Default::default()
        };
        let config = config.validate().unwrap();
        assert_eq!(config.gpu_search_pool, vec![0, 1]);
        assert_eq!(config.build_only_gpus(), vec![2]);
        assert_eq!(config.all_gpus(), vec![0, 1, 2]);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"gpu_search_pool": [0], "enable_mmap": true}"#).unwrap();
        assert_eq!(config.gpu_search_pool, vec![0]);
        assert!(config.enable_mmap);
        assert_eq!(config.disk_cpu_bandwidth, 500);
    }
}
