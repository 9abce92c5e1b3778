//! Runtime configuration.
//!
//! Built once at process start and passed by reference into each component;
//! derived values (worker split, per-worker memory) are pure functions of the
//! struct, never cached globals.
use std::path::PathBuf;

use sysinfo::System;

/// Fraction of available memory handed to the window planner by default.
const DEFAULT_MEM_FRACTION: f64 = 0.8;

#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// CPU cores available to this run.
    pub cores: usize,
    /// Total bytes the planner may spread across all concurrent workers.
    pub memory_budget: usize,
    /// Root of per-tile scratch directories.
    pub work_root: PathBuf,
}

impl RuntimeConfig {
    /// Inspect the host and build the configuration. `workers` and
    /// `mem_fraction` override detection when given.
    pub fn detect(
        workers: Option<usize>,
        mem_fraction: Option<f64>,
        work_root: PathBuf,
    ) -> RuntimeConfig {
        let cores = workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });
        let mut sys = System::new();
        sys.refresh_memory();
        let fraction = mem_fraction.unwrap_or(DEFAULT_MEM_FRACTION).clamp(0.05, 1.0);
        let memory_budget = (sys.available_memory() as f64 * fraction) as usize;
        RuntimeConfig {
            cores: cores.max(1),
            memory_budget,
            work_root,
        }
    }

    /// Fixed configuration for tests and embedders.
    pub fn fixed(cores: usize, memory_budget: usize, work_root: PathBuf) -> RuntimeConfig {
        RuntimeConfig {
            cores: cores.max(1),
            memory_budget,
            work_root,
        }
    }

    /// Split the core budget between concurrent tiles and per-tile window
    /// co-workers, given how many tiles survived filtering.
    pub fn worker_split(&self, tiles: usize) -> (usize, usize) {
        if tiles == 0 {
            return (1, 1);
        }
        let tile_workers = self.cores.min(tiles).max(1);
        let co_workers = (self.cores / tile_workers).max(1);
        (tile_workers, co_workers)
    }

    /// Memory available to one tile worker.
    pub fn memory_per_worker(&self, tile_workers: usize) -> usize {
        self.memory_budget / tile_workers.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_split_saturates_cores() {
        let cfg = RuntimeConfig::fixed(8, 1 << 30, PathBuf::from("/tmp"));
        // More tiles than cores: one window worker each.
        assert_eq!(cfg.worker_split(100), (8, 1));
        // Fewer tiles than cores: spare cores go to windows.
        assert_eq!(cfg.worker_split(2), (2, 4));
        assert_eq!(cfg.worker_split(0), (1, 1));
    }

    #[test]
    fn memory_per_worker_divides_budget() {
        let cfg = RuntimeConfig::fixed(4, 1000, PathBuf::from("/tmp"));
        assert_eq!(cfg.memory_per_worker(4), 250);
        assert_eq!(cfg.memory_per_worker(0), 1000);
    }
}
