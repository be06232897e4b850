//! System-wide sampler: per-CPU percentages and memory usage, plus the
//! continuously re-measured `userHz` that CPU% math depends on.
//!
//! `userHz` is not hardcoded at 100: the kernel's reported clock tick rate
//! can differ by platform, so it is derived every sample from the delta of
//! total ticks over wall time and stored in an [`AtomicU64`] as bit-cast
//! `f64`, the same trick the original implementation used
//! (`AtomicStoreFloat64`/`AtomicLoadFloat64`) to share one measurement
//! across every concurrently-updating [`crate::aggregator::PidInfo`].

use crate::procfs::parser::{parse_global_stat, parse_meminfo, CpuTicks};
use crate::procfs::{FileSystem, RealFs};
use crate::model::SysSample;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Default, conservative guess used until the first real measurement lands.
const DEFAULT_USER_HZ: f64 = 100.0;

/// Process-wide, continuously updated clock-tick rate.
pub static USER_HZ: AtomicU64 = AtomicU64::new(0);

fn store_user_hz(value: f64) {
    USER_HZ.store(value.to_bits(), Ordering::Relaxed);
}

/// Reads the current measured `userHz`, or [`DEFAULT_USER_HZ`] before the
/// first measurement.
pub fn user_hz() -> f64 {
    let bits = USER_HZ.load(Ordering::Relaxed);
    if bits == 0 {
        DEFAULT_USER_HZ
    } else {
        f64::from_bits(bits)
    }
}

fn now_secs_f64() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Error produced when the shape of `/proc/stat` changes between samples,
/// e.g. a CPU was hot-plugged.
#[derive(Debug, Clone, PartialEq)]
pub struct CpuCountChanged {
    pub previous: usize,
    pub current: usize,
}

impl std::fmt::Display for CpuCountChanged {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cpu-count-changed: had {} rows, now {}",
            self.previous, self.current
        )
    }
}

impl std::error::Error for CpuCountChanged {}

/// Samples `/proc/stat` and `/proc/meminfo`, tracking the previous reading
/// so `update()` can derive percentages.
pub struct SysSampler<F: FileSystem> {
    fs: F,
    proc_path: String,
    prev_ticks: Option<Vec<CpuTicks>>,
    prev_ts: f64,
}

impl SysSampler<RealFs> {
    pub fn new_real(proc_path: impl Into<String>) -> Self {
        Self::new(RealFs, proc_path)
    }
}

impl<F: FileSystem> SysSampler<F> {
    pub fn new(fs: F, proc_path: impl Into<String>) -> Self {
        Self {
            fs,
            proc_path: proc_path.into(),
            prev_ticks: None,
            prev_ts: 0.0,
        }
    }

    /// Reads `/proc/stat`, derives per-row percentages against the previous
    /// reading, and updates the global `userHz` estimate from the
    /// aggregate row's delta. The first call after construction only seeds
    /// state and returns an empty sample set.
    pub fn update(&mut self) -> Result<Vec<SysSample>, CpuCountChanged> {
        let content = self
            .fs
            .read_to_string(Path::new(&format!("{}/stat", self.proc_path)))
            .unwrap_or_default();
        let rows = parse_global_stat(&content).unwrap_or_default();
        let now = now_secs_f64();

        let Some(prev) = self.prev_ticks.take() else {
            self.prev_ticks = Some(rows);
            self.prev_ts = now;
            return Ok(Vec::new());
        };

        if prev.len() != rows.len() {
            self.prev_ticks = Some(rows.clone());
            self.prev_ts = now;
            return Err(CpuCountChanged {
                previous: prev.len(),
                current: rows.len(),
            });
        }

        let wall_dt = (now - self.prev_ts).max(f64::EPSILON);

        if let (Some(prev_agg), Some(cur_agg)) = (
            prev.iter().find(|r| r.core.is_none()),
            rows.iter().find(|r| r.core.is_none()),
        ) {
            let delta_ticks = cur_agg.total().saturating_sub(prev_agg.total());
            if delta_ticks > 0 {
                let ncpus = (rows.len().saturating_sub(1)).max(1) as f64;
                store_user_hz(delta_ticks as f64 / wall_dt / ncpus);
            }
        }

        let mut samples = Vec::with_capacity(rows.len());
        for (p, c) in prev.iter().zip(rows.iter()) {
            let core = c.core.map(|n| n as i32).unwrap_or(-1);
            let delta_total = c.total().saturating_sub(p.total()).max(1) as f64;
            let pct = |prev_v: u64, cur_v: u64| -> f64 {
                (cur_v.saturating_sub(prev_v) as f64) * 100.0 / delta_total
            };

            let mut percents = HashMap::new();
            percents.insert("user".to_string(), pct(p.user, c.user));
            percents.insert("nice".to_string(), pct(p.nice, c.nice));
            percents.insert("system".to_string(), pct(p.system, c.system));
            percents.insert("idle".to_string(), pct(p.idle, c.idle));
            percents.insert("iowait".to_string(), pct(p.iowait, c.iowait));
            percents.insert("irq".to_string(), pct(p.irq, c.irq));
            percents.insert("softirq".to_string(), pct(p.softirq, c.softirq));
            percents.insert("steal".to_string(), pct(p.steal, c.steal));

            samples.push(SysSample { core, percents });
        }

        self.prev_ticks = Some(rows);
        self.prev_ts = now;
        Ok(samples)
    }

    /// Memory usage derived per the spec's accounting:
    /// `cache = Cached + SReclaimable`, `used = total - free - cache - buffers`.
    pub fn mem_info(&self) -> HashMap<String, u64> {
        let content = self
            .fs
            .read_to_string(Path::new(&format!("{}/meminfo", self.proc_path)))
            .unwrap_or_default();
        let Ok(info) = parse_meminfo(&content) else {
            return HashMap::new();
        };

        let cache = info.cached + info.s_reclaimable;
        let used = info
            .mem_total
            .saturating_sub(info.mem_free)
            .saturating_sub(cache)
            .saturating_sub(info.buffers);

        let mut map = HashMap::new();
        map.insert("total".to_string(), info.mem_total);
        map.insert("free".to_string(), info.mem_free);
        map.insert("available".to_string(), info.mem_available);
        map.insert("cache".to_string(), cache);
        map.insert("used".to_string(), used);
        map.insert("shmem".to_string(), info.shmem);
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procfs::MockFs;

    fn stat_content(user: u64, idle: u64) -> String {
        format!("cpu  {user} 0 0 {idle} 0 0 0 0 0 0\ncpu0 {user} 0 0 {idle} 0 0 0 0 0 0\n")
    }

    #[test]
    fn first_update_only_seeds_state() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/stat", stat_content(1000, 9000));
        let mut sampler = SysSampler::new(fs, "/proc");
        let samples = sampler.update().unwrap();
        assert!(samples.is_empty());
    }

    #[test]
    fn second_update_derives_percentages() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/stat", stat_content(1000, 9000));
        let mut sampler = SysSampler::new(fs, "/proc");
        sampler.update().unwrap();

        sampler.fs.add_file("/proc/stat", stat_content(1100, 9100));
        let samples = sampler.update().unwrap();

        assert_eq!(samples.len(), 2);
        let agg = samples.iter().find(|s| s.core == -1).unwrap();
        assert!((agg.percents["user"] - 50.0).abs() < 0.001);
        assert!((agg.percents["idle"] - 50.0).abs() < 0.001);
    }

    #[test]
    fn changed_cpu_count_is_reported_as_error() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/stat", stat_content(1000, 9000));
        let mut sampler = SysSampler::new(fs, "/proc");
        sampler.update().unwrap();

        sampler.fs.add_file(
            "/proc/stat",
            "cpu  1100 0 0 9100 0 0 0 0 0 0\ncpu0 550 0 0 4550 0 0 0 0 0 0\ncpu1 550 0 0 4550 0 0 0 0 0 0\n",
        );
        let err = sampler.update().unwrap_err();
        assert_eq!(err.previous, 2);
        assert_eq!(err.current, 3);
    }

    #[test]
    fn mem_info_computes_used_and_cache() {
        let mut fs = MockFs::new();
        fs.add_file(
            "/proc/meminfo",
            "MemTotal: 1000 kB\nMemFree: 200 kB\nMemAvailable: 600 kB\nBuffers: 50 kB\nCached: 100 kB\nSReclaimable: 50 kB\nShmem: 10 kB\n",
        );
        let sampler = SysSampler::new(fs, "/proc");
        let mem = sampler.mem_info();
        assert_eq!(mem["cache"], 150);
        assert_eq!(mem["used"], 1000 - 200 - 150 - 50);
    }
}
