//! Pid/Tid aggregator: turns successive [`TaskSample`] readings into
//! CPU-percentage stats, per the bitset of what to collect
//! ([`CheckLevel`]).
//!
//! CPU% is computed the same way the original tool derives it:
//! `(delta_ticks * 100) / (wall_seconds * userHz)`, diffed against the
//! previous sample for that exact pid/tid. A counter regression (the
//! kernel's tick counters went backwards, which only happens across a pid
//! reuse) is treated as "no delta available yet" rather than producing a
//! negative percentage.

use crate::forest::Forest;
use crate::model::{CheckLevel, NodeStats, ProcessInfo, TaskSample};
use crate::procfs::{FileSystem, ProcReader};
use crate::sysinfo::user_hz;
use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

fn now_secs_f64() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Ticks plus the wall-clock time they were read at, kept per tid so CPU%
/// can be derived on the next `update()`.
#[derive(Debug, Clone, Copy, Default)]
struct PrevTicks {
    utime: u64,
    stime: u64,
    ts: f64,
}

/// Computes `(percent_user, percent_sys)` from a tick delta over a wall-time
/// delta, at the currently measured `userHz`. Returns `(0.0, 0.0)` if the
/// counters regressed (pid reuse) or this is the first sample.
fn cpu_percent(prev: Option<PrevTicks>, utime: u64, stime: u64, now: f64) -> (f64, f64) {
    let Some(prev) = prev else {
        return (0.0, 0.0);
    };
    if utime < prev.utime || stime < prev.stime {
        return (0.0, 0.0);
    }
    let dt = (now - prev.ts).max(f64::EPSILON);
    let hz = user_hz();
    let ucpu = (utime - prev.utime) as f64 * 100.0 / (dt * hz);
    let scpu = (stime - prev.stime) as f64 * 100.0 / (dt * hz);
    (ucpu, scpu)
}

/// How memory gets attributed across the thread rows of a multi-threaded
/// process. Threads share one address space, so naively stacking every
/// thread's row double-counts RSS/PSS in the chart renderer; the original
/// tool does [`ThreadMemAttribution::Shared`] by accident. Left selectable
/// rather than guessed, per the still-open question on thread memory
/// attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThreadMemAttribution {
    /// Every thread row reports the process's full RSS/PSS (double-counts
    /// when summed/stacked, but matches the historical source exactly).
    #[default]
    Shared,
    /// Only the first thread row (lowest tid) carries the process's
    /// RSS/PSS; the rest report zero memory.
    FirstOnly,
}

/// Tracks one pid's (and, depending on [`CheckLevel`], its threads' and
/// children's) CPU utilization across repeated `update()` calls.
pub struct PidAggregator<F: FileSystem> {
    reader: ProcReader<F>,
    root_pid: i32,
    level: CheckLevel,
    prev: HashMap<i32, PrevTicks>,
    update_count: u64,
    page_size_kb: u64,
    forest: Forest,
    thread_mem: ThreadMemAttribution,
}

impl<F: FileSystem> PidAggregator<F> {
    pub fn new(reader: ProcReader<F>, root_pid: i32, level: CheckLevel) -> Self {
        Self {
            reader,
            root_pid,
            level,
            prev: HashMap::new(),
            update_count: 0,
            page_size_kb: 4,
            forest: Forest::new(),
            thread_mem: ThreadMemAttribution::default(),
        }
    }

    pub fn with_thread_mem_attribution(mut self, mode: ThreadMemAttribution) -> Self {
        self.thread_mem = mode;
        self
    }

    /// Re-samples the tracked pid (and threads/children per [`CheckLevel`])
    /// and returns per-tid/pid stats. PSS is only actually read on every
    /// 16th call when [`CheckLevel::PSS`] is set, since walking `smaps` is
    /// expensive; intervening calls reuse the last PSS reading.
    ///
    /// A negative `root_pid` (e.g. `-1`/`-99`) is the synthetic "whole
    /// system" root: instead of reading that pid's own (nonexistent) stat,
    /// every currently live pid is sampled directly.
    pub fn update(&mut self) -> Vec<NodeStats> {
        self.update_count += 1;
        let read_pss = self.level.contains(CheckLevel::PSS) && (self.update_count - 1) & 15 == 0;
        let now = now_secs_f64();

        let pids = if self.root_pid < 0 {
            self.reader.list_pids().unwrap_or_default()
        } else {
            let mut pids = vec![self.root_pid];
            if self.level.contains(CheckLevel::CHILD) {
                pids.extend(self.descendants(self.root_pid));
            }
            pids
        };

        let mut out = Vec::new();
        for pid in pids {
            out.extend(self.sample_one(pid, read_pss, now));
        }
        out
    }

    /// Rebuilds the owned [`Forest`] from a fresh `/proc` pid listing and
    /// returns every currently known descendant of `pid`. Rebuilding before
    /// every call keeps the tree in sync with process exits/spawns without
    /// needing a separately scheduled refresh.
    fn descendants(&mut self, pid: i32) -> Vec<i32> {
        let Ok(pids) = self.reader.list_pids() else {
            return Vec::new();
        };
        let live: HashSet<i32> = pids.iter().copied().collect();

        // Single-shot ppid lookup good enough for one rebuild: re-reads
        // stat for everyone once, then `Forest` resolves ancestor chains.
        let mut ppid_of: HashMap<i32, i32> = HashMap::new();
        for p in &pids {
            if let Ok(sample) = self.reader.read_task(*p, *p, false) {
                ppid_of.insert(*p, sample.ppid);
            }
        }

        self.forest
            .rebuild(live, &|candidate| ppid_of.get(&candidate).copied());
        self.forest.descendants(pid)
    }

    fn sample_one(&mut self, pid: i32, read_pss: bool, now: f64) -> Vec<NodeStats> {
        let Ok(main) = self.reader.read_task(pid, pid, read_pss) else {
            return Vec::new();
        };

        let emit_threads = self.level.contains(CheckLevel::THREAD) && main.num_threads > 1;
        if !emit_threads {
            return vec![self.to_stats(pid, &main, now)];
        }

        let Ok(tids) = self.reader.list_tids(pid) else {
            return vec![self.to_stats(pid, &main, now)];
        };

        let mut rows = Vec::with_capacity(tids.len());
        for (idx, tid) in tids.into_iter().enumerate() {
            let Ok(sample) = self.reader.read_task(pid, tid, false) else {
                continue;
            };
            let mut stats = self.to_stats(tid, &sample, now);
            let attribute_mem = match self.thread_mem {
                ThreadMemAttribution::Shared => true,
                ThreadMemAttribution::FirstOnly => idx == 0,
            };
            if attribute_mem {
                stats.rss_kb = main.rss_pages.max(0) as u64 * self.page_size_kb;
                stats.pss_kb = main.pss_kb;
            } else {
                stats.rss_kb = 0;
                stats.pss_kb = 0;
            }
            rows.push(stats);
        }
        rows
    }

    fn to_stats(&mut self, key: i32, sample: &TaskSample, now: f64) -> NodeStats {
        let prev = self.prev.get(&key).copied();
        let (ucpu, scpu) = cpu_percent(prev, sample.utime, sample.stime, now);
        self.prev.insert(
            key,
            PrevTicks {
                utime: sample.utime,
                stime: sample.stime,
                ts: now,
            },
        );

        NodeStats {
            pid: sample.pid,
            tid: sample.tid,
            comm: sample.comm.clone(),
            cmdline: sample.cmdline.clone(),
            priority: sample.priority,
            ucpu,
            scpu,
            rss_kb: sample.rss_pages.max(0) as u64 * self.page_size_kb,
            pss_kb: sample.pss_kb,
        }
    }
}

/// Finds every live pid whose `comm` matches `name` exactly, in the same
/// ascending `/proc` enumeration order [`ProcReader::list_pids`] returns.
/// A pid that vanishes between listing and reading is silently skipped.
pub fn pidof<F: FileSystem>(reader: &ProcReader<F>, name: &str) -> Vec<i32> {
    let Ok(pids) = reader.list_pids() else {
        return Vec::new();
    };
    pids.into_iter()
        .filter(|&pid| {
            reader
                .read_task(pid, pid, false)
                .is_ok_and(|sample| sample.comm == name)
        })
        .collect()
}

/// Converts aggregator output into the wire-shaped rows a session record
/// carries. Kernel-thread-like entries (empty cmdline, zero RSS) get their
/// name bracketed, matching the client driver's display convention.
pub fn to_process_infos(stats: &[NodeStats]) -> Vec<ProcessInfo> {
    stats
        .iter()
        .map(|s| {
            let is_kernel_thread = s.cmdline.is_empty() && s.rss_kb == 0;
            let name = if is_kernel_thread {
                format!("[{}]", s.comm)
            } else {
                s.comm.clone()
            };
            ProcessInfo {
                pid: if s.tid != s.pid { s.tid } else { s.pid },
                name,
                ucpu: s.ucpu as f32,
                scpu: s.scpu as f32,
                mem: s.pss_kb.max(s.rss_kb),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procfs::MockFs;

    fn stat_line(ppid: i32, utime: u64, stime: u64, num_threads: i32) -> String {
        format!(
            "1 (proc) S {ppid} 1 1 0 -1 4194304 0 0 0 0 {utime} {stime} 0 0 20 0 {num_threads} 0 1 0 0 18446744073709551615 0 0 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0 0 0 0 0 0 0 0 0"
        )
    }

    #[test]
    fn first_update_reports_zero_cpu() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/1/stat", stat_line(0, 100, 50, 1));
        fs.add_file("/proc/1/comm", "proc\n");
        fs.add_file("/proc/1/cmdline", "proc\0");
        fs.add_dir("/proc");
        let reader = ProcReader::new(fs, "/proc");
        let mut agg = PidAggregator::new(reader, 1, CheckLevel::SINGLE);

        let stats = agg.update();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].ucpu, 0.0);
        assert_eq!(stats[0].scpu, 0.0);
    }

    #[test]
    fn first_only_attribution_zeroes_out_non_first_thread_rows() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/1/stat", stat_line(0, 100, 50, 2));
        fs.add_file("/proc/1/comm", "proc\n");
        fs.add_file("/proc/1/cmdline", "proc\0");
        fs.add_dir("/proc/1/task");
        fs.add_file("/proc/1/task/1/stat", stat_line(0, 100, 50, 2));
        fs.add_file("/proc/1/task/1/comm", "proc\n");
        fs.add_file("/proc/1/task/1/cmdline", "proc\0");
        fs.add_file("/proc/1/task/2/stat", stat_line(0, 40, 10, 2));
        fs.add_file("/proc/1/task/2/comm", "proc\n");
        fs.add_file("/proc/1/task/2/cmdline", "proc\0");
        fs.add_dir("/proc");
        let reader = ProcReader::new(fs, "/proc");
        let mut agg = PidAggregator::new(reader, 1, CheckLevel::SINGLE | CheckLevel::THREAD)
            .with_thread_mem_attribution(ThreadMemAttribution::FirstOnly);

        let stats = agg.update();
        assert_eq!(stats.len(), 2);
        assert!(stats[0].rss_kb > 0);
        assert_eq!(stats[1].rss_kb, 0);
    }

    #[test]
    fn negative_root_pid_samples_every_live_pid() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/1/stat", stat_line(0, 10, 5, 1));
        fs.add_file("/proc/1/comm", "init\n");
        fs.add_file("/proc/1/cmdline", "/sbin/init\0");
        fs.add_file("/proc/42/stat", stat_line(1, 20, 10, 1));
        fs.add_file("/proc/42/comm", "sleeper\n");
        fs.add_file("/proc/42/cmdline", "sleeper\0");
        fs.add_dir("/proc");
        let reader = ProcReader::new(fs, "/proc");
        let mut agg = PidAggregator::new(reader, -1, CheckLevel::SINGLE);

        let stats = agg.update();
        let mut pids: Vec<i32> = stats.iter().map(|s| s.pid).collect();
        pids.sort_unstable();
        assert_eq!(pids, vec![1, 42]);
    }

    #[test]
    fn pidof_returns_every_matching_pid_in_proc_order() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/100/stat", stat_line(1, 0, 0, 1));
        fs.add_file("/proc/100/comm", "bash\n");
        fs.add_file("/proc/100/cmdline", "bash\0");
        fs.add_file("/proc/4321/stat", stat_line(1, 0, 0, 1));
        fs.add_file("/proc/4321/comm", "sleeper\n");
        fs.add_file("/proc/4321/cmdline", "sleeper\0");
        fs.add_file("/proc/4322/stat", stat_line(1, 0, 0, 1));
        fs.add_file("/proc/4322/comm", "sleeper\n");
        fs.add_file("/proc/4322/cmdline", "sleeper\0");
        fs.add_dir("/proc");
        let reader = ProcReader::new(fs, "/proc");

        assert_eq!(pidof(&reader, "sleeper"), vec![4321, 4322]);
    }

    #[test]
    fn kernel_thread_like_rows_get_bracketed_names() {
        let stats = vec![NodeStats {
            pid: 2,
            tid: 2,
            comm: "kworker/0:1".to_string(),
            cmdline: String::new(),
            priority: 20,
            ucpu: 0.0,
            scpu: 0.0,
            rss_kb: 0,
            pss_kb: 0,
        }];
        let infos = to_process_infos(&stats);
        assert_eq!(infos[0].name, "[kworker/0:1]");
    }

    #[test]
    fn regular_process_name_is_not_bracketed() {
        let stats = vec![NodeStats {
            pid: 5,
            tid: 5,
            comm: "bash".to_string(),
            cmdline: "/bin/bash".to_string(),
            priority: 20,
            ucpu: 1.0,
            scpu: 0.5,
            rss_kb: 4096,
            pss_kb: 2048,
        }];
        let infos = to_process_infos(&stats);
        assert_eq!(infos[0].name, "bash");
        assert_eq!(infos[0].mem, 4096);
    }
}
