//! Reads `/proc/[pid]` and `/proc/[pid]/task/[tid]` into [`TaskSample`]s.

use super::fs::FileSystem;
use super::parser::{parse_cmdline, parse_comm, parse_proc_stat, parse_pss_kb, parse_task_ids};
use crate::model::TaskSample;
use std::path::Path;
use tracing::debug;

/// Error type for a single collection attempt.
#[derive(Debug)]
pub enum CollectError {
    /// The process (or task) vanished between listing and reading it.
    ProcessGone(i32),
    Io(std::io::Error),
    Parse(String),
}

impl std::fmt::Display for CollectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectError::ProcessGone(pid) => write!(f, "process {pid} disappeared"),
            CollectError::Io(e) => write!(f, "I/O error: {e}"),
            CollectError::Parse(msg) => write!(f, "parse error: {msg}"),
        }
    }
}

impl std::error::Error for CollectError {}

impl From<std::io::Error> for CollectError {
    fn from(e: std::io::Error) -> Self {
        CollectError::Io(e)
    }
}

/// Reads process/thread samples out of a `/proc`-shaped filesystem.
///
/// Generic over [`FileSystem`] so the exact same reading logic runs against
/// a real `/proc` in production and a [`super::fs::MockFs`] fixture in
/// tests.
pub struct ProcReader<F: FileSystem> {
    fs: F,
    proc_path: String,
}

impl<F: FileSystem> ProcReader<F> {
    pub fn new(fs: F, proc_path: impl Into<String>) -> Self {
        Self {
            fs,
            proc_path: proc_path.into(),
        }
    }

    /// Reads a single pid's (or tid's) stat/comm/cmdline into a
    /// [`TaskSample`]. `read_pss` additionally sums `smaps_rollup` (falling
    /// back to `smaps`) — callers gate this behind [`crate::model::CheckLevel::PSS`]
    /// since it is considerably more expensive than RSS.
    pub fn read_task(&self, pid: i32, tid: i32, read_pss: bool) -> Result<TaskSample, CollectError> {
        let base = if pid == tid {
            format!("{}/{}", self.proc_path, pid)
        } else {
            format!("{}/{}/task/{}", self.proc_path, pid, tid)
        };

        let stat_content = self.fs.read_to_string(Path::new(&format!("{base}/stat"))).map_err(|_| {
            debug!("task {tid} vanished before it could be read");
            CollectError::ProcessGone(tid)
        })?;
        let stat = parse_proc_stat(&stat_content).map_err(|e| CollectError::Parse(e.message))?;

        let comm = self
            .fs
            .read_to_string(Path::new(&format!("{base}/comm")))
            .map(|s| parse_comm(&s))
            .unwrap_or_else(|_| stat.comm.clone());

        let cmdline = self
            .fs
            .read_to_string(Path::new(&format!("{base}/cmdline")))
            .map(|s| parse_cmdline(&s))
            .unwrap_or_default();

        let pss_kb = if read_pss {
            self.read_pss(&base)
        } else {
            0
        };

        Ok(TaskSample {
            pid,
            tid,
            ppid: stat.ppid,
            comm,
            cmdline,
            state: stat.state,
            priority: stat.priority,
            utime: stat.utime,
            stime: stat.stime,
            rss_pages: stat.rss_pages,
            pss_kb,
            num_threads: stat.num_threads,
        })
    }

    fn read_pss(&self, base: &str) -> u64 {
        if let Ok(content) = self.fs.read_to_string(Path::new(&format!("{base}/smaps_rollup"))) {
            return parse_pss_kb(&content);
        }
        self.fs
            .read_to_string(Path::new(&format!("{base}/smaps")))
            .map(|c| parse_pss_kb(&c))
            .unwrap_or(0)
    }

    /// Lists the thread ids under `/proc/[pid]/task`.
    pub fn list_tids(&self, pid: i32) -> Result<Vec<i32>, CollectError> {
        let names = self
            .fs
            .read_dir_names(Path::new(&format!("{}/{}/task", self.proc_path, pid)))
            .map_err(|_| CollectError::ProcessGone(pid))?;
        Ok(parse_task_ids(&names))
    }

    /// Lists every numeric pid currently present under `/proc`.
    pub fn list_pids(&self) -> Result<Vec<i32>, CollectError> {
        let names = self.fs.read_dir_names(Path::new(&self.proc_path))?;
        let mut pids: Vec<i32> = names.iter().filter_map(|n| n.parse().ok()).collect();
        pids.sort_unstable();
        Ok(pids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procfs::fs::MockFs;

    fn fixture() -> MockFs {
        let mut fs = MockFs::new();
        fs.add_file(
            "/proc/1/stat",
            "1 (init) S 0 1 1 0 -1 4194304 100 0 0 0 10 5 0 0 20 0 1 0 1 10000000 50 0 0 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0 0 0 0 0 0 0 0 0",
        );
        fs.add_file("/proc/1/comm", "init\n");
        fs.add_file("/proc/1/cmdline", "/sbin/init\0");
        fs.add_dir("/proc/1/task");
        fs.add_dir("/proc");
        fs
    }

    #[test]
    fn read_task_for_pid_itself_uses_proc_pid_path() {
        let reader = ProcReader::new(fixture(), "/proc");
        let sample = reader.read_task(1, 1, false).unwrap();
        assert_eq!(sample.pid, 1);
        assert_eq!(sample.comm, "init");
        assert_eq!(sample.cmdline, "/sbin/init");
        assert_eq!(sample.ppid, 0);
        assert_eq!(sample.utime, 10);
        assert_eq!(sample.stime, 5);
    }

    #[test]
    fn read_task_for_vanished_pid_reports_process_gone() {
        let reader = ProcReader::new(MockFs::new(), "/proc");
        let err = reader.read_task(9999, 9999, false).unwrap_err();
        assert!(matches!(err, CollectError::ProcessGone(9999)));
    }

    #[test]
    fn read_pss_prefers_smaps_rollup_over_smaps() {
        let mut fs = fixture();
        fs.add_file("/proc/1/smaps_rollup", "Rss: 100 kB\nPss: 42 kB\n");
        fs.add_file("/proc/1/smaps", "Pss: 999 kB\n");
        let reader = ProcReader::new(fs, "/proc");
        let sample = reader.read_task(1, 1, true).unwrap();
        assert_eq!(sample.pss_kb, 42);
    }

    #[test]
    fn read_pss_falls_back_to_smaps_when_rollup_absent() {
        let mut fs = fixture();
        fs.add_file("/proc/1/smaps", "Pss: 12 kB\nPss: 8 kB\n");
        let reader = ProcReader::new(fs, "/proc");
        let sample = reader.read_task(1, 1, true).unwrap();
        assert_eq!(sample.pss_kb, 20);
    }
}
