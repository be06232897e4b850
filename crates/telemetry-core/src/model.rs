//! Shared data types that cross the boundary between the collector, the
//! session protocol and the replay/analysis stage.
//!
//! These mirror the wire shapes a recording session actually produces:
//! small, flat, and serialized as-is with `bincode` rather than funneled
//! through an intermediate storage model.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Bitset of what a [`crate::aggregator::PidInfo`] should collect on each
/// update. Mirrors the original tool's check-level flags so CLI surfaces
/// (`-thread`, `-child`, `-pss`) map onto it one-to-one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckLevel(u8);

bitflags::bitflags! {
    impl CheckLevel: u8 {
        /// Always implied: collect the pid itself.
        const SINGLE = 0b0001;
        /// Collect per-thread (tid) rows too.
        const THREAD = 0b0010;
        /// Follow and collect child processes.
        const CHILD  = 0b0100;
        /// Read PSS instead of (or in addition to) RSS. Expensive.
        const PSS    = 0b1000;
    }
}

impl Default for CheckLevel {
    fn default() -> Self {
        CheckLevel::SINGLE
    }
}

/// One sampled `/proc/<pid>/stat` (or `/proc/<pid>/task/<tid>/stat`) reading,
/// the raw ticks a [`crate::aggregator`] diffs between updates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskSample {
    pub pid: i32,
    pub tid: i32,
    pub ppid: i32,
    pub comm: String,
    pub cmdline: String,
    pub state: char,
    pub priority: i32,
    pub utime: u64,
    pub stime: u64,
    pub rss_pages: i64,
    pub pss_kb: u64,
    pub num_threads: i32,
}

/// Derived, human-facing stats for one pid or tid after a CPU% computation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeStats {
    pub pid: i32,
    pub tid: i32,
    pub comm: String,
    pub cmdline: String,
    pub priority: i32,
    pub ucpu: f64,
    pub scpu: f64,
    pub rss_kb: u64,
    pub pss_kb: u64,
}

/// One line of a process-record payload, the unit that actually crosses the
/// wire to a session collector and back out to the chart renderer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: i32,
    pub name: String,
    pub ucpu: f32,
    pub scpu: f32,
    pub mem: u64,
}

/// A single timestamped unit of telemetry sent by an agent to a session.
/// Exactly one of `processes`/`snapshot` is meaningful per record; which one
/// is decided by the agent, not negotiated over the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Record {
    pub timestamp: i64,
    #[serde(default)]
    pub processes: Vec<ProcessInfo>,
    #[serde(default)]
    pub snapshot: String,
}

/// System identification text gathered once per session and written
/// verbatim into the session's info file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SysInfo {
    pub cpu_info: String,
    pub kernel_info: String,
}

/// Request an agent sends to open a new recording session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionRequest {
    pub tag: String,
    pub sys_info: SysInfo,
    pub extra_info: String,
}

/// Reply to a [`SessionRequest`], handed back before the background
/// receive loop is even started.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionResponse {
    pub chart_url: String,
}

/// `YYYYMMDD-xxxxxxxx` session identifier: a date stamp plus eight
/// lowercase random letters, just unique enough to dedupe concurrent runs
/// under the same tag on the same day.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn generate(date: &str) -> Self {
        use rand::Rng;
        const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
        let mut rng = rand::thread_rng();
        let suffix: String = (0..8)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        SessionId(format!("{date}-{suffix}"))
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One sampled CPU row (aggregate or a single core) expressed as percentages
/// of wall time spent in each state since the previous sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SysSample {
    /// `-1` for the aggregate row, otherwise the core index.
    pub core: i32,
    pub percents: HashMap<String, f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_level_bits_are_independent() {
        let level = CheckLevel::SINGLE | CheckLevel::THREAD | CheckLevel::PSS;
        assert!(level.contains(CheckLevel::SINGLE));
        assert!(level.contains(CheckLevel::THREAD));
        assert!(!level.contains(CheckLevel::CHILD));
        assert!(level.contains(CheckLevel::PSS));
    }

    #[test]
    fn session_id_has_expected_shape() {
        let id = SessionId::generate("20260801");
        assert!(id.0.starts_with("20260801-"));
        let suffix = &id.0["20260801-".len()..];
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_lowercase()));
    }
}
