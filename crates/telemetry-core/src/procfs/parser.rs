//! Parsers for `/proc` filesystem files.
//!
//! These are pure functions that parse the content of various `/proc` files
//! into structured data. They are designed to be easily testable with string
//! inputs instead of a real filesystem.

/// Error type for parsing failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "parse error: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

/// Parsed data from `/proc/[pid]/stat` (and `/proc/[pid]/task/[tid]/stat`,
/// same format).
#[derive(Debug, Clone, Default)]
pub struct ProcStat {
    pub pid: i32,
    pub comm: String,
    pub state: char,
    pub ppid: i32,
    pub utime: u64,
    pub stime: u64,
    pub priority: i32,
    pub num_threads: i32,
    pub rss_pages: i64,
}

/// Parses `/proc/[pid]/stat` content.
///
/// The format is tricky because `comm` can itself contain spaces and
/// parentheses, so the field is located by the outermost paren pair rather
/// than by whitespace splitting.
pub fn parse_proc_stat(content: &str) -> Result<ProcStat, ParseError> {
    let content = content.trim();

    let open_paren = content
        .find('(')
        .ok_or_else(|| ParseError::new("missing '(' in stat"))?;
    let close_paren = content
        .rfind(')')
        .ok_or_else(|| ParseError::new("missing ')' in stat"))?;
    if close_paren <= open_paren {
        return Err(ParseError::new("invalid parentheses in stat"));
    }

    let pid: i32 = content[..open_paren]
        .trim()
        .parse()
        .map_err(|_| ParseError::new("invalid pid"))?;
    let comm = content[open_paren + 1..close_paren].to_string();

    let remaining = &content[close_paren + 1..];
    let fields: Vec<&str> = remaining.split_whitespace().collect();
    if fields.len() < 22 {
        return Err(ParseError::new(format!(
            "not enough fields in stat: expected 22+, got {}",
            fields.len()
        )));
    }

    let field_i64 = |idx: usize, name: &str| -> Result<i64, ParseError> {
        fields
            .get(idx)
            .ok_or_else(|| ParseError::new(format!("missing field {name}")))?
            .parse()
            .map_err(|_| ParseError::new(format!("invalid {name}")))
    };
    let field_u64 = |idx: usize, name: &str| -> Result<u64, ParseError> {
        fields
            .get(idx)
            .ok_or_else(|| ParseError::new(format!("missing field {name}")))?
            .parse()
            .map_err(|_| ParseError::new(format!("invalid {name}")))
    };

    Ok(ProcStat {
        pid,
        comm,
        state: fields[0].chars().next().unwrap_or('?'),
        ppid: field_i64(1, "ppid")? as i32,
        utime: field_u64(11, "utime")?,
        stime: field_u64(12, "stime")?,
        priority: field_i64(15, "priority")? as i32,
        num_threads: field_i64(17, "num_threads")? as i32,
        rss_pages: field_i64(21, "rss")?,
    })
}

/// Parses `/proc/[pid]/comm` content: a single trimmed line.
pub fn parse_comm(content: &str) -> String {
    content.trim().to_string()
}

/// Parses `/proc/[pid]/cmdline` content: NUL-separated argv, joined with
/// spaces for display.
pub fn parse_cmdline(content: &str) -> String {
    content
        .split('\0')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parses `/proc/[pid]/task` directory listing into a list of tids.
pub fn parse_task_ids(names: &[String]) -> Vec<i32> {
    let mut tids: Vec<i32> = names.iter().filter_map(|n| n.parse().ok()).collect();
    tids.sort_unstable();
    tids
}

/// Parsed data from `/proc/meminfo`, trimmed to the fields the system
/// sampler actually derives `used`/`cache` from.
#[derive(Debug, Clone, Default)]
pub struct MemInfo {
    pub mem_total: u64,
    pub mem_free: u64,
    pub mem_available: u64,
    pub buffers: u64,
    pub cached: u64,
    pub s_reclaimable: u64,
    pub shmem: u64,
}

/// Parses `/proc/meminfo` content.
pub fn parse_meminfo(content: &str) -> Result<MemInfo, ParseError> {
    let mut info = MemInfo::default();

    let parse_kb = |line: &str| -> u64 {
        line.split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    };

    for line in content.lines() {
        if line.starts_with("MemTotal:") {
            info.mem_total = parse_kb(line);
        } else if line.starts_with("MemFree:") {
            info.mem_free = parse_kb(line);
        } else if line.starts_with("MemAvailable:") {
            info.mem_available = parse_kb(line);
        } else if line.starts_with("Buffers:") {
            info.buffers = parse_kb(line);
        } else if line.starts_with("Cached:") {
            info.cached = parse_kb(line);
        } else if line.starts_with("SReclaimable:") {
            info.s_reclaimable = parse_kb(line);
        } else if line.starts_with("Shmem:") {
            info.shmem = parse_kb(line);
        }
    }

    Ok(info)
}

/// Single CPU row from `/proc/stat`: raw tick counters, one column per
/// kernel accounting bucket.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpuTicks {
    /// `None` for the aggregate `cpu` row.
    pub core: Option<u32>,
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
    pub guest: u64,
    pub guest_nice: u64,
}

impl CpuTicks {
    /// Total ticks across every accounting bucket, the denominator for
    /// percentage calculations.
    pub fn total(&self) -> u64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
            + self.guest
            + self.guest_nice
    }
}

/// Parses the `cpu`/`cpuN` rows of `/proc/stat` content.
pub fn parse_global_stat(content: &str) -> Result<Vec<CpuTicks>, ParseError> {
    let mut rows = Vec::new();

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() || !parts[0].starts_with("cpu") {
            continue;
        }

        let core = if parts[0] == "cpu" {
            None
        } else {
            parts[0].strip_prefix("cpu").and_then(|s| s.parse().ok())
        };

        let get_val =
            |idx: usize| -> u64 { parts.get(idx).and_then(|s| s.parse().ok()).unwrap_or(0) };

        rows.push(CpuTicks {
            core,
            user: get_val(1),
            nice: get_val(2),
            system: get_val(3),
            idle: get_val(4),
            iowait: get_val(5),
            irq: get_val(6),
            softirq: get_val(7),
            steal: get_val(8),
            guest: get_val(9),
            guest_nice: get_val(10),
        });
    }

    if rows.is_empty() {
        return Err(ParseError::new("no cpu rows found"));
    }
    Ok(rows)
}

/// Sums `Pss:` lines out of `/proc/[pid]/smaps_rollup` or
/// `/proc/[pid]/smaps` content, in kB.
///
/// `smaps_rollup` already contains a single pre-summed `Pss:` line; falling
/// back to `smaps` means summing one `Pss:` line per mapping.
pub fn parse_pss_kb(content: &str) -> u64 {
    content
        .lines()
        .filter_map(|line| line.strip_prefix("Pss:"))
        .filter_map(|rest| rest.split_whitespace().next())
        .filter_map(|n| n.parse::<u64>().ok())
        .sum()
}
