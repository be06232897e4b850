//! telemetry-agent - client recorder driver.
//!
//! Periodically samples a target pid (and optionally its children/threads),
//! prints human-readable tables locally, or streams `Record`s to a
//! collector session when `-chart` is given. Snapshot ticks additionally
//! capture the whole system's process tree every 30th sample.

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::net::TcpStream;
use std::time::Duration;

use clap::Parser;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use telemetry_core::aggregator::{PidAggregator, ThreadMemAttribution, to_process_infos};
use telemetry_core::journal::{JournalReader, JournalWriter, ReadOutcome};
use telemetry_core::model::{CheckLevel, ProcessInfo, Record, SessionRequest, SessionResponse, SysInfo};
use telemetry_core::procfs::{ProcReader, RealFs};
use telemetry_core::sysinfo::SysSampler;
use telemetry_core::time::now_unix;

/// Client recorder driver: samples a process tree and either prints it
/// locally or streams it to a collector session.
#[derive(Parser)]
#[command(name = "telemetry-agent", about = "Process telemetry recorder", version)]
struct Args {
    /// Pid(s) to track. Repeatable; defaults to this process's own pid.
    #[arg(short = 'p', long = "pid")]
    pids: Vec<i32>,

    /// Verbose logging.
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Also track child processes.
    #[arg(long = "child")]
    child: bool,

    /// Also track individual threads.
    #[arg(long = "thread")]
    thread: bool,

    /// Print a process tree instead of a flat table (local mode only).
    #[arg(long = "tree")]
    tree: bool,

    /// Sampling interval in seconds.
    #[arg(short = 'i', long = "interval", default_value = "1")]
    interval: u64,

    /// Number of samples to take. 0 means run forever.
    #[arg(short = 'c', long = "count", default_value = "0")]
    count: u64,

    /// Report user/sys CPU percentages separately instead of summed.
    #[arg(long = "detailcpu")]
    detail_cpu: bool,

    /// Report memory in MB instead of KB.
    #[arg(long = "MB")]
    mb: bool,

    /// Read PSS instead of RSS (more accurate, more expensive).
    #[arg(long = "pss")]
    pss: bool,

    /// Stream samples to a collector session instead of printing locally.
    #[arg(long = "chart")]
    chart: bool,

    /// Collector host:port to stream to, when `-chart` is set.
    #[arg(long = "collector", default_value = "127.0.0.1:9119")]
    collector: String,

    /// Tag grouping this session under at the collector.
    #[arg(long = "tag", default_value = "default")]
    tag: String,

    /// Send a whole-system process tree snapshot every 30th tick.
    #[arg(long = "snapshot")]
    snapshot: bool,

    /// Prepend synthetic system-wide CPU/memory rows to every sample.
    #[arg(long = "sys")]
    sys: bool,

    /// Comma-separated shell commands whose output is captured as
    /// extra session info (e.g. `uname -a,lscpu`).
    #[arg(long = "info")]
    info: Option<String>,

    /// Caps sampling concurrency; the driver never uses more than this many
    /// worker threads so observation does not dominate the observed system.
    #[arg(long = "max-parallelism", default_value = "2")]
    max_parallelism: usize,

    /// How a multi-threaded process's RSS/PSS is attributed across its
    /// thread rows when `-thread` is set: `shared` gives every thread row
    /// the process's full memory (double-counts if stacked), `first-only`
    /// attributes it to the first thread row alone and zeroes the rest.
    #[arg(long = "thread-mem", value_enum, default_value = "shared")]
    thread_mem: ThreadMemArg,
}

#[derive(Copy, Clone, Debug, clap::ValueEnum)]
enum ThreadMemArg {
    Shared,
    FirstOnly,
}

impl From<ThreadMemArg> for ThreadMemAttribution {
    fn from(arg: ThreadMemArg) -> Self {
        match arg {
            ThreadMemArg::Shared => ThreadMemAttribution::Shared,
            ThreadMemArg::FirstOnly => ThreadMemAttribution::FirstOnly,
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::from_default_env().add_directive(format!("telemetry_agent={level}").parse().unwrap());
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn effective_parallelism(requested: usize) -> usize {
    let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    if cores > 2 { requested.min(2) } else { requested.min(cores) }
}

/// Runs the comma-separated commands in `spec` and joins their stdout,
/// used to build the session's `extraInfo` text block.
fn gather_extra_info(spec: &str) -> String {
    let mut out = String::new();
    for cmd in spec.split(',').map(str::trim).filter(|c| !c.is_empty()) {
        let mut parts = cmd.split_whitespace();
        let Some(program) = parts.next() else { continue };
        match std::process::Command::new(program).args(parts).output() {
            Ok(output) => {
                out.push_str(&format!("$ {cmd}\n"));
                out.push_str(&String::from_utf8_lossy(&output.stdout));
                out.push('\n');
            }
            Err(e) => {
                out.push_str(&format!("$ {cmd}\n(failed: {e})\n"));
            }
        }
    }
    out
}

fn sys_info() -> SysInfo {
    let cpu_info = std::fs::read_to_string("/proc/cpuinfo").unwrap_or_default();
    let kernel_info = std::fs::read_to_string("/proc/version").unwrap_or_default();
    SysInfo { cpu_info, kernel_info }
}

/// Prepends synthetic `pid=0` rows carrying system-wide CPU/memory fields,
/// named `[CPUk-field]` and `[MEM-field]` per the per-CPU/memory sampler.
fn sys_rows(sampler: &mut SysSampler<RealFs>) -> Vec<ProcessInfo> {
    let mut rows = Vec::new();
    match sampler.update() {
        Ok(samples) => {
            for sample in samples {
                let label = if sample.core < 0 {
                    "CPU".to_string()
                } else {
                    format!("CPU{}", sample.core)
                };
                for (field, pct) in &sample.percents {
                    rows.push(ProcessInfo {
                        pid: 0,
                        name: format!("[{label}-{field}]"),
                        ucpu: *pct as f32,
                        scpu: 0.0,
                        mem: 0,
                    });
                }
            }
        }
        Err(e) => warn!("cpu-count-changed: {} -> {}", e.previous, e.current),
    }

    for (field, value) in sampler.mem_info() {
        rows.push(ProcessInfo {
            pid: 0,
            name: format!("[MEM-{field}]"),
            ucpu: 0.0,
            scpu: 0.0,
            mem: value,
        });
    }
    rows
}

fn print_table(tick: u64, rows: &[ProcessInfo], detail_cpu: bool, mb: bool) {
    println!("--- tick {tick} ---");
    for row in rows {
        let mem = if mb { row.mem as f64 / 1024.0 } else { row.mem as f64 };
        let unit = if mb { "MB" } else { "KB" };
        if detail_cpu {
            println!(
                "{:>8} {:<24} u={:>5.1}% s={:>5.1}% mem={:.1}{unit}",
                row.pid, row.name, row.ucpu, row.scpu, mem
            );
        } else {
            println!(
                "{:>8} {:<24} cpu={:>5.1}% mem={:.1}{unit}",
                row.pid,
                row.name,
                row.ucpu + row.scpu,
                mem
            );
        }
    }
}

/// Builds a human-readable indented dump of the whole system's process
/// hierarchy, rooted at pid 1, used as the periodic snapshot text.
fn format_tree(reader: &ProcReader<RealFs>, forest: &telemetry_core::forest::Forest, pid: i32, depth: usize) -> String {
    let mut out = String::new();
    let label = match reader.read_task(pid, pid, false) {
        Ok(task) => format!("{}{} ({})\n", "  ".repeat(depth), pid, task.comm),
        Err(_) => format!("{}{} (?)\n", "  ".repeat(depth), pid),
    };
    out.push_str(&label);
    for child in forest.children(pid) {
        out.push_str(&format_tree(reader, forest, child, depth + 1));
    }
    out
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let parallelism = effective_parallelism(args.max_parallelism);
    info!(
        "telemetry-agent {} ({}) starting (parallelism={parallelism})",
        env!("CARGO_PKG_VERSION"),
        telemetry_core::GIT_SHA
    );

    let root_pid = *args.pids.first().unwrap_or(&(std::process::id() as i32));

    let mut level = CheckLevel::SINGLE;
    if args.thread {
        level |= CheckLevel::THREAD;
    }
    if args.child {
        level |= CheckLevel::CHILD;
    }
    if args.pss {
        level |= CheckLevel::PSS;
    }

    let reader = ProcReader::new(RealFs, "/proc");
    let mut aggregator =
        PidAggregator::new(reader, root_pid, level).with_thread_mem_attribution(args.thread_mem.into());

    let tree_reader = ProcReader::new(RealFs, "/proc");
    let mut tree_forest = telemetry_core::forest::Forest::new();

    let mut sys_sampler = SysSampler::new_real("/proc");

    let mut stream_io = if args.chart {
        match connect_session(&args) {
            Ok(io) => Some(io),
            Err(e) => {
                error!("failed to open collector session: {e}");
                std::process::exit(1);
            }
        }
    } else {
        None
    };

    let mut tick: u64 = 0;
    loop {
        if args.count > 0 && tick >= args.count {
            break;
        }

        let stats = aggregator.update();
        let mut rows = to_process_infos(&stats);
        if args.sys {
            let mut sys = sys_rows(&mut sys_sampler);
            sys.append(&mut rows);
            rows = sys;
        }

        if let Some((writer, _reader)) = stream_io.as_mut() {
            let record = Record { timestamp: now_unix(), processes: rows, snapshot: String::new() };
            if let Err(e) = writer.append(&record) {
                error!("failed to send record: {e}");
                break;
            }

            if args.snapshot && tick % 30 == 0 {
                if let Ok(pids) = tree_reader.list_pids() {
                    let live: std::collections::HashSet<i32> = pids.iter().copied().collect();
                    let mut ppid_of = std::collections::HashMap::new();
                    for p in &pids {
                        if let Ok(sample) = tree_reader.read_task(*p, *p, false) {
                            ppid_of.insert(*p, sample.ppid);
                        }
                    }
                    tree_forest.rebuild(live, &|pid| ppid_of.get(&pid).copied());
                }
                let text = format_tree(&tree_reader, &tree_forest, 1, 0);
                let snap_record = Record { timestamp: now_unix(), processes: Vec::new(), snapshot: text };
                if let Err(e) = writer.append(&snap_record) {
                    error!("failed to send snapshot: {e}");
                    break;
                }
            }
        } else if args.tree {
            if let Ok(pids) = tree_reader.list_pids() {
                let live: std::collections::HashSet<i32> = pids.iter().copied().collect();
                let mut ppid_of = std::collections::HashMap::new();
                for p in &pids {
                    if let Ok(sample) = tree_reader.read_task(*p, *p, false) {
                        ppid_of.insert(*p, sample.ppid);
                    }
                }
                tree_forest.rebuild(live, &|pid| ppid_of.get(&pid).copied());
            }
            println!("{}", format_tree(&tree_reader, &tree_forest, root_pid, 0));
        } else {
            print_table(tick, &rows, args.detail_cpu, args.mb);
        }

        tick += 1;
        if args.count == 0 || tick < args.count {
            std::thread::sleep(Duration::from_secs(args.interval));
        }
    }

    info!("telemetry-agent finished after {tick} ticks");
}

type SessionIo = (JournalWriter<TcpStream>, JournalReader<TcpStream>);

fn connect_session(args: &Args) -> std::io::Result<SessionIo> {
    let stream = TcpStream::connect(&args.collector)?;
    let read_stream = stream.try_clone()?;
    let mut writer = JournalWriter::new(stream);
    let mut reader = JournalReader::new(read_stream);

    let extra_info = args.info.as_deref().map(gather_extra_info).unwrap_or_default();
    let request = SessionRequest { tag: args.tag.clone(), sys_info: sys_info(), extra_info };
    writer.append(&request)?;

    match reader.read_one::<SessionResponse>() {
        ReadOutcome::Frame(resp) => {
            println!("chart: {}", resp.chart_url);
            Ok((writer, reader))
        }
        _ => Err(std::io::Error::new(std::io::ErrorKind::Other, "collector did not reply with a session response")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_parallelism_caps_at_two_on_big_machines() {
        assert!(effective_parallelism(8) <= 2);
    }

    #[test]
    fn effective_parallelism_never_exceeds_requested() {
        assert!(effective_parallelism(1) <= 1);
    }

    #[test]
    fn gather_extra_info_records_failed_commands_without_panicking() {
        let out = gather_extra_info("definitely-not-a-real-command-xyz");
        assert!(out.contains("failed"));
    }
}
