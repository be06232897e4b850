//! telemetry-collectord - session collector daemon.
//!
//! Accepts concurrent client sessions over a plain length-prefixed TCP
//! protocol (the real RPC transport - service discovery, stream
//! multiplexing, a type registry - is out of scope here; this is the
//! simplest thing that satisfies the same contract: one `SessionRequest`,
//! one `SessionResponse`, then a stream of `Record`s until EOF). Each
//! session gets its own `info`/`process`/`snapshot` journal files under
//! `<dir>/<tag>/`.

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use clap::Parser;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use telemetry_core::journal::{JournalReader, JournalWriter, ProcessFrame, ReadOutcome, SnapshotFrame};
use telemetry_core::model::{Record, SessionId, SessionRequest, SessionResponse};

/// Session collector daemon: accepts client sessions and persists their
/// records into append-only journals.
#[derive(Parser)]
#[command(name = "telemetry-collectord", about = "Session collector daemon", version)]
struct Args {
    /// Logging verbosity: error, warn, info, debug, trace.
    #[arg(long = "logLevel", default_value = "info")]
    log_level: String,

    /// Directory sessions are persisted under.
    #[arg(long = "dir", default_value = "./data")]
    dir: String,

    /// TCP port to accept sessions on.
    #[arg(long = "port", default_value = "9119")]
    port: u16,

    /// Base URL of the chart server sessions should be viewed at.
    #[arg(long = "chartBaseUrl", default_value = "http://127.0.0.1:8090")]
    chart_base_url: String,

    /// Parse an existing process journal, write `<FILE>.parsed`, then exit
    /// instead of serving.
    #[arg(long = "parse", value_name = "FILE")]
    parse: Option<PathBuf>,
}

fn init_logging(level: &str) {
    let level = match level.to_ascii_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    };
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("telemetry_collectord={level}").parse().unwrap());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Reads every frame of a process journal and writes one textual line per
/// frame to `<path>.parsed`. Mirrors the collector's `-parse` CLI flag.
fn parse_journal(path: &Path) -> std::io::Result<usize> {
    let file = File::open(path)?;
    let mut reader = JournalReader::new(file);
    let out_path = format!("{}.parsed", path.display());
    let mut out = File::create(&out_path)?;

    let mut count = 0usize;
    loop {
        match reader.read_one::<ProcessFrame>() {
            ReadOutcome::Frame(frame) => {
                count += 1;
                let names: Vec<String> = frame
                    .processes
                    .iter()
                    .map(|p| format!("{}({},{:.1},{:.1},{})", p.name, p.pid, p.ucpu, p.scpu, p.mem))
                    .collect();
                writeln!(out, "{} {}", frame.timestamp, names.join(" "))?;
            }
            ReadOutcome::CorruptFrameSkipped => continue,
            ReadOutcome::Truncated | ReadOutcome::Eof => break,
        }
    }
    info!("Parsed {count} frames from {} -> {out_path}", path.display());
    Ok(count)
}

/// Best-effort discovery of the address this host is reachable at. The
/// real implementation asks an external observer service; that service is
/// out of scope here, so this opens a UDP socket toward a public address
/// (nothing is actually sent) and reads back the local address the kernel
/// would route through, falling back to `0.0.0.0` on any failure.
fn discover_host_addr() -> String {
    use std::net::UdpSocket;
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|sock| {
            sock.connect("8.8.8.8:80")?;
            sock.local_addr()
        })
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|_| "0.0.0.0".to_string())
}

struct SessionPaths {
    info: PathBuf,
    process: PathBuf,
    snapshot: PathBuf,
}

fn session_paths(dir: &Path, tag: &str, id: &SessionId) -> SessionPaths {
    let session_dir = dir.join(tag);
    SessionPaths {
        info: session_dir.join(format!("info-{id}.data")),
        process: session_dir.join(format!("process-{id}.data")),
        snapshot: session_dir.join(format!("snapshot-{id}.data")),
    }
}

fn append_opts() -> OpenOptions {
    let mut opts = OpenOptions::new();
    opts.create(true).append(true);
    opts
}

/// Handles one client connection end-to-end: reads the session request,
/// opens journals, replies, then drains records until disconnect.
fn handle_session(stream: TcpStream, dir: &Path, chart_base_url: &str) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "?".to_string());

    let mut reader = JournalReader::new(stream.try_clone().expect("clone tcp stream"));
    let request: SessionRequest = match reader.read_one::<SessionRequest>() {
        ReadOutcome::Frame(r) => r,
        ReadOutcome::Eof => {
            debug!("{peer}: closed before sending a session request");
            return;
        }
        ReadOutcome::Truncated | ReadOutcome::CorruptFrameSkipped => {
            warn!("{peer}: malformed session request");
            return;
        }
    };

    let today = Utc::now().format("%Y%m%d").to_string();
    let id = SessionId::generate(&today);
    let paths = session_paths(dir, &request.tag, &id);

    if let Some(session_dir) = paths.info.parent() {
        if let Err(e) = fs::create_dir_all(session_dir) {
            error!("{peer}: failed to create session directory: {e}");
            return;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(session_dir, fs::Permissions::from_mode(0o777));
        }
    }

    match File::create(&paths.info) {
        Ok(mut info_file) => {
            let body = format!(
                "cpu_info: {}\nkernel_info: {}\nextra_info: {}\n",
                request.sys_info.cpu_info, request.sys_info.kernel_info, request.extra_info
            );
            if let Err(e) = info_file.write_all(body.as_bytes()) {
                error!("{peer}: failed to write info file: {e}");
            }
        }
        Err(e) => error!("{peer}: failed to create info file: {e}"),
    }

    let response = SessionResponse {
        chart_url: format!("{chart_base_url}/{}/{id}", request.tag),
    };
    let mut writer = JournalWriter::new(stream);
    if let Err(e) = writer.append(&response) {
        error!("{peer}: failed to reply with session response: {e}");
        return;
    }

    info!("{peer}: session {id} opened (tag={})", request.tag);

    let process_file = match append_opts().open(&paths.process) {
        Ok(f) => f,
        Err(e) => {
            error!("{peer}: failed to open process journal: {e}");
            return;
        }
    };
    let snapshot_file = match append_opts().open(&paths.snapshot) {
        Ok(f) => f,
        Err(e) => {
            error!("{peer}: failed to open snapshot journal: {e}");
            return;
        }
    };
    let mut process_journal = JournalWriter::new(process_file);
    let mut snapshot_journal = JournalWriter::new(snapshot_file);

    let mut records = 0u64;
    loop {
        match reader.read_one::<Record>() {
            ReadOutcome::Frame(record) => {
                records += 1;
                if !record.processes.is_empty() {
                    let frame = ProcessFrame {
                        timestamp: record.timestamp,
                        processes: record.processes,
                    };
                    if let Err(e) = process_journal.append(&frame) {
                        error!("{peer}: session {id}: failed writing process frame: {e}");
                        break;
                    }
                }
                if !record.snapshot.is_empty() {
                    let frame = SnapshotFrame {
                        timestamp: record.timestamp,
                        text: record.snapshot,
                    };
                    if let Err(e) = snapshot_journal.append(&frame) {
                        error!("{peer}: session {id}: failed writing snapshot frame: {e}");
                        break;
                    }
                }
            }
            ReadOutcome::Eof => {
                debug!("{peer}: session {id} ended cleanly after {records} records");
                break;
            }
            ReadOutcome::Truncated => {
                warn!("{peer}: session {id} stream truncated after {records} records");
                break;
            }
            ReadOutcome::CorruptFrameSkipped => continue,
        }
    }

    info!("{peer}: session {id} closed ({records} records)");
}

fn main() {
    let args = Args::parse();
    init_logging(&args.log_level);

    if let Some(path) = &args.parse {
        match parse_journal(path) {
            Ok(_) => return,
            Err(e) => {
                error!("Failed to parse {}: {e}", path.display());
                std::process::exit(1);
            }
        }
    }

    let host_addr = discover_host_addr();
    info!(
        "telemetry-collectord {} ({}) starting",
        env!("CARGO_PKG_VERSION"),
        telemetry_core::GIT_SHA
    );
    info!("Host address: {host_addr}");
    info!("Data directory: {}", args.dir);

    let dir = PathBuf::from(&args.dir);
    if let Err(e) = fs::create_dir_all(&dir) {
        error!("Failed to create data directory {}: {e}", args.dir);
        std::process::exit(1);
    }

    let listener = match TcpListener::bind(("0.0.0.0", args.port)) {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind port {}: {e}", args.port);
            std::process::exit(1);
        }
    };
    info!("Listening on port {}", args.port);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {e}");
    }

    listener
        .set_nonblocking(true)
        .expect("set listener nonblocking");

    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, addr)) => {
                debug!("Accepted connection from {addr}");
                let dir = dir.clone();
                let chart_base_url = args.chart_base_url.clone();
                std::thread::spawn(move || {
                    handle_session(stream, &dir, &chart_base_url);
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(std::time::Duration::from_millis(100));
            }
            Err(e) => {
                error!("Accept failed: {e}");
            }
        }
    }

    info!("Shutdown complete");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_paths_follow_tag_and_id_layout() {
        let id = SessionId::generate("20260101");
        let paths = session_paths(Path::new("/data"), "t1", &id);
        assert_eq!(paths.info, PathBuf::from(format!("/data/t1/info-{id}.data")));
        assert_eq!(paths.process, PathBuf::from(format!("/data/t1/process-{id}.data")));
        assert_eq!(paths.snapshot, PathBuf::from(format!("/data/t1/snapshot-{id}.data")));
    }

    #[test]
    fn discover_host_addr_never_panics_and_falls_back_sanely() {
        let addr = discover_host_addr();
        assert!(!addr.is_empty());
    }

    #[test]
    fn parse_journal_writes_one_line_per_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("process-abc.data");
        {
            let file = File::create(&path).unwrap();
            let mut w = JournalWriter::new(file);
            w.append(&ProcessFrame {
                timestamp: 10,
                processes: vec![telemetry_core::model::ProcessInfo {
                    pid: 1,
                    name: "bash".to_string(),
                    ucpu: 1.0,
                    scpu: 0.0,
                    mem: 100,
                }],
            })
            .unwrap();
        }

        let count = parse_journal(&path).unwrap();
        assert_eq!(count, 1);
        let parsed = fs::read_to_string(format!("{}.parsed", path.display())).unwrap();
        assert!(parsed.contains("bash"));
    }
}
