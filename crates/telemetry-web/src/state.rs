//! Shared application state: the data directory sessions are read from and
//! the single server-wide noise-floor filter.
//!
//! The filter is intentionally a plain `Mutex`-guarded value shared by every
//! request, matching the historical source's global filter (flagged in the
//! design notes as a correctness hazard for concurrent requests with
//! different query strings - tolerable here because an advisory,
//! last-query-wins filter is explicitly called out as an acceptable race).

use std::path::PathBuf;
use std::sync::Mutex;

use telemetry_core::analysis::Filter;

pub struct AppState {
    pub data_dir: PathBuf,
    pub filter: Mutex<Filter>,
    pub file_server_url: String,
    pub readme_url: String,
}

impl AppState {
    pub fn new(data_dir: PathBuf, file_server_url: String, readme_url: String) -> Self {
        Self {
            data_dir,
            filter: Mutex::new(Filter::default()),
            file_server_url,
            readme_url,
        }
    }

    /// Parses a `?filter=cpuAvg,cpuMax,memAvg,memMax` query value, applying
    /// it to the shared filter. Malformed input is silently ignored, per
    /// the router's documented behavior.
    pub fn apply_filter_query(&self, raw: Option<&str>) {
        let Some(raw) = raw else { return };
        let parts: Vec<&str> = raw.split(',').collect();
        if parts.len() != 4 {
            return;
        }
        let parsed: Option<Vec<f64>> = parts.iter().map(|p| p.trim().parse::<f64>().ok()).collect();
        let Some(values) = parsed else { return };
        let mut filter = self.filter.lock().unwrap();
        *filter = Filter {
            cpu_avg: values[0],
            cpu_max: values[1],
            mem_avg: values[2],
            mem_max: values[3],
        };
    }

    pub fn current_filter(&self) -> Filter {
        *self.filter.lock().unwrap()
    }
}
