//! Replay and analysis: turns a flat sequence of [`ProcessFrame`]s into
//! aligned CPU/MEM time series ready for charting, applies the noise-floor
//! filter, and ranks series by descending average for stable legend/stack
//! ordering.

use crate::journal::ProcessFrame;
use std::collections::HashMap;

/// Per-metric, per-series aligned time data. Every series named in `cpu`
/// or `mem` has exactly `time.len()` entries: early frames before a name
/// first appeared are zero, as are later frames after it stopped
/// reporting. `mem` values are in MB (`ProcessInfo::mem` is KB).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessRecords {
    pub time: Vec<i64>,
    pub cpu: HashMap<String, Vec<f64>>,
    pub mem: HashMap<String, Vec<f64>>,
}

/// Thresholds a series must clear on at least one metric to survive the
/// noise-floor filter. Defaults match the spec's parameterized filter,
/// not the single unparameterized pair the original tool hardcoded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Filter {
    pub cpu_avg: f64,
    pub cpu_max: f64,
    pub mem_avg: f64,
    pub mem_max: f64,
}

impl Default for Filter {
    fn default() -> Self {
        Filter {
            cpu_avg: 1.0,
            cpu_max: 10.0,
            mem_avg: 5.0,
            mem_max: 10.0,
        }
    }
}

/// Derives the display name for a process row: the raw name as-is if it
/// already looks bracketed (e.g. `[CPU0-user]`, `[kworker/0:1]`), else
/// `name-pid` so same-named processes don't collide in the chart legend.
fn series_name(name: &str, pid: i32) -> String {
    if name.contains('[') {
        name.to_string()
    } else {
        format!("{name}-{pid}")
    }
}

/// Builds aligned CPU/MEM time series from a sequence of frames, already
/// in chronological order.
pub fn analyze(frames: &[ProcessFrame]) -> ProcessRecords {
    let mut records = ProcessRecords::default();

    for frame in frames {
        if frame.processes.is_empty() {
            continue;
        }
        records.time.push(frame.timestamp);
        let frame_len = records.time.len();

        let mut seen_this_frame = std::collections::HashSet::new();
        for p in &frame.processes {
            let name = series_name(&p.name, p.pid);
            seen_this_frame.insert(name.clone());

            let cpu_series = records.cpu.entry(name.clone()).or_insert_with(|| {
                vec![0.0; frame_len - 1] // zero-pad for frames before this name existed
            });
            cpu_series.push((p.ucpu + p.scpu) as f64);

            let mem_series = records
                .mem
                .entry(name)
                .or_insert_with(|| vec![0.0; frame_len - 1]);
            mem_series.push(p.mem as f64 / 1024.0); // memKB -> MB
        }

        // Any series that didn't report this frame gets a zero so every
        // series ends this frame at exactly `frame_len`.
        for (name, series) in records.cpu.iter_mut() {
            if !seen_this_frame.contains(name) && series.len() < frame_len {
                series.push(0.0);
            }
        }
        for (name, series) in records.mem.iter_mut() {
            if !seen_this_frame.contains(name) && series.len() < frame_len {
                series.push(0.0);
            }
        }
    }

    records
}

fn avg(series: &[f64]) -> f64 {
    if series.is_empty() {
        0.0
    } else {
        series.iter().sum::<f64>() / series.len() as f64
    }
}

fn max(series: &[f64]) -> f64 {
    series.iter().copied().fold(0.0, f64::max)
}

/// Removes CPU series that clear neither the CPU average nor max threshold,
/// and MEM series that clear neither the MEM average nor max threshold.
/// The two axes are filtered independently: a process can be noise-floored
/// out of the memory chart while still showing up on CPU, and vice versa.
pub fn apply_filter(records: &mut ProcessRecords, filter: &Filter) {
    records
        .cpu
        .retain(|_, series| avg(series) > filter.cpu_avg || max(series) > filter.cpu_max);
    records
        .mem
        .retain(|_, series| avg(series) > filter.mem_avg || max(series) > filter.mem_max);
}

/// Ranks series names by descending average of the given metric map —
/// the order charts stack/insert series in.
pub fn rank(series: &HashMap<String, Vec<f64>>) -> Vec<String> {
    let mut pairs: Vec<(String, f64)> = series.iter().map(|(k, v)| (k.clone(), avg(v))).collect();
    pairs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    pairs.into_iter().map(|(name, _)| name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProcessInfo;

    fn frame(ts: i64, rows: &[(i32, &str, f32, u64)]) -> ProcessFrame {
        ProcessFrame {
            timestamp: ts,
            processes: rows
                .iter()
                .map(|(pid, name, cpu, mem)| ProcessInfo {
                    pid: *pid,
                    name: name.to_string(),
                    ucpu: *cpu,
                    scpu: 0.0,
                    mem: *mem,
                })
                .collect(),
        }
    }

    #[test]
    fn every_series_ends_each_frame_at_the_frame_count() {
        let frames = vec![
            frame(100, &[(1, "bash", 5.0, 1000)]),
            frame(101, &[(1, "bash", 6.0, 1000), (2, "top", 20.0, 2000)]),
            frame(102, &[(2, "top", 21.0, 2000)]),
        ];
        let records = analyze(&frames);
        assert_eq!(records.time.len(), 3);
        for series in records.cpu.values() {
            assert_eq!(series.len(), 3);
        }
        for series in records.mem.values() {
            assert_eq!(series.len(), 3);
        }
    }

    #[test]
    fn late_joiner_is_zero_padded_at_start() {
        let frames = vec![
            frame(100, &[(1, "bash", 5.0, 1000)]),
            frame(101, &[(1, "bash", 5.0, 1000), (2, "top", 99.0, 500)]),
        ];
        let records = analyze(&frames);
        let top = &records.cpu["top-2"];
        assert_eq!(top, &vec![0.0, 99.0]);
    }

    #[test]
    fn early_leaver_is_zero_padded_at_end() {
        let frames = vec![
            frame(100, &[(1, "bash", 5.0, 1000), (2, "top", 99.0, 500)]),
            frame(101, &[(1, "bash", 5.0, 1000)]),
        ];
        let records = analyze(&frames);
        let top = &records.cpu["top-2"];
        assert_eq!(top, &vec![99.0, 0.0]);
    }

    #[test]
    fn frames_with_no_processes_are_excluded_from_the_time_axis() {
        let frames = vec![
            frame(100, &[(1, "bash", 5.0, 1000)]),
            frame(101, &[]),
            frame(102, &[(1, "bash", 6.0, 1000)]),
        ];
        let records = analyze(&frames);
        assert_eq!(records.time, vec![100, 102]);
        assert_eq!(records.cpu["bash-1"].len(), 2);
    }

    #[test]
    fn memory_is_converted_from_kb_to_mb() {
        let frames = vec![frame(100, &[(1, "bash", 0.0, 2048)])];
        let records = analyze(&frames);
        assert_eq!(records.mem["bash-1"], vec![2.0]);
    }

    #[test]
    fn bracketed_names_pass_through_unmodified() {
        let frames = vec![frame(100, &[(0, "[CPU0-user]", 12.0, 0)])];
        let records = analyze(&frames);
        assert!(records.cpu.contains_key("[CPU0-user]"));
    }

    #[test]
    fn filter_drops_quiet_series_from_both_axes() {
        let mut records = ProcessRecords {
            time: vec![1, 2],
            cpu: HashMap::from([
                ("busy-1".to_string(), vec![50.0, 50.0]),
                ("quiet-2".to_string(), vec![0.1, 0.1]),
            ]),
            mem: HashMap::from([
                ("busy-1".to_string(), vec![0.0, 0.0]),
                ("quiet-2".to_string(), vec![0.0, 0.0]),
            ]),
        };
        apply_filter(&mut records, &Filter::default());
        assert!(records.cpu.contains_key("busy-1"));
        assert!(!records.cpu.contains_key("quiet-2"));
    }

    #[test]
    fn filter_applies_cpu_and_mem_thresholds_independently() {
        // Hot on CPU, trivial on memory: should survive on the CPU axis
        // and be dropped from the MEM axis, not kept/dropped as a unit.
        let mut records = ProcessRecords {
            time: vec![1, 2],
            cpu: HashMap::from([("cpu-hog-1".to_string(), vec![50.0, 50.0])]),
            mem: HashMap::from([("cpu-hog-1".to_string(), vec![0.0, 0.0])]),
        };
        apply_filter(&mut records, &Filter::default());
        assert!(records.cpu.contains_key("cpu-hog-1"));
        assert!(!records.mem.contains_key("cpu-hog-1"));
    }

    #[test]
    fn filter_is_a_strict_deletion_boundary() {
        // A series exactly at the threshold on both avg and max does not
        // clear it and is dropped.
        let filter = Filter {
            cpu_avg: 10.0,
            cpu_max: 10.0,
            mem_avg: 10.0,
            mem_max: 10.0,
        };
        let mut records = ProcessRecords {
            time: vec![1, 2],
            cpu: HashMap::from([("exact-1".to_string(), vec![10.0, 10.0])]),
            mem: HashMap::new(),
        };
        apply_filter(&mut records, &filter);
        assert!(!records.cpu.contains_key("exact-1"));
    }

    #[test]
    fn rank_orders_by_descending_average() {
        let series = HashMap::from([
            ("a".to_string(), vec![1.0, 1.0]),
            ("b".to_string(), vec![10.0, 10.0]),
            ("c".to_string(), vec![5.0, 5.0]),
        ]);
        assert_eq!(rank(&series), vec!["b", "c", "a"]);
    }
}
