//! Builds the line/pie chart HTML pages: decodes a process journal, aligns
//! and filters the series, ranks them, and stamps the result plus the
//! embedded JS runtime into a page template.

use chrono::{TimeZone, Utc};
use rust_embed::Embed;
use telemetry_core::analysis::{self, Filter, ProcessRecords};
use telemetry_core::journal::{JournalReader, ProcessFrame, ReadOutcome};

#[derive(Embed)]
#[folder = "assets"]
pub struct Assets;

fn embedded_text(name: &str) -> String {
    Assets::get(name)
        .map(|f| String::from_utf8_lossy(&f.data).into_owned())
        .unwrap_or_default()
}

/// Decodes every frame of a process journal, tolerating (and stopping at)
/// the first corrupt or truncated frame without raising to the caller.
pub fn read_process_frames(path: &std::path::Path) -> std::io::Result<Vec<ProcessFrame>> {
    let file = std::fs::File::open(path)?;
    let mut reader = JournalReader::new(file);
    let mut frames = Vec::new();
    loop {
        match reader.read_one::<ProcessFrame>() {
            ReadOutcome::Frame(f) => frames.push(f),
            ReadOutcome::CorruptFrameSkipped => continue,
            ReadOutcome::Truncated | ReadOutcome::Eof => break,
        }
    }
    Ok(frames)
}

fn hhmmss(epoch_secs: i64) -> String {
    Utc.timestamp_opt(epoch_secs, 0)
        .single()
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_default()
}

/// `name` starts with `[` -> hidden at page load, per the default
/// visibility rule.
fn default_hidden(name: &str) -> bool {
    name.starts_with('[')
}

fn series_json(metric: &std::collections::HashMap<String, Vec<f64>>) -> String {
    let ranked = analysis::rank(metric);
    let entries: Vec<String> = ranked
        .iter()
        .map(|name| {
            let data = &metric[name];
            format!(
                "{{\"name\":{},\"data\":[{}],\"hidden\":{}}}",
                serde_json::to_string(name).unwrap_or_default(),
                data.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(","),
                default_hidden(name)
            )
        })
        .collect();
    format!("[{}]", entries.join(","))
}

fn pie_series_json(metric: &std::collections::HashMap<String, Vec<f64>>) -> String {
    let ranked = analysis::rank(metric);
    let entries: Vec<String> = ranked
        .iter()
        .map(|name| {
            let avg = {
                let v = &metric[name];
                if v.is_empty() { 0.0 } else { v.iter().sum::<f64>() / v.len() as f64 }
            };
            format!(
                "{{\"name\":{},\"value\":{},\"hidden\":{}}}",
                serde_json::to_string(name).unwrap_or_default(),
                avg,
                default_hidden(name)
            )
        })
        .collect();
    format!("[{}]", entries.join(","))
}

fn categories_json(records: &ProcessRecords) -> String {
    let labels: Vec<String> = records.time.iter().map(|t| format!("\"{}\"", hhmmss(*t))).collect();
    format!("[{}]", labels.join(","))
}

/// Button bar shared by every rendered page.
fn button_bar() -> &'static str {
    r#"<div class="button-bar">
      <button id="btn-readme">README</button>
      <button id="btn-history">HISTORY</button>
      <button id="btn-info">INFO</button>
      <button id="btn-snapshot">SNAPSHOT</button>
      <button id="btn-pieview">PIEVIEW/LINEVIEW</button>
      <button id="btn-cpuselectall">CPUOFF/CPUON</button>
      <button id="btn-memselectall">MEMOFF/MEMON</button>
      <button id="btn-syscpu">SYSCPU/P-CPU</button>
      <button id="btn-sysmem">SYSMEM/P-MEM</button>
    </div>"#
}

fn page_shell(title: &str, body: &str, readme_url: &str, history_url: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title}</title>
<style>
  body {{ font-family: sans-serif; margin: 0; padding: 0 1em; }}
  .button-bar button {{ margin: 4px; }}
  .chart-legend {{ display: flex; flex-direction: column; overflow-y: auto; max-height: 350px; }}
  .chart-legend-item {{ cursor: pointer; font-size: 12px; }}
  .swatch {{ display: inline-block; width: 10px; height: 10px; margin-right: 4px; }}
  .chart-row {{ display: flex; }}
</style>
<script>{theme_js}</script>
<script>{chart_js}</script>
</head>
<body>
{bar}
{body}
<script>
  TelemetryChart.wireButtons({{ readmeUrl: {readme}, historyUrl: {history} }});
</script>
</body>
</html>"#,
        title = title,
        theme_js = embedded_text("theme.js"),
        chart_js = embedded_text("chart.js"),
        bar = button_bar(),
        body = body,
        readme = serde_json::to_string(readme_url).unwrap_or_default(),
        history = serde_json::to_string(history_url).unwrap_or_default(),
    )
}

pub fn render_line_page(records: &ProcessRecords, readme_url: &str, history_url: &str) -> String {
    let categories = categories_json(records);
    let cpu = series_json(&records.cpu);
    let mem = series_json(&records.mem);
    let body = format!(
        r#"<div class="chart-row"><div id="cpu-chart"></div></div>
<div class="chart-row"><div id="mem-chart"></div></div>
<script>
  TelemetryChart.renderLineChart("cpu-chart", {categories}, {cpu});
  TelemetryChart.renderLineChart("mem-chart", {categories}, {mem});
</script>"#
    );
    page_shell("telemetry session", &body, readme_url, history_url)
}

pub fn render_pie_page(records: &ProcessRecords, readme_url: &str, history_url: &str) -> String {
    let cpu = pie_series_json(&records.cpu);
    let mem = pie_series_json(&records.mem);
    let body = format!(
        r#"<div class="chart-row"><div id="cpu-chart"></div><div id="mem-chart"></div></div>
<script>
  TelemetryChart.renderPieChart("cpu-chart", {cpu});
  TelemetryChart.renderPieChart("mem-chart", {mem});
</script>"#
    );
    page_shell("telemetry session (pie)", &body, readme_url, history_url)
}

/// Decodes, aligns, filters and ranks a journal into the records a page
/// renders from.
pub fn analyze_journal(path: &std::path::Path, filter: &Filter) -> std::io::Result<ProcessRecords> {
    let frames = read_process_frames(path)?;
    let mut records = analysis::analyze(&frames);
    analysis::apply_filter(&mut records, filter);
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use telemetry_core::journal::JournalWriter;
    use telemetry_core::model::ProcessInfo;

    #[test]
    fn hhmmss_formats_epoch_seconds() {
        assert_eq!(hhmmss(0), "00:00:00");
    }

    #[test]
    fn default_hidden_marks_bracketed_names_only() {
        assert!(default_hidden("[CPU0-user]"));
        assert!(!default_hidden("bash-100"));
    }

    #[test]
    fn analyze_journal_round_trips_through_a_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("process-xyz.data");
        {
            let file = std::fs::File::create(&path).unwrap();
            let mut w = JournalWriter::new(file);
            w.append(&ProcessFrame {
                timestamp: 1000,
                processes: vec![ProcessInfo { pid: 1, name: "bash".to_string(), ucpu: 50.0, scpu: 0.0, mem: 2048 }],
            })
            .unwrap();
        }
        let records = analyze_journal(&path, &Filter::default()).unwrap();
        assert_eq!(records.time, vec![1000]);
        assert!(records.cpu.contains_key("bash-1"));
    }

    #[test]
    fn render_line_page_embeds_categories_and_series() {
        let records = ProcessRecords {
            time: vec![10],
            cpu: std::collections::HashMap::from([("bash-1".to_string(), vec![5.0])]),
            mem: std::collections::HashMap::from([("bash-1".to_string(), vec![2.0])]),
        };
        let html = render_line_page(&records, "http://x/README", "http://x/");
        assert!(html.contains("bash-1"));
        assert!(html.contains("renderLineChart"));
    }
}
