//! Session HTTP router handlers: line/pie chart views, the info and
//! snapshot dumps, and the raw-file fallback for any `{session}` path
//! segment that contains a `.`.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use chrono::TimeZone;

use telemetry_core::journal::{JournalReader, ReadOutcome, SnapshotFrame};

use crate::chart::{self, render_line_page, render_pie_page};
use crate::state::AppState;

pub type SharedState = Arc<AppState>;

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "File not found.").into_response()
}

fn session_dir(state: &AppState, tag: &str) -> PathBuf {
    state.data_dir.join(tag)
}

fn journal_path(state: &AppState, tag: &str, kind: &str, session: &str) -> PathBuf {
    session_dir(state, tag).join(format!("{kind}-{session}.data"))
}

fn raw_file_path(state: &AppState, tag: &str, session: &str) -> PathBuf {
    session_dir(state, tag).join(session)
}

async fn serve_raw_file(path: PathBuf) -> Response {
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let mime = mime_guess::from_path(&path).first_or_octet_stream();
            ([(header::CONTENT_TYPE, mime.essence_str().to_string())], bytes).into_response()
        }
        Err(_) => not_found(),
    }
}

/// `GET /{tag}/{session}[?filter=…]` - line view, or a raw file fetch when
/// `session` contains a `.`.
pub async fn line_view(
    State(state): State<SharedState>,
    Path((tag, session)): Path<(String, String)>,
    Query(params): Query<std::collections::HashMap<String, String>>,
) -> Response {
    if session.contains('.') {
        return serve_raw_file(raw_file_path(&state, &tag, &session)).await;
    }

    state.apply_filter_query(params.get("filter").map(String::as_str));
    let path = journal_path(&state, &tag, "process", &session);
    match chart::analyze_journal(&path, &state.current_filter()) {
        Ok(records) => Html(render_line_page(&records, &state.readme_url, &state.file_server_url)).into_response(),
        Err(_) => not_found(),
    }
}

/// `GET /{tag}/{session}/pie[?filter=…]`.
pub async fn pie_view(
    State(state): State<SharedState>,
    Path((tag, session)): Path<(String, String)>,
    Query(params): Query<std::collections::HashMap<String, String>>,
) -> Response {
    state.apply_filter_query(params.get("filter").map(String::as_str));
    let path = journal_path(&state, &tag, "process", &session);
    match chart::analyze_journal(&path, &state.current_filter()) {
        Ok(records) => Html(render_pie_page(&records, &state.readme_url, &state.file_server_url)).into_response(),
        Err(_) => not_found(),
    }
}

/// `GET /{tag}/{session}/info` - the info journal dumped verbatim.
pub async fn info_view(State(state): State<SharedState>, Path((tag, session)): Path<(String, String)>) -> Response {
    let path = journal_path(&state, &tag, "info", &session);
    match tokio::fs::read_to_string(&path).await {
        Ok(text) => ([(header::CONTENT_TYPE, "text/plain")], text).into_response(),
        Err(_) => not_found(),
    }
}

/// `GET /{tag}/{session}/snapshot` - every snapshot frame concatenated as
/// `======<HH:MM:SS>, snapshot======\n<body>\n`.
pub async fn snapshot_view(State(state): State<SharedState>, Path((tag, session)): Path<(String, String)>) -> Response {
    let path = journal_path(&state, &tag, "snapshot", &session);
    let Ok(file) = std::fs::File::open(&path) else {
        return not_found();
    };

    let mut reader = JournalReader::new(file);
    let mut out = String::new();
    loop {
        match reader.read_one::<SnapshotFrame>() {
            ReadOutcome::Frame(frame) => {
                let stamp = chrono::Utc
                    .timestamp_opt(frame.timestamp, 0)
                    .single()
                    .map(|t| t.format("%H:%M:%S").to_string())
                    .unwrap_or_default();
                out.push_str(&format!("======{stamp}, snapshot======\n{}\n", frame.text));
            }
            ReadOutcome::CorruptFrameSkipped => continue,
            ReadOutcome::Truncated | ReadOutcome::Eof => break,
        }
    }
    ([(header::CONTENT_TYPE, "text/plain")], out).into_response()
}
