//! telemetry-web - on-demand chart renderer and session HTTP router.
//!
//! Stateless per request: every hit re-decodes the journal named by the
//! URL. The only shared state is the data directory and the server-wide
//! noise-floor filter (advisory, last-query-wins).

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod chart;
mod handlers;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use clap::Parser;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;

use state::AppState;

/// Chart server: renders session journals as interactive HTML.
#[derive(Parser)]
#[command(name = "telemetry-web", about = "Session chart renderer", version)]
struct Args {
    /// Listen address.
    #[arg(long, default_value = "0.0.0.0:8090", env = "TELEMETRY_WEB_LISTEN")]
    listen: String,

    /// Directory sessions are read from; must match the collector's `-dir`.
    #[arg(long = "dir", default_value = "./data", env = "TELEMETRY_WEB_DIR")]
    dir: PathBuf,

    /// URL of the sibling read-only file server's `/{tag}` index, used by
    /// the HISTORY button.
    #[arg(long = "fileServerUrl", default_value = "http://127.0.0.1:8091", env = "TELEMETRY_FILE_SERVER_URL")]
    file_server_url: String,

    /// URL of the sibling file server's README, used by the README button.
    #[arg(long = "readmeUrl", default_value = "http://127.0.0.1:8091/README", env = "TELEMETRY_README_URL")]
    readme_url: String,

    /// Logging verbosity.
    #[arg(long = "logLevel", default_value = "info")]
    log_level: String,
}

fn init_logging(level: &str) {
    let level = match level.to_ascii_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    };
    let filter = EnvFilter::from_default_env().add_directive(format!("telemetry_web={level}").parse().unwrap());
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/{tag}/{session}", get(handlers::line_view))
        .route("/{tag}/{session}/pie", get(handlers::pie_view))
        .route("/{tag}/{session}/info", get(handlers::info_view))
        .route("/{tag}/{session}/snapshot", get(handlers::snapshot_view))
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!(
        "telemetry-web {} ({}) starting",
        env!("CARGO_PKG_VERSION"),
        telemetry_core::GIT_SHA
    );
    info!("Serving sessions from {}", args.dir.display());

    let state = Arc::new(AppState::new(args.dir, args.file_server_url, args.readme_url));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&args.listen)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {}: {e}", args.listen));
    info!("Listening on {}", args.listen);

    axum::serve(listener, app).await.expect("server error");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_builds_without_panicking() {
        let state = Arc::new(AppState::new(PathBuf::from("/tmp"), "http://x/".into(), "http://x/README".into()));
        let _app = router(state);
    }
}
