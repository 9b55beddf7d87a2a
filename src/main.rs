use clap::Parser;
use node_stats::api::{router, AppState};
use node_stats::config::Config;
use node_stats::poller::run_poller;
use node_stats::runtime;
use node_stats::source::ReplaySource;
use node_stats::tracker::{NodeStatsTracker, TrackerHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    runtime::init_tracing();
    let config = Config::parse();
    info!(
        "Starting node-stats: node_id={}, frames={}, interval={}ms, buffer_size={}, bind={}",
        config.node_id,
        config.frames.display(),
        config.interval_ms,
        config.buffer_size,
        config.http_addr()
    );

    let source = match ReplaySource::open(&config.frames).await {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to open frames {}: {}", config.frames.display(), e);
            return;
        }
    };

    let tracker = TrackerHandle::new(NodeStatsTracker::new(
        config.node(),
        config.buffer_size.get(),
    ));
    let cancel = CancellationToken::new();
    let (updates, _updates_rx) = tokio::sync::broadcast::channel(256);

    let poll_handle = tokio::spawn(run_poller(
        tracker.clone(),
        source,
        config.interval(),
        updates.clone(),
        cancel.clone(),
    ));

    let addr = config.http_addr();
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            cancel.cancel();
            let _ = poll_handle.await;
            return;
        }
    };
    info!(
        "HTTP server listening on http://{}",
        listener.local_addr().unwrap_or(addr)
    );

    let app = router(AppState {
        tracker,
        updates,
        shutdown: cancel.clone(),
    });
    let shutdown = cancel.clone();
    let web_handle = tokio::spawn(async move {
        let res = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
        if let Err(e) = res {
            error!("Server error: {}", e);
        }
    });

    runtime::shutdown_signal().await;
    cancel.cancel();

    let _ = web_handle.await;
    let _ = poll_handle.await;
}
