use anyhow::Result;
use tracing::{error, info};

use rove::config::format_duration;
use rove::state::AppState;

/// Tick until Ctrl-C, then let in-flight runs abort at their next hop.
pub async fn daemon(state: &AppState) -> Result<()> {
    let scheduler = state.scheduler.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown requested");
                scheduler.shutdown();
            }
            Err(e) => error!(error = %e, "failed to listen for Ctrl-C"),
        }
    });

    info!(
        interval = %format_duration(state.config.scheduler.refresh_interval),
        staleness = %format_duration(state.config.scheduler.staleness_threshold),
        workers = state.config.scheduler.max_concurrent_runs,
        "daemon started"
    );
    state.scheduler.run_forever().await;
    Ok(())
}
