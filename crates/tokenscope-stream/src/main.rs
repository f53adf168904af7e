use anyhow::Context;
use clap::Parser;
use std::io::Write;
use tokenscope_stream::config::{load_config, Args};
use tokenscope_stream::logging::init_logging;
use tokenscope_stream::{connect, Dashboard, DashboardSnapshot};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config(Args::parse()).context("invalid configuration")?;
    let _log_guard = init_logging(&config.log_dir, config.log_stdout);
    info!(
        event = "tokenscope_start",
        url = %config.url,
        replace_policy = %config.replace_policy,
        max_reconnect_attempts = config.connection.reconnect.max_attempts
    );

    let (dashboard, mut snapshots) = Dashboard::new(config.replace_policy);
    let (handle, events) = connect(config.url.clone(), config.connection.clone());
    let consumer = tokio::spawn(dashboard.run(events));

    let json = config.json;
    let reporter = tokio::spawn(async move {
        while snapshots.changed().await.is_ok() {
            let snapshot = snapshots.borrow_and_update().clone();
            report_snapshot(&snapshot, json);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!(event = "tokenscope_shutdown");
    handle.disconnect().await;
    drop(handle);

    match consumer.await {
        Ok(dashboard) => {
            let counters = dashboard.counters();
            info!(
                event = "tokenscope_stop",
                tokens = dashboard.board().len(),
                applied = counters.applied,
                dropped_unknown = counters.dropped_unknown,
                dropped_malformed = counters.dropped_malformed,
                dropped_missing = counters.dropped_missing
            );
        }
        Err(err) => error!(event = "tokenscope_consumer_failed", error = %err),
    }
    let _ = reporter.await;
    Ok(())
}

fn report_snapshot(snapshot: &DashboardSnapshot, json: bool) {
    info!(
        event = "dashboard_snapshot",
        connection = %snapshot.connection,
        retries_exhausted = snapshot.retries_exhausted,
        total = snapshot.stats.total_tokens,
        analyzing = snapshot.stats.analyzing_count,
        completed = snapshot.stats.completed_count,
        completed_full = snapshot.stats.completed_full_count,
        failed = snapshot.stats.failed_count
    );
    if !json {
        return;
    }
    match serde_json::to_string(snapshot) {
        Ok(line) => {
            let mut stdout = std::io::stdout().lock();
            let _ = writeln!(stdout, "{line}");
            let _ = stdout.flush();
        }
        Err(err) => error!(event = "snapshot_encode_failed", error = %err),
    }
}
