use anyhow::Result;
use chrono::Utc;
use llmscope_detect::security::{SecurityMonitor, SecurityMonitorConfig, SecurityThresholds};
use llmscope_notify::plugin::ChannelRegistry;
use llmscope_notify::queue::{spawn_delivery_worker, DeliveryQueue};
use llmscope_storage::{ControlStore, SqliteTelemetryStore, TelemetryStore};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::signal;
use tokio::time::{interval, Duration};
use tracing_subscriber::EnvFilter;

use llmscope_server::app;
use llmscope_server::config::ServerConfig;
use llmscope_server::pipeline::dispatcher::StoreSink;
use llmscope_server::pipeline::{DetectionCycle, Dispatcher};
use llmscope_server::scheduler::DetectionScheduler;
use llmscope_server::seed;
use llmscope_server::state::AppState;

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  llmscope-server [config.toml]                    Start the server");
    eprintln!("  llmscope-server seed <config.toml> <seeds.toml>  Load notification channels and alert rules from a seed file");
}

#[tokio::main]
async fn main() -> Result<()> {
    llmscope_common::id::init(1, 1);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("llmscope=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("seed") => {
            let config_path = args.get(2).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("seed requires <config.toml> and <seeds.toml> arguments")
            })?;
            let seed_path = args.get(3).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("seed requires <seeds.toml> argument")
            })?;
            run_seed(config_path, seed_path).await
        }
        Some("--help" | "-h") => {
            print_usage();
            Ok(())
        }
        _ => {
            let config_path = args
                .get(1)
                .map(|s| s.as_str())
                .unwrap_or("config/server.toml");
            run_server(config_path).await
        }
    }
}

/// Apply a TOML seed file (channels and alert rules) and exit.
async fn run_seed(config_path: &str, seed_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    let control = ControlStore::new(&config.database.url).await?;
    seed::load_seed_file(&control, seed_path).await
}

async fn run_server(config_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    config.validate()?;

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        db = %config.database.url,
        telemetry_dir = %config.database.telemetry_dir,
        "llmscope-server starting"
    );

    // Build components
    let control = Arc::new(ControlStore::new(&config.database.url).await?);
    let telemetry: Arc<dyn TelemetryStore> = Arc::new(SqliteTelemetryStore::new(Path::new(
        &config.database.telemetry_dir,
    ))?);

    let thresholds = SecurityThresholds::with_overrides(&config.security.thresholds)
        .map_err(|e| anyhow::anyhow!("invalid [security.thresholds] config: {e}"))?;
    let security = Arc::new(SecurityMonitor::new(SecurityMonitorConfig {
        window_minutes: config.security.window_minutes,
        horizon_hours: config.security.horizon_hours,
        max_events: config.security.max_events,
        thresholds,
    }));

    // Delivery pipeline: queue feeding a single background worker that
    // renders and sends through channel plugins, recording outcomes.
    let registry = Arc::new(ChannelRegistry::default());
    let (queue, delivery_rx) = DeliveryQueue::new(config.notify.queue_capacity);
    let sink = Arc::new(StoreSink::new(control.clone()));
    let delivery_handle = spawn_delivery_worker(delivery_rx, registry, sink);

    let dispatcher = Arc::new(Dispatcher::new(control.clone(), queue));
    let cycle = Arc::new(DetectionCycle::new(
        control.clone(),
        telemetry.clone(),
        dispatcher.clone(),
        &config,
    ));

    let state = AppState {
        control: control.clone(),
        telemetry: telemetry.clone(),
        security,
        dispatcher,
        cycle: cycle.clone(),
        last_cycle: Arc::new(Mutex::new(None)),
        start_time: Utc::now(),
        config: Arc::new(config.clone()),
    };

    // HTTP/REST server
    let http_addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let http_app = app::build_http_app(state.clone());
    let http_listener = tokio::net::TcpListener::bind(http_addr).await?;

    // Periodic cleanup task
    let retention = config.retention.clone();
    let cleanup_control = control.clone();
    let cleanup_telemetry = telemetry.clone();
    let cleanup_handle = tokio::spawn(async move {
        let mut tick = interval(Duration::from_secs(retention.cleanup_interval_secs.max(1)));
        loop {
            tick.tick().await;
            match cleanup_telemetry.cleanup(retention.telemetry_days) {
                Ok(removed) if removed > 0 => {
                    tracing::info!(removed, "Cleaned up expired telemetry partitions");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Telemetry cleanup failed");
                }
                _ => {}
            }

            let now = Utc::now();
            let incident_cutoff = now - chrono::Duration::days(i64::from(retention.incidents_days));
            match cleanup_control.cleanup_resolved_incidents(incident_cutoff).await {
                Ok(removed) if removed > 0 => {
                    tracing::info!(removed, "Cleaned up resolved incidents");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Incident cleanup failed");
                }
                _ => {}
            }

            let alert_cutoff = now - chrono::Duration::days(i64::from(retention.alerts_days));
            match cleanup_control.cleanup_alerts(alert_cutoff).await {
                Ok(removed) if removed > 0 => {
                    tracing::info!(removed, "Cleaned up old alerts");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Alert cleanup failed");
                }
                _ => {}
            }
            match cleanup_control.cleanup_anomalies(alert_cutoff).await {
                Ok(removed) if removed > 0 => {
                    tracing::info!(removed, "Cleaned up old anomaly records");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Anomaly cleanup failed");
                }
                _ => {}
            }
            match cleanup_control.cleanup_notifications(alert_cutoff).await {
                Ok(removed) if removed > 0 => {
                    tracing::info!(removed, "Cleaned up old notification records");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Notification cleanup failed");
                }
                _ => {}
            }
        }
    });

    // In-process detection scheduler
    let scheduler_handle = if config.scheduler.enabled {
        let scheduler = DetectionScheduler::new(
            cycle.clone(),
            state.last_cycle.clone(),
            config.scheduler.rule_interval_secs,
            config.scheduler.anomaly_interval_secs,
        );
        Some(tokio::spawn(async move {
            scheduler.run().await;
        }))
    } else {
        tracing::info!("In-process detection scheduler disabled, expecting external cron trigger");
        None
    };

    tracing::info!(http = %http_addr, "Server started");

    let http_server = axum::serve(http_listener, http_app);
    if let Err(e) = http_server
        .with_graceful_shutdown(async {
            signal::ctrl_c().await.ok();
        })
        .await
    {
        tracing::error!(error = %e, "HTTP server error");
    }

    cleanup_handle.abort();
    delivery_handle.abort();
    if let Some(h) = scheduler_handle {
        h.abort();
    }
    tracing::info!("Server stopped");

    Ok(())
}
