use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use log::{info, warn};

use pulselink::connection::WsTransport;
use pulselink::pipeline::{PipelineDeps, TelemetryPipeline};
use pulselink::report::{HttpReportSink, StaticSessionDirectory};
use pulselink::settings::SettingsStore;

fn settings_path() -> PathBuf {
    std::env::var("PULSELINK_SETTINGS")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("pulselink.json"))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("pulselink starting up...");

    let store = SettingsStore::new(settings_path())?;
    let settings = store.settings();
    if settings.connection.target < 0 {
        warn!("no session target configured; the connection will fail fast until one is set");
    }

    let directory = StaticSessionDirectory {
        user_id: std::env::var("PULSELINK_USER_ID").unwrap_or_else(|_| "local-user".into()),
        session_id: std::env::var("PULSELINK_SESSION_ID").ok(),
        course_id: std::env::var("PULSELINK_COURSE_ID").unwrap_or_else(|_| "unassigned".into()),
    };

    let pipeline = TelemetryPipeline::new(
        settings.clone(),
        PipelineDeps {
            transport: Arc::new(WsTransport::new(settings.connection.endpoint.clone())),
            sink: Arc::new(HttpReportSink::new(
                settings.report.endpoint.clone(),
                settings.report.access_token.clone(),
            )),
            directory: Arc::new(directory),
            // No short-range radio backend is wired in the reference binary;
            // hosts with one inject it through PipelineDeps.
            proximity: None,
        },
    );

    pipeline.start().await?;
    info!("pipeline running; press ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    pipeline.stop().await;

    Ok(())
}
