use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod ledger;
mod model_store;
mod recognition;
mod sample_store;
mod service;
mod stats;
mod training;

use config::Config;
use dbus_interface::{AttendanceService1, BUS_NAME, OBJECT_PATH};
use rollcall_core::{LbphClassifier, ScrfdDetector};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::load().context("failed to load configuration")?;
    tracing::info!(
        dataset = %config.dataset_dir.display(),
        model = %config.model_path.display(),
        ledger = %config.ledger_dir.display(),
        match_threshold = config.match_threshold,
        "configuration loaded"
    );

    // Fail fast if the detector model is missing.
    let scrfd_path = config.scrfd_model_path();
    let detector = ScrfdDetector::load(&scrfd_path, config.detection_threshold)
        .with_context(|| format!("failed to load face detector from {}", scrfd_path.display()))?;
    tracing::info!(path = %scrfd_path.display(), "SCRFD detector loaded");

    let classifier =
        LbphClassifier::new(config.lbph_params()).context("invalid classifier parameters")?;

    let service = service::AttendanceService::new(
        Box::new(detector),
        Arc::new(classifier),
        sample_store::SampleStore::new(&config.dataset_dir),
        model_store::ModelArtifacts::new(&config.model_path, &config.labels_path),
        ledger::Ledger::new(&config.ledger_dir),
        recognition::RecognitionPolicy::new(config.match_threshold),
    );
    let engine = engine::spawn_engine(service)?;

    let builder = if config.system_bus {
        zbus::connection::Builder::system()?
    } else {
        zbus::connection::Builder::session()?
    };
    let _connection = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, AttendanceService1::new(engine))?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
