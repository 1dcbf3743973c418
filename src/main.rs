use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use geotrips::config::AppConfig;
use geotrips::home::HomeCalibrator;
use geotrips::observer::GeoEventMirror;
use geotrips::processor::{GeoEventRecorder, TripSelector};
use geotrips::source::{Pipeline, ReplaySource};
use geotrips::store::{EventFilter, EventStore, FileKeyValueStore, MemoryEventStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load config
    let config = AppConfig::load()?;

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .init();

    info!("Starting geotrips pipeline...");

    let kv = Arc::new(FileKeyValueStore::open(PathBuf::from(
        &config.home_store_path,
    ))?);
    let calibrator = Arc::new(HomeCalibrator::new(kv));
    let store = Arc::new(MemoryEventStore::new());
    let source = Arc::new(ReplaySource::new(&config.replay_path));

    let recorder = Arc::new(GeoEventRecorder::new(
        config.recorder_config(),
        store.clone(),
        calibrator.clone(),
        source.clone(),
    ));
    let selector = TripSelector::new(
        store.clone(),
        recorder.clone(),
        Some(config.idle_filter_min_speed_mph),
    );

    let mirror = GeoEventMirror::attach(store.clone(), EventFilter::all());
    selector.bind_observer(mirror.clone());

    if let Some(name) = &config.trip_name {
        let trip = selector.create_trip(name)?;
        info!("recording into trip '{}'", trip.trip_name);
    }

    let (tx, rx) = mpsc::channel(100);
    let (pipeline, _handle) = Pipeline::new(recorder.clone());

    let replay = tokio::spawn(async move { source.run(tx).await });
    pipeline.run(rx).await;
    replay.await??;

    info!(
        "replay complete: {} events stored, {} fixes discarded",
        store.geo_event_count(),
        recorder.discard_count()
    );
    for event in mirror.events() {
        info!(
            "{}  lat:{:.5} long:{:.5}  {:.1} MPH",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.latitude,
            event.longitude,
            event.speed_mph
        );
    }

    mirror.detach();

    Ok(())
}
