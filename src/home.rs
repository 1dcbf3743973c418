use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::geo::GeoPoint;
use crate::store::{KeyValueStore, Result};

const HOME_KEY: &str = "home_location";

/// Determines and persists the reference home coordinate.
///
/// The value is observable through `watch()` so dependents (enabling a
/// "reset home" action, for instance) react to changes.
pub struct HomeCalibrator {
    kv: Arc<dyn KeyValueStore>,
    tx: watch::Sender<Option<GeoPoint>>,
}

impl HomeCalibrator {
    /// Loads any persisted home coordinate. Absence or a decode failure
    /// leaves home unset.
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        let initial = match kv.get(HOME_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<GeoPoint>(&raw) {
                Ok(point) => Some(point),
                Err(e) => {
                    warn!("failed to decode stored home location: {}", e);
                    None
                }
            },
            Ok(None) => {
                info!("no stored home location");
                None
            }
            Err(e) => {
                warn!("unable to load home location: {}", e);
                None
            }
        };

        let (tx, _) = watch::channel(initial);
        Self { kv, tx }
    }

    pub fn home(&self) -> Option<GeoPoint> {
        *self.tx.borrow()
    }

    /// Persists synchronously, then publishes the new value.
    pub fn set_home(&self, point: GeoPoint) -> Result<()> {
        let encoded = serde_json::to_string(&point)?;
        self.kv.set(HOME_KEY, &encoded)?;
        self.tx.send_replace(Some(point));
        info!(
            "home location set to {:.5}, {:.5}",
            point.latitude, point.longitude
        );
        Ok(())
    }

    /// Clears the in-memory value and the persisted entry.
    pub fn reset_home(&self) -> Result<()> {
        self.kv.remove(HOME_KEY)?;
        self.tx.send_replace(None);
        info!("home location reset");
        Ok(())
    }

    pub fn watch(&self) -> watch::Receiver<Option<GeoPoint>> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryKeyValueStore;

    #[test]
    fn test_set_then_reload() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let calibrator = HomeCalibrator::new(kv.clone());
        assert_eq!(calibrator.home(), None);

        calibrator.set_home(GeoPoint::new(20.652494, -100.391404)).unwrap();

        let reloaded = HomeCalibrator::new(kv);
        assert_eq!(
            reloaded.home(),
            Some(GeoPoint::new(20.652494, -100.391404))
        );
    }

    #[test]
    fn test_decode_failure_leaves_home_unset() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        kv.set(HOME_KEY, "not json").unwrap();

        let calibrator = HomeCalibrator::new(kv);
        assert_eq!(calibrator.home(), None);
    }

    #[test]
    fn test_reset_clears_memory_and_persisted_entry() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let calibrator = HomeCalibrator::new(kv.clone());
        calibrator.set_home(GeoPoint::new(1.0, 2.0)).unwrap();

        calibrator.reset_home().unwrap();
        assert_eq!(calibrator.home(), None);
        assert_eq!(kv.get(HOME_KEY).unwrap(), None);

        // A fresh calibrator over the same store must not resurrect it.
        let reloaded = HomeCalibrator::new(kv);
        assert_eq!(reloaded.home(), None);
    }

    #[test]
    fn test_watch_sees_changes() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let calibrator = HomeCalibrator::new(kv);
        let rx = calibrator.watch();

        calibrator.set_home(GeoPoint::new(1.0, 2.0)).unwrap();
        assert_eq!(*rx.borrow(), Some(GeoPoint::new(1.0, 2.0)));
    }
}
