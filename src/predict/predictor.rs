//! Pass prediction: resolve the station location, fetch current elements,
//! and run SGP4 propagation over the lookahead window for every cataloged
//! satellite.

use std::time::Duration;

use chrono::Utc;

use crate::capture::SATELLITES;
use crate::config::SharedConfig;
use crate::events::{EventHub, LogLevel};
use crate::predict::error::PredictError;
use crate::predict::geometry::Observer;
use crate::predict::gpsd::location_from_gpsd;
use crate::predict::pass_finder::find_passes;
use crate::predict::tle_store::TleStore;
use crate::predict::types::{Location, Pass};

const COMPONENT: &str = "predict";

const GPSD_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Predictor {
    hub: EventHub,
    cfg: SharedConfig,
}

impl Predictor {
    pub fn new(hub: EventHub, cfg: SharedConfig) -> Self {
        Predictor { hub, cfg }
    }

    fn store(&self, cfg: &crate::config::Config) -> TleStore {
        TleStore::new(
            &cfg.predict.tle_url,
            &cfg.data.root,
            cfg.predict.tle_refresh_hours,
        )
    }

    /// Determine the ground station position. With use_gpsd set, a live fix
    /// is attempted first; any gpsd failure is logged and falls back to the
    /// static coordinates. Never errors.
    pub async fn resolve_location(&self) -> Location {
        let station = self.cfg.read().await.station.clone();

        if station.use_gpsd {
            match location_from_gpsd(&station.gpsd_host, GPSD_TIMEOUT).await {
                Ok(loc) => {
                    self.hub.log(
                        COMPONENT,
                        LogLevel::Info,
                        format!(
                            "location from gpsd: {:.4}, {:.4}, {:.0}m",
                            loc.lat, loc.lon, loc.alt
                        ),
                    );
                    return loc;
                }
                Err(e) => {
                    log::warn!("predict: gpsd failed ({e}), falling back to config");
                }
            }
        }

        Location {
            lat: station.latitude,
            lon: station.longitude,
            alt: station.altitude,
        }
    }

    /// Compute all upcoming passes within the lookahead window. Passes whose
    /// peak elevation is below the configured minimum are filtered out, and
    /// the result is sorted ascending by AOS. Satellites without elements are
    /// logged and skipped.
    pub async fn compute_passes(&self) -> Result<Vec<Pass>, PredictError> {
        let cfg = self.cfg.read().await.clone();
        let loc = self.resolve_location().await;

        self.hub.log(
            COMPONENT,
            LogLevel::Info,
            format!("station: {:.4}, {:.4}, {:.0}m", loc.lat, loc.lon, loc.alt),
        );

        let element_sets = self.store(&cfg).fetch().await?;

        let now = Utc::now();
        let end = now + chrono::Duration::hours(i64::from(cfg.predict.lookahead_hours));
        let observer = Observer::from(loc);

        let mut all_passes = Vec::new();
        for sat in SATELLITES {
            let Some(set) = element_sets.get(&sat.norad_id) else {
                log::warn!("predict: no TLE for {} (NORAD {})", sat.name, sat.norad_id);
                continue;
            };

            let windows = match find_passes(&observer, &set.elements, &set.constants, now, end) {
                Ok(w) => w,
                Err(e) => {
                    log::warn!("predict: error computing passes for {}: {e}", sat.name);
                    continue;
                }
            };

            for w in windows {
                if w.max_elevation < cfg.station.min_elevation {
                    continue;
                }
                all_passes.push(Pass {
                    satellite: sat,
                    aos: w.aos,
                    los: w.los,
                    max_elev: w.max_elevation,
                    max_elev_time: w.max_elevation_time,
                    aos_azimuth: w.aos_azimuth,
                    los_azimuth: w.los_azimuth,
                    duration_s: (w.los - w.aos).num_seconds(),
                });
            }
        }

        all_passes.sort_by_key(|p| p.aos);

        self.hub.log(
            COMPONENT,
            LogLevel::Info,
            format!(
                "found {} passes in next {}h",
                all_passes.len(),
                cfg.predict.lookahead_hours
            ),
        );

        Ok(all_passes)
    }

    /// Refresh elements from the network regardless of cache age; returns the
    /// number of satellites updated.
    pub async fn force_refresh(&self) -> Result<usize, PredictError> {
        let cfg = self.cfg.read().await.clone();
        let sets = self.store(&cfg).force_refresh().await?;
        Ok(sets.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::sync::RwLock;

    fn predictor_with(dir: &TempDir, station_lat: f64, min_elevation: f64) -> Predictor {
        let mut cfg = Config::default();
        cfg.data.root = dir.path().to_path_buf();
        cfg.predict.tle_url = "http://127.0.0.1:1/tle".to_string();
        cfg.predict.lookahead_hours = 6;
        cfg.station.latitude = station_lat;
        cfg.station.longitude = 0.0;
        cfg.station.min_elevation = min_elevation;
        Predictor::new(EventHub::new(), Arc::new(RwLock::new(cfg)))
    }

    #[tokio::test]
    async fn gpsd_failure_falls_back_to_static_coordinates() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::default();
        cfg.data.root = dir.path().to_path_buf();
        cfg.station.latitude = 12.5;
        cfg.station.longitude = -45.25;
        cfg.station.altitude = 300.0;
        cfg.station.use_gpsd = true;
        cfg.station.gpsd_host = "127.0.0.1:1".to_string();

        let predictor = Predictor::new(EventHub::new(), Arc::new(RwLock::new(cfg)));
        let loc = predictor.resolve_location().await;
        assert_eq!(loc.lat, 12.5);
        assert_eq!(loc.lon, -45.25);
        assert_eq!(loc.alt, 300.0);
    }

    #[tokio::test]
    async fn passes_are_sorted_and_satisfy_invariants() {
        // A high-latitude station sees every orbit of a sun-synchronous
        // satellite, so a 6 h window reliably produces passes from the
        // embedded element tier.
        let dir = TempDir::new().unwrap();
        let predictor = predictor_with(&dir, 80.0, 0.0);

        let passes = predictor.compute_passes().await.unwrap();
        assert!(!passes.is_empty());

        for p in &passes {
            assert!(p.aos < p.los);
            assert!(p.max_elev >= 0.0);
            assert_eq!(p.duration_s, (p.los - p.aos).num_seconds());
        }
        for w in passes.windows(2) {
            assert!(w[0].aos <= w[1].aos, "passes must be sorted by AOS");
        }
    }

    #[tokio::test]
    async fn min_elevation_ninety_accepts_nothing() {
        let dir = TempDir::new().unwrap();
        let predictor = predictor_with(&dir, 80.0, 90.0);

        let passes = predictor.compute_passes().await.unwrap();
        assert!(passes.is_empty());
    }
}
