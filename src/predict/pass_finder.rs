//! Horizon-crossing scan over a propagation window. The scan runs at a fixed
//! 1-second step; pass duration precision depends on it, so the step must
//! never be coarsened.

use chrono::{DateTime, Duration, Utc};
use sgp4::{Constants, Elements};

use crate::predict::error::PredictError;
use crate::predict::geometry::{look_angles, Observer};

const STEP_SECONDS: i64 = 1;
const HORIZON_ELEVATION: f64 = 0.0;

/// One visibility window above the horizon, before catalog attribution and
/// minimum-elevation filtering.
#[derive(Debug, Clone)]
pub struct PassWindow {
    pub aos: DateTime<Utc>,
    pub los: DateTime<Utc>,
    pub max_elevation: f64,
    pub max_elevation_time: DateTime<Utc>,
    pub aos_azimuth: f64,
    pub los_azimuth: f64,
}

/// Find all visibility windows for a satellite between `start` and `end`.
/// A window still in progress at `end` is closed there.
pub fn find_passes(
    observer: &Observer,
    elements: &Elements,
    constants: &Constants,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<PassWindow>, PredictError> {
    let step = Duration::seconds(STEP_SECONDS);
    let mut passes = Vec::new();
    let mut cursor = start;
    let mut prev_visible = false;

    let mut aos = start;
    let mut aos_azimuth = 0.0;
    let mut max_elevation = 0.0;
    let mut max_elevation_time = start;
    let mut in_pass = false;

    while cursor <= end {
        let la = look_angles(observer, elements, constants, cursor)?;
        let visible = la.elevation_deg >= HORIZON_ELEVATION;

        if visible && !prev_visible {
            aos = cursor;
            aos_azimuth = la.azimuth_deg;
            max_elevation = la.elevation_deg;
            max_elevation_time = cursor;
            in_pass = true;
        } else if visible && in_pass {
            if la.elevation_deg > max_elevation {
                max_elevation = la.elevation_deg;
                max_elevation_time = cursor;
            }
        } else if !visible && prev_visible && in_pass {
            passes.push(PassWindow {
                aos,
                los: cursor,
                max_elevation: round2(max_elevation),
                max_elevation_time,
                aos_azimuth: round2(aos_azimuth),
                los_azimuth: round2(la.azimuth_deg),
            });
            in_pass = false;
        }

        prev_visible = visible;
        cursor += step;
    }

    // Window still open at the end of the search range.
    if in_pass && end > aos {
        let la = look_angles(observer, elements, constants, end)?;
        passes.push(PassWindow {
            aos,
            los: end,
            max_elevation: round2(max_elevation),
            max_elevation_time,
            aos_azimuth: round2(aos_azimuth),
            los_azimuth: round2(la.azimuth_deg),
        });
    }

    Ok(passes)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn iss_elements() -> (Elements, Constants) {
        let elements = Elements::from_tle(
            Some("ISS (ZARYA)".to_string()),
            b"1 25544U 98067A   26012.17690827  .00009276  00000-0  17471-3 0  9998",
            b"2 25544  51.6333 351.7881 0007723   8.9804 351.1321 15.49250518547578",
        )
        .unwrap();
        let constants = Constants::from_elements(&elements).unwrap();
        (elements, constants)
    }

    #[test]
    fn finds_passes_with_valid_windows() {
        let (elements, constants) = iss_elements();
        let observer = Observer {
            latitude_deg: 51.6,
            longitude_deg: 0.0,
            altitude_m: 50.0,
        };
        let start = Utc.with_ymd_and_hms(2026, 1, 12, 6, 0, 0).unwrap();
        let end = start + Duration::hours(12);

        let passes = find_passes(&observer, &elements, &constants, start, end).unwrap();
        assert!(!passes.is_empty(), "expected at least one ISS pass in 12h");

        for p in &passes {
            assert!(p.aos < p.los);
            assert!(p.aos >= start && p.los <= end);
            assert!(p.max_elevation_time >= p.aos && p.max_elevation_time <= p.los);
            assert!(p.max_elevation >= 0.0 && p.max_elevation <= 90.0);
            assert!((0.0..360.0).contains(&p.aos_azimuth));
            assert!((0.0..360.0).contains(&p.los_azimuth));
        }

        // Windows come out in chronological order by construction.
        for w in passes.windows(2) {
            assert!(w[0].los <= w[1].aos);
        }
    }

    #[test]
    fn empty_window_yields_no_passes() {
        let (elements, constants) = iss_elements();
        let observer = Observer {
            latitude_deg: 51.6,
            longitude_deg: 0.0,
            altitude_m: 50.0,
        };
        let start = Utc.with_ymd_and_hms(2026, 1, 12, 6, 0, 0).unwrap();

        let passes = find_passes(&observer, &elements, &constants, start, start).unwrap();
        assert!(passes.is_empty());
    }
}
