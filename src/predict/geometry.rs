//! Observer geometry: WGS-84 station position and topocentric look angles
//! for a propagated satellite state.

use chrono::{DateTime, Utc};
use sgp4::{Constants, Elements};

use crate::predict::error::PredictError;
use crate::predict::types::Location;

#[derive(Debug, Clone, Copy)]
pub struct Observer {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub altitude_m: f64,
}

impl From<Location> for Observer {
    fn from(loc: Location) -> Self {
        Observer {
            latitude_deg: loc.lat,
            longitude_deg: loc.lon,
            altitude_m: loc.alt,
        }
    }
}

impl Observer {
    pub fn lat_rad(&self) -> f64 {
        self.latitude_deg.to_radians()
    }

    pub fn lon_rad(&self) -> f64 {
        self.longitude_deg.to_radians()
    }

    pub fn position_ecef_km(&self) -> [f64; 3] {
        // WGS-84 constants
        let a = 6378.137;
        let e2 = 0.00669437999014;
        let lat = self.lat_rad();
        let lon = self.lon_rad();
        let sin_lat = lat.sin();
        let cos_lat = lat.cos();
        let n = a / (1.0 - e2 * sin_lat * sin_lat).sqrt();
        let alt_km = self.altitude_m / 1000.0;
        let x = (n + alt_km) * cos_lat * lon.cos();
        let y = (n + alt_km) * cos_lat * lon.sin();
        let z = (n * (1.0 - e2) + alt_km) * sin_lat;
        [x, y, z]
    }
}

/// Azimuth and elevation of the satellite as seen from the observer.
#[derive(Debug, Clone, Copy)]
pub struct LookAngles {
    pub azimuth_deg: f64,
    pub elevation_deg: f64,
}

/// Propagate the satellite to `timestamp` and compute its look angles.
pub fn look_angles(
    observer: &Observer,
    elements: &Elements,
    constants: &Constants,
    timestamp: DateTime<Utc>,
) -> Result<LookAngles, PredictError> {
    let minutes = elements
        .datetime_to_minutes_since_epoch(&timestamp.naive_utc())
        .map_err(|e| PredictError::Propagation(e.to_string()))?;

    let prediction = constants
        .propagate(minutes)
        .map_err(|e| PredictError::Propagation(e.to_string()))?;

    let sidereal =
        sgp4::iau_epoch_to_sidereal_time(sgp4::julian_years_since_j2000(&timestamp.naive_utc()));

    let sat_ecef = teme_to_ecef_position(prediction.position, sidereal);
    let sta_ecef = observer.position_ecef_km();

    let dr = [
        sat_ecef[0] - sta_ecef[0],
        sat_ecef[1] - sta_ecef[1],
        sat_ecef[2] - sta_ecef[2],
    ];
    let range_km = (dr[0] * dr[0] + dr[1] * dr[1] + dr[2] * dr[2]).sqrt();

    let (east, north, up) = ecef_to_enu(dr, observer.lat_rad(), observer.lon_rad());
    let azimuth = east.atan2(north).to_degrees().rem_euclid(360.0);
    let elevation = if range_km > 0.0 {
        (up / range_km).asin().to_degrees()
    } else {
        0.0
    };

    Ok(LookAngles {
        azimuth_deg: azimuth,
        elevation_deg: elevation,
    })
}

pub fn teme_to_ecef_position(pos_teme: [f64; 3], gmst: f64) -> [f64; 3] {
    let cos_gmst = gmst.cos();
    let sin_gmst = gmst.sin();
    [
        pos_teme[0] * cos_gmst + pos_teme[1] * sin_gmst,
        -pos_teme[0] * sin_gmst + pos_teme[1] * cos_gmst,
        pos_teme[2],
    ]
}

pub fn ecef_to_enu(dr: [f64; 3], lat_rad: f64, lon_rad: f64) -> (f64, f64, f64) {
    let sin_lat = lat_rad.sin();
    let cos_lat = lat_rad.cos();
    let sin_lon = lon_rad.sin();
    let cos_lon = lon_rad.cos();

    let east = -sin_lon * dr[0] + cos_lon * dr[1];
    let north = -sin_lat * cos_lon * dr[0] - sin_lat * sin_lon * dr[1] + cos_lat * dr[2];
    let up = cos_lat * cos_lon * dr[0] + cos_lat * sin_lon * dr[1] + sin_lat * dr[2];
    (east, north, up)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equatorial_station_ecef() {
        let obs = Observer {
            latitude_deg: 0.0,
            longitude_deg: 0.0,
            altitude_m: 0.0,
        };
        let pos = obs.position_ecef_km();
        assert!((pos[0] - 6378.137).abs() < 1e-6);
        assert!(pos[1].abs() < 1e-9);
        assert!(pos[2].abs() < 1e-9);
    }

    #[test]
    fn overhead_target_is_straight_up() {
        // Station at the equator/prime meridian; a target 800 km directly
        // above it sits purely in the ENU "up" axis.
        let (east, north, up) = ecef_to_enu([800.0, 0.0, 0.0], 0.0, 0.0);
        assert!(east.abs() < 1e-9);
        assert!(north.abs() < 1e-9);
        assert!((up - 800.0).abs() < 1e-9);
    }

    #[test]
    fn northern_target_azimuth() {
        let (east, north, _up) = ecef_to_enu([0.0, 0.0, 500.0], 0.0, 0.0);
        let az = east.atan2(north).to_degrees().rem_euclid(360.0);
        assert!(az.abs() < 1e-9);
    }
}
