use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::capture::Satellite;

/// Ground station position: degrees North, degrees East, meters above sea
/// level.
#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
}

/// A predicted overhead pass, from acquisition of signal (AOS) through loss
/// of signal (LOS). All times are UTC.
#[derive(Debug, Clone)]
pub struct Pass {
    pub satellite: Satellite,
    pub aos: DateTime<Utc>,
    pub los: DateTime<Utc>,
    pub max_elev: f64,
    pub max_elev_time: DateTime<Utc>,
    pub aos_azimuth: f64,
    pub los_azimuth: f64,
    pub duration_s: i64,
}
