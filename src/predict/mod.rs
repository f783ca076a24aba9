mod error;
mod geometry;
mod gpsd;
mod pass_finder;
mod predictor;
mod tle_store;
mod types;

pub use error::PredictError;
pub use predictor::Predictor;
pub use tle_store::{CacheInfo, TleStore, TLE_CACHE_FILE};
pub use types::{Location, Pass};
