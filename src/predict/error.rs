use thiserror::Error;

#[derive(Debug, Error)]
pub enum PredictError {
    #[error("TLE fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("TLE fetch returned HTTP {0}")]
    FetchStatus(u16),
    #[error("TLE fetch returned empty body")]
    FetchEmpty,
    #[error("all TLE sources exhausted: {0}")]
    ElementSourceExhausted(String),
    #[error("no TLEs found for any cataloged satellite")]
    NoMatchingElements,
    #[error("propagation error: {0}")]
    Propagation(String),
}

impl From<sgp4::Error> for PredictError {
    fn from(err: sgp4::Error) -> Self {
        PredictError::Propagation(err.to_string())
    }
}
