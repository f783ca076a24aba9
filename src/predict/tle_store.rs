//! Tiered acquisition of Two-Line Element sets for the satellite catalog:
//! fresh disk cache, network fetch, stale disk cache, and finally element
//! data baked into the binary. Cache writes are atomic (temp file + rename)
//! so readers never see a half-written file.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sgp4::{Constants, Elements};
use utoipa::ToSchema;

use crate::capture::SATELLITES;
use crate::predict::error::PredictError;

pub const TLE_CACHE_FILE: &str = "weather_tle.txt";

/// Minimal element set compiled into the binary as the last-resort tier.
const EMBEDDED_TLE: &str = include_str!("noaa_tle.txt");

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Parsed orbital elements for one satellite, ready for propagation.
pub struct ElementSet {
    pub elements: Elements,
    pub constants: Constants,
}

/// Metadata about the on-disk element cache, for the tle-info endpoint and
/// health checks. Pure read; never touches the network.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CacheInfo {
    #[schema(value_type = String)]
    pub path: PathBuf,
    pub exists: bool,
    pub size_bytes: u64,
    pub modified: Option<DateTime<Utc>>,
    pub age_seconds: Option<i64>,
    pub fresh: bool,
    pub source_url: String,
    pub max_age_hours: u32,
}

pub struct TleStore {
    url: String,
    cache_path: PathBuf,
    max_age: Duration,
    max_age_hours: u32,
}

impl TleStore {
    pub fn new(url: &str, data_root: &Path, refresh_hours: u32) -> Self {
        TleStore {
            url: url.to_string(),
            cache_path: data_root.join(TLE_CACHE_FILE),
            max_age: Duration::from_secs(u64::from(refresh_hours) * 3600),
            max_age_hours: refresh_hours,
        }
    }

    /// Resolve elements for the cataloged satellites, keyed by NORAD ID,
    /// walking the four-tier fallback chain.
    pub async fn fetch(&self) -> Result<HashMap<u32, ElementSet>, PredictError> {
        let raw = self.load_or_fetch(false).await?;
        parse_catalog(&raw)
    }

    /// Skip the fresh-cache tier and go straight to the network; on success
    /// the cache file is updated. Later tiers still apply if the fetch fails.
    pub async fn force_refresh(&self) -> Result<HashMap<u32, ElementSet>, PredictError> {
        let raw = self.load_or_fetch(true).await?;
        parse_catalog(&raw)
    }

    async fn load_or_fetch(&self, skip_fresh: bool) -> Result<String, PredictError> {
        // Tier 1: fresh disk cache
        if !skip_fresh {
            if let Some(raw) = self.read_cache_if(|age| age < self.max_age) {
                return Ok(raw);
            }
        }

        // Tier 2: network fetch
        let fetch_err = match self.fetch_from_network().await {
            Ok(body) => {
                // Cache write failure is non-fatal; the data is in memory.
                if let Err(e) = self.write_cache(&body) {
                    log::warn!("tle: cache write failed: {e}");
                }
                return Ok(body);
            }
            Err(e) => e,
        };

        // Tier 3: stale disk cache, any age
        if let Some(raw) = self.read_cache_if(|_| true) {
            return Ok(raw);
        }

        // Tier 4: embedded fallback baked into the binary
        if !EMBEDDED_TLE.trim().is_empty() {
            return Ok(EMBEDDED_TLE.to_string());
        }

        Err(PredictError::ElementSourceExhausted(fetch_err.to_string()))
    }

    /// Read the cache file if it exists, is non-empty, and its age satisfies
    /// the predicate.
    fn read_cache_if(&self, age_ok: impl Fn(Duration) -> bool) -> Option<String> {
        let meta = std::fs::metadata(&self.cache_path).ok()?;
        let age = meta
            .modified()
            .ok()
            .and_then(|m| SystemTime::now().duration_since(m).ok())
            .unwrap_or(Duration::MAX);
        if !age_ok(age) {
            return None;
        }
        let raw = std::fs::read_to_string(&self.cache_path).ok()?;
        (!raw.is_empty()).then_some(raw)
    }

    async fn fetch_from_network(&self) -> Result<String, PredictError> {
        let client = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
        let resp = client.get(&self.url).send().await?;
        if !resp.status().is_success() {
            return Err(PredictError::FetchStatus(resp.status().as_u16()));
        }
        let body = resp.text().await?;
        if body.trim().is_empty() {
            return Err(PredictError::FetchEmpty);
        }
        Ok(body)
    }

    /// Atomically replace the cache file via a sibling temp file and rename.
    fn write_cache(&self, data: &str) -> std::io::Result<()> {
        let dir = self
            .cache_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(data.as_bytes())?;
        tmp.persist(&self.cache_path)?;
        Ok(())
    }

    pub fn cache_info(&self) -> CacheInfo {
        let meta = std::fs::metadata(&self.cache_path).ok();
        let modified = meta
            .as_ref()
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from);
        let age_seconds = modified.map(|m| (Utc::now() - m).num_seconds());
        CacheInfo {
            path: self.cache_path.clone(),
            exists: meta.is_some(),
            size_bytes: meta.map(|m| m.len()).unwrap_or(0),
            modified,
            age_seconds,
            fresh: age_seconds
                .map(|a| a >= 0 && (a as u64) < self.max_age.as_secs())
                .unwrap_or(false),
            source_url: self.url.clone(),
            max_age_hours: self.max_age_hours,
        }
    }
}

/// Extract elements for the cataloged satellites from a bulk TLE dump.
/// Input is groups of three whitespace-stripped lines (name, line 1, line 2);
/// unparseable triplets are skipped.
fn parse_catalog(raw: &str) -> Result<HashMap<u32, ElementSet>, PredictError> {
    let lines: Vec<&str> = raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let mut result = HashMap::new();
    for group in lines.chunks(3) {
        let [name, line1, line2] = group else {
            continue;
        };
        if !line1.starts_with("1 ") || !line2.starts_with("2 ") {
            continue;
        }
        let Ok(elements) =
            Elements::from_tle(Some(name.to_string()), line1.as_bytes(), line2.as_bytes())
        else {
            continue;
        };
        let Ok(constants) = Constants::from_elements(&elements) else {
            continue;
        };

        let norad_id = elements.norad_id as u32;
        if SATELLITES.iter().any(|s| s.norad_id == norad_id) {
            result.insert(
                norad_id,
                ElementSet {
                    elements,
                    constants,
                },
            );
        }
    }

    if result.is_empty() {
        return Err(PredictError::NoMatchingElements);
    }
    Ok(result)
}
