//! Loading, defaulting, and validation of the ephemerisd TOML configuration.
//! Every section maps to a typed struct so the rest of the codebase gets
//! strong typing without manual key lookups.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Active configuration shared across workers. Readers clone what they need
/// and never hold the lock across I/O; `POST /api/reload` swaps the value.
pub type SharedConfig = Arc<tokio::sync::RwLock<Config>>;

/// Top-level configuration, mirroring the TOML sections.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct Config {
    pub data: DataConfig,
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub demo: DemoConfig,
    pub station: StationConfig,
    pub sdr: SdrConfig,
    pub predict: PredictConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct DataConfig {
    #[schema(value_type = String)]
    pub root: PathBuf,
    #[schema(value_type = String)]
    pub archive: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct DemoConfig {
    pub enabled: bool,
    pub interval_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct StationConfig {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub min_elevation: f64,
    pub use_gpsd: bool,
    pub gpsd_host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct SdrConfig {
    pub device_index: u32,
    pub gain: f64,
    pub ppm_correction: i32,
    pub sample_rate: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct PredictConfig {
    pub tle_url: String,
    pub tle_refresh_hours: u32,
    pub lookahead_hours: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data: DataConfig::default(),
            logging: LoggingConfig::default(),
            server: ServerConfig::default(),
            demo: DemoConfig::default(),
            station: StationConfig::default(),
            sdr: SdrConfig::default(),
            predict: PredictConfig::default(),
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        let root = default_data_dir();
        DataConfig {
            archive: root.join("archive"),
            root,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        DemoConfig {
            enabled: true,
            interval_seconds: 15,
        }
    }
}

impl Default for StationConfig {
    fn default() -> Self {
        StationConfig {
            latitude: 0.0,
            longitude: 0.0,
            altitude: 0.0,
            min_elevation: 10.0,
            use_gpsd: false,
            gpsd_host: "localhost:2947".to_string(),
        }
    }
}

impl Default for SdrConfig {
    fn default() -> Self {
        SdrConfig {
            device_index: 0,
            gain: 40.0,
            ppm_correction: 0,
            sample_rate: 48_000,
        }
    }
}

impl Default for PredictConfig {
    fn default() -> Self {
        PredictConfig {
            tle_url: "https://celestrak.org/NORAD/elements/gp.php?GROUP=noaa&FORMAT=tle"
                .to_string(),
            tle_refresh_hours: 24,
            lookahead_hours: 24,
        }
    }
}

/// XDG-compliant config directory, honoring $XDG_CONFIG_HOME.
pub fn default_config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.is_empty() {
            return PathBuf::from(xdg).join("ephemeris");
        }
    }
    home_dir().join(".config").join("ephemeris")
}

/// XDG-compliant data directory, honoring $XDG_DATA_HOME.
pub fn default_data_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        if !xdg.is_empty() {
            return PathBuf::from(xdg).join("ephemeris");
        }
    }
    home_dir().join(".local").join("share").join("ephemeris")
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Search for a config file in standard locations:
///  1. $EPHEMERIS_CONFIG environment variable
///  2. $XDG_CONFIG_HOME/ephemeris/config.toml (or ~/.config/ephemeris)
///  3. /etc/ephemeris/ephemeris.toml
///  4. configs/example.toml (bundled fallback)
///
/// Returns None if nothing exists; the caller should use Config::default().
pub fn find_config_file() -> Option<PathBuf> {
    if let Ok(env) = std::env::var("EPHEMERIS_CONFIG") {
        let p = PathBuf::from(env);
        if p.is_file() {
            return Some(p);
        }
    }

    let xdg_path = default_config_dir().join("config.toml");
    if xdg_path.is_file() {
        return Some(xdg_path);
    }

    let legacy = PathBuf::from("/etc/ephemeris/ephemeris.toml");
    if legacy.is_file() {
        return Some(legacy);
    }

    let bundled = PathBuf::from("configs/example.toml");
    if bundled.is_file() {
        return Some(bundled);
    }

    None
}

/// A config profile discovered in the config directory.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProfileInfo {
    pub name: String,
    #[schema(value_type = String)]
    pub path: PathBuf,
    pub mod_time: Option<DateTime<Utc>>,
}

/// Scan a directory for .toml files and return them as profiles.
pub fn list_profiles(config_dir: &Path) -> Result<Vec<ProfileInfo>, ConfigError> {
    let entries = match std::fs::read_dir(config_dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut profiles = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_suffix(".toml"))
        else {
            continue;
        };
        let mod_time = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Utc>::from);
        profiles.push(ProfileInfo {
            name: name.to_string(),
            path,
            mod_time,
        });
    }
    Ok(profiles)
}

impl Config {
    /// Read the TOML file at `path`, layer it on top of the defaults, and
    /// validate the result.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let mut cfg: Config = toml::from_str(&raw)?;

        // Expand ~ so users can write "~/.local/share/..." in TOML.
        cfg.data.root = expand_home(&cfg.data.root);
        cfg.data.archive = expand_home(&cfg.data.archive);

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data.root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("data.root must not be empty"));
        }
        if self.data.archive.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("data.archive must not be empty"));
        }
        if self.demo.interval_seconds < 0 {
            return Err(ConfigError::Invalid("demo.interval_seconds must be >= 0"));
        }
        if self.sdr.sample_rate == 0 {
            return Err(ConfigError::Invalid("sdr.sample_rate must be > 0"));
        }
        if !(0.0..=90.0).contains(&self.station.min_elevation) {
            return Err(ConfigError::Invalid(
                "station.min_elevation must be between 0 and 90",
            ));
        }
        if self.predict.tle_refresh_hours < 1 {
            return Err(ConfigError::Invalid("predict.tle_refresh_hours must be >= 1"));
        }
        if self.predict.lookahead_hours < 1 {
            return Err(ConfigError::Invalid("predict.lookahead_hours must be >= 1"));
        }
        Ok(())
    }

    /// Create the data root and archive directories. Idempotent.
    pub fn ensure_dirs(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data.root)?;
        std::fs::create_dir_all(&self.data.archive)?;
        Ok(())
    }
}

/// Replace a leading ~ with the user's home directory.
fn expand_home(path: &Path) -> PathBuf {
    let Some(s) = path.to_str() else {
        return path.to_path_buf();
    };
    if let Some(rest) = s.strip_prefix("~") {
        let rest = rest.strip_prefix('/').unwrap_or(rest);
        return home_dir().join(rest);
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn load_layers_over_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[station]
latitude = 34.58
longitude = -118.11
min_elevation = 20.0

[demo]
enabled = false
"#,
        )
        .unwrap();

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.station.latitude, 34.58);
        assert_eq!(cfg.station.min_elevation, 20.0);
        assert!(!cfg.demo.enabled);
        // Untouched sections keep their defaults.
        assert_eq!(cfg.sdr.sample_rate, 48_000);
        assert_eq!(cfg.predict.lookahead_hours, 24);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut cfg = Config::default();
        cfg.station.min_elevation = 91.0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.sdr.sample_rate = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.predict.tle_refresh_hours = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.demo.interval_seconds = -1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn tilde_expansion() {
        let expanded = expand_home(Path::new("~/captures"));
        assert!(!expanded.to_str().unwrap().starts_with('~'));
        assert!(expanded.ends_with("captures"));
    }

    #[test]
    fn profile_listing_skips_non_toml() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("palmdale.toml"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();

        let profiles = list_profiles(dir.path()).unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].name, "palmdale");
    }

    #[test]
    fn profile_listing_missing_dir_is_empty() {
        let profiles = list_profiles(Path::new("/definitely/not/here")).unwrap();
        assert!(profiles.is_empty());
    }
}
