use std::collections::BTreeMap;
use std::path::Path;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use crate::capture::{self, Satellite, SATELLITES};
use crate::config::{self, Config};
use crate::events::{LogLevel, DAEMON_COMPONENT};
use crate::predict::{CacheInfo, Location, Pass, Predictor, TleStore};
use crate::scheduler::{send_command, CommandRequest, CommandResult};
use crate::status::{LogRecord, StatsSnapshot};
use crate::web::error::{ApiError, ApiResult, ErrorResponse};
use crate::web::AppState;

const RADIO_BINARY: &str = "rtl_fm";

// ---------------------------------------------------------------------------
// Response shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct DiskUsage {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub available_bytes: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    #[schema(value_type = String)]
    pub name: &'static str,
    pub state: crate::status::DaemonState,
    pub uptime_seconds: i64,
    #[schema(value_type = String)]
    pub mode: &'static str,
    pub paused: bool,
    pub data_root: String,
    pub archive_dir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_pass: Option<crate::status::PassInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk: Option<DiskUsage>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VersionResponse {
    #[schema(value_type = String)]
    pub name: &'static str,
    #[schema(value_type = String)]
    pub version: &'static str,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SatellitesResponse {
    pub satellites: Vec<Satellite>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PassJson {
    pub satellite: String,
    pub norad_id: u32,
    pub freq_hz: u64,
    pub aos: DateTime<Utc>,
    pub los: DateTime<Utc>,
    pub max_elev: f64,
    pub max_elev_time: DateTime<Utc>,
    pub aos_azimuth: f64,
    pub los_azimuth: f64,
    pub duration_s: i64,
}

impl From<&Pass> for PassJson {
    fn from(p: &Pass) -> Self {
        PassJson {
            satellite: p.satellite.name.to_string(),
            norad_id: p.satellite.norad_id,
            freq_hz: p.satellite.freq_hz,
            aos: p.aos,
            los: p.los,
            max_elev: p.max_elev,
            max_elev_time: p.max_elev_time,
            aos_azimuth: p.aos_azimuth,
            los_azimuth: p.los_azimuth,
            duration_s: p.duration_s,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PassesResponse {
    pub passes: Vec<PassJson>,
    pub station: Location,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct NextPassResponse {
    pub pass: Option<PassJson>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub countdown_s: Option<i64>,
    pub station: Location,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CaptureFileInfo {
    pub filename: String,
    pub satellite: String,
    pub timestamp: String,
    pub size: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CapturesResponse {
    pub captures: Vec<CaptureFileInfo>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeleteResponse {
    pub ok: bool,
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProfilesResponse {
    pub config_dir: String,
    pub profiles: Vec<config::ProfileInfo>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SystemResponse {
    #[schema(value_type = String)]
    pub version: &'static str,
    #[schema(value_type = String)]
    pub os: &'static str,
    #[schema(value_type = String)]
    pub arch: &'static str,
    pub data_root: String,
    pub config_dir: String,
    pub sdr_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk: Option<DiskUsage>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LogsResponse {
    pub logs: Vec<LogRecord>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReloadResponse {
    pub ok: bool,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Request shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct TriggerRequest {
    #[serde(default)]
    pub satellite: Option<String>,
    #[serde(default)]
    pub norad_id: Option<u32>,
    #[serde(default)]
    pub duration_seconds: Option<i64>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReloadRequest {
    #[serde(default)]
    pub profile: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PassesQuery {
    #[serde(default)]
    pub satellite: Option<String>,
    #[serde(default)]
    pub count: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct NextPassQuery {
    #[serde(default)]
    pub satellite: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteCaptureQuery {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// Core handlers
// ---------------------------------------------------------------------------

#[utoipa::path(get, path = "/healthz", responses(
    (status = 200, description = "Daemon is healthy"),
    (status = 503, description = "One or more health checks failed")
))]
pub async fn healthz(State(state): State<AppState>, headers: HeaderMap) -> Response {
    // Plain-text liveness unless the client asks for per-check JSON.
    let wants_json = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("application/json"));
    if !wants_json {
        return (StatusCode::OK, "ok\n").into_response();
    }

    let cfg = state.cfg.read().await.clone();
    let mut checks: BTreeMap<&'static str, serde_json::Value> = BTreeMap::new();
    let mut healthy = true;

    // Data directory must be writable.
    let probe = cfg.data.root.join(".healthcheck");
    match std::fs::write(&probe, b"ok") {
        Ok(()) => {
            let _ = std::fs::remove_file(&probe);
            checks.insert(
                "data_dir",
                json!({"ok": true, "path": cfg.data.root.display().to_string()}),
            );
        }
        Err(e) => {
            healthy = false;
            checks.insert("data_dir", json!({"ok": false, "error": e.to_string()}));
        }
    }

    // Element cache present and fresh.
    let info = TleStore::new(
        &cfg.predict.tle_url,
        &cfg.data.root,
        cfg.predict.tle_refresh_hours,
    )
    .cache_info();
    if info.exists {
        if !info.fresh {
            healthy = false;
        }
        checks.insert(
            "tle_cache",
            json!({"ok": info.fresh, "age_s": info.age_seconds, "fresh": info.fresh}),
        );
    } else {
        healthy = false;
        checks.insert(
            "tle_cache",
            json!({"ok": false, "error": "cache file not found"}),
        );
    }

    // Radio binary, only meaningful in live mode.
    if !state.demo_mode {
        let present = binary_on_path(RADIO_BINARY);
        if !present {
            healthy = false;
            checks.insert(
                "sdr",
                json!({"ok": false, "error": format!("{RADIO_BINARY} not found in PATH")}),
            );
        } else {
            checks.insert("sdr", json!({"ok": true}));
        }
    }

    // Config file still readable.
    if let Some(path) = state.config_path.read().unwrap().clone() {
        if path.is_file() {
            checks.insert(
                "config_file",
                json!({"ok": true, "path": path.display().to_string()}),
            );
        } else {
            healthy = false;
            checks.insert(
                "config_file",
                json!({"ok": false, "error": "config file not readable"}),
            );
        }
    }

    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(json!({"healthy": healthy, "checks": checks}))).into_response()
}

#[utoipa::path(get, path = "/api/status", responses(
    (status = 200, description = "Daemon status", body = StatusResponse)
))]
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let cfg = state.cfg.read().await.clone();
    Json(StatusResponse {
        name: "ephemeris-engine",
        state: state.status.state(),
        uptime_seconds: state.status.uptime_seconds(),
        mode: if state.demo_mode { "demo" } else { "live" },
        paused: state.paused.load(std::sync::atomic::Ordering::Acquire),
        data_root: cfg.data.root.display().to_string(),
        archive_dir: cfg.data.archive.display().to_string(),
        current_pass: state.status.current_pass(),
        disk: disk_usage(&cfg.data.root),
    })
}

#[utoipa::path(get, path = "/api/version", responses(
    (status = 200, description = "Build identity", body = VersionResponse)
))]
pub async fn version() -> Json<VersionResponse> {
    Json(VersionResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[utoipa::path(get, path = "/api/satellites", responses(
    (status = 200, description = "The satellite catalog", body = SatellitesResponse)
))]
pub async fn satellites() -> Json<SatellitesResponse> {
    Json(SatellitesResponse {
        satellites: SATELLITES.to_vec(),
    })
}

#[utoipa::path(get, path = "/api/config", responses(
    (status = 200, description = "Active configuration", body = Config)
))]
pub async fn get_config(State(state): State<AppState>) -> Json<Config> {
    Json(state.cfg.read().await.clone())
}

#[utoipa::path(get, path = "/api/config/profiles", responses(
    (status = 200, description = "Config profiles in the config directory", body = ProfilesResponse)
))]
pub async fn config_profiles() -> ApiResult<Json<ProfilesResponse>> {
    let dir = config::default_config_dir();
    let profiles = config::list_profiles(&dir).map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(ProfilesResponse {
        config_dir: dir.display().to_string(),
        profiles,
    }))
}

// ---------------------------------------------------------------------------
// Prediction
// ---------------------------------------------------------------------------

#[utoipa::path(get, path = "/api/passes", params(
    ("satellite" = Option<String>, Query, description = "Filter by satellite name"),
    ("count" = Option<usize>, Query, description = "Limit the number of passes")
), responses(
    (status = 200, description = "Upcoming passes", body = PassesResponse),
    (status = 500, description = "Prediction failed", body = ErrorResponse)
))]
pub async fn passes(
    State(state): State<AppState>,
    Query(query): Query<PassesQuery>,
) -> ApiResult<Json<PassesResponse>> {
    let predictor = Predictor::new(state.hub.clone(), state.cfg.clone());
    let mut passes = predictor
        .compute_passes()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    if let Some(name) = &query.satellite {
        passes.retain(|p| p.satellite.name.eq_ignore_ascii_case(name));
    }
    if let Some(count) = query.count {
        passes.truncate(count);
    }

    let station = predictor.resolve_location().await;
    Ok(Json(PassesResponse {
        passes: passes.iter().map(PassJson::from).collect(),
        station,
    }))
}

#[utoipa::path(get, path = "/api/next-pass", params(
    ("satellite" = Option<String>, Query, description = "Filter by satellite name")
), responses(
    (status = 200, description = "First future pass, if any", body = NextPassResponse),
    (status = 500, description = "Prediction failed", body = ErrorResponse)
))]
pub async fn next_pass(
    State(state): State<AppState>,
    Query(query): Query<NextPassQuery>,
) -> ApiResult<Json<NextPassResponse>> {
    let predictor = Predictor::new(state.hub.clone(), state.cfg.clone());
    let mut passes = predictor
        .compute_passes()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    if let Some(name) = &query.satellite {
        passes.retain(|p| p.satellite.name.eq_ignore_ascii_case(name));
    }

    let now = Utc::now();
    let next = passes.iter().find(|p| p.aos > now);
    let station = predictor.resolve_location().await;

    Ok(Json(NextPassResponse {
        countdown_s: next.map(|p| (p.aos - now).num_seconds()),
        pass: next.map(PassJson::from),
        station,
    }))
}

#[utoipa::path(get, path = "/api/tle-info", responses(
    (status = 200, description = "Element cache metadata", body = CacheInfo)
))]
pub async fn tle_info(State(state): State<AppState>) -> Json<CacheInfo> {
    let cfg = state.cfg.read().await.clone();
    let store = TleStore::new(
        &cfg.predict.tle_url,
        &cfg.data.root,
        cfg.predict.tle_refresh_hours,
    );
    Json(store.cache_info())
}

// ---------------------------------------------------------------------------
// Captures
// ---------------------------------------------------------------------------

#[utoipa::path(get, path = "/api/captures", responses(
    (status = 200, description = "Capture artifacts under the data root", body = CapturesResponse)
))]
pub async fn list_captures(State(state): State<AppState>) -> ApiResult<Json<CapturesResponse>> {
    let root = state.cfg.read().await.data.root.clone();

    let mut captures = Vec::new();
    let entries = std::fs::read_dir(&root).map_err(|e| ApiError::Internal(e.to_string()))?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("wav") {
            continue;
        }
        let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        let (satellite, timestamp) = parse_capture_name(filename);
        captures.push(CaptureFileInfo {
            filename: filename.to_string(),
            satellite: satellite.to_string(),
            timestamp: timestamp.to_string(),
            size: meta.len(),
        });
    }
    captures.sort_by(|a, b| a.filename.cmp(&b.filename));

    Ok(Json(CapturesResponse { captures }))
}

#[utoipa::path(delete, path = "/api/captures", params(
    ("name" = String, Query, description = "Capture filename to delete")
), responses(
    (status = 200, description = "Capture deleted", body = DeleteResponse),
    (status = 400, description = "Invalid filename", body = ErrorResponse),
    (status = 404, description = "No such capture", body = ErrorResponse)
))]
pub async fn delete_capture(
    State(state): State<AppState>,
    Query(query): Query<DeleteCaptureQuery>,
) -> ApiResult<Json<DeleteResponse>> {
    let name = query.name;
    // Prevent path traversal.
    if name.is_empty() || name.contains('/') || name.contains("..") {
        return Err(ApiError::BadRequest("invalid filename".into()));
    }

    let root = state.cfg.read().await.data.root.clone();
    match std::fs::remove_file(root.join(&name)) {
        Ok(()) => Ok(Json(DeleteResponse {
            ok: true,
            message: format!("deleted {name}"),
        })),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ApiError::NotFound("file not found".into()))
        }
        Err(e) => Err(ApiError::Internal(e.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Observability
// ---------------------------------------------------------------------------

#[utoipa::path(get, path = "/api/system", responses(
    (status = 200, description = "Runtime facts", body = SystemResponse)
))]
pub async fn system(State(state): State<AppState>) -> Json<SystemResponse> {
    let cfg = state.cfg.read().await.clone();
    Json(SystemResponse {
        version: env!("CARGO_PKG_VERSION"),
        os: std::env::consts::OS,
        arch: std::env::consts::ARCH,
        data_root: cfg.data.root.display().to_string(),
        config_dir: config::default_config_dir().display().to_string(),
        sdr_available: binary_on_path(RADIO_BINARY),
        disk: disk_usage(&cfg.data.root),
    })
}

#[utoipa::path(get, path = "/api/logs", params(
    ("level" = Option<String>, Query, description = "Filter by level (info|warn|error)"),
    ("limit" = Option<usize>, Query, description = "Return only the most recent N entries")
), responses(
    (status = 200, description = "Log ring contents", body = LogsResponse),
    (status = 400, description = "Invalid level", body = ErrorResponse)
))]
pub async fn logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Json<LogsResponse>> {
    let level = match query.level.as_deref() {
        None | Some("") => None,
        Some(s) => Some(
            s.parse::<LogLevel>()
                .map_err(|_| ApiError::BadRequest(format!("invalid level: {s}")))?,
        ),
    };
    Ok(Json(LogsResponse {
        logs: state.status.logs(level, query.limit),
    }))
}

#[utoipa::path(get, path = "/api/stats", responses(
    (status = 200, description = "Capture counters", body = StatsSnapshot)
))]
pub async fn stats(State(state): State<AppState>) -> Json<StatsSnapshot> {
    Json(state.status.stats())
}

// ---------------------------------------------------------------------------
// Scheduler controls
// ---------------------------------------------------------------------------

fn command_response(result: CommandResult) -> Response {
    let code = if result.ok {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (code, Json(result)).into_response()
}

#[utoipa::path(post, path = "/api/trigger", request_body = TriggerRequest, responses(
    (status = 200, description = "Capture triggered", body = CommandResult),
    (status = 400, description = "Unknown satellite", body = ErrorResponse)
))]
pub async fn trigger(
    State(state): State<AppState>,
    Json(req): Json<TriggerRequest>,
) -> Response {
    let sat = match (req.norad_id, req.satellite.as_deref()) {
        (Some(id), _) => capture::by_norad_id(id),
        (None, Some(name)) => capture::by_name(name),
        (None, None) => None,
    };
    let Some(sat) = sat else {
        return ApiError::BadRequest("unknown satellite".into()).into_response();
    };

    let duration_seconds = match req.duration_seconds {
        Some(d) if d > 0 => d,
        _ => 600,
    };

    let result = send_command(
        &state.commands,
        CommandRequest::Trigger {
            norad_id: sat.norad_id,
            duration_seconds,
        },
    )
    .await;
    command_response(result)
}

#[utoipa::path(post, path = "/api/tle-refresh", responses(
    (status = 200, description = "Elements refreshed", body = CommandResult)
))]
pub async fn tle_refresh(State(state): State<AppState>) -> Response {
    command_response(send_command(&state.commands, CommandRequest::TleRefresh).await)
}

#[utoipa::path(post, path = "/api/pause", responses(
    (status = 200, description = "Scheduler paused", body = CommandResult)
))]
pub async fn pause(State(state): State<AppState>) -> Response {
    command_response(send_command(&state.commands, CommandRequest::Pause).await)
}

#[utoipa::path(post, path = "/api/resume", responses(
    (status = 200, description = "Scheduler resumed", body = CommandResult)
))]
pub async fn resume(State(state): State<AppState>) -> Response {
    command_response(send_command(&state.commands, CommandRequest::Resume).await)
}

#[utoipa::path(post, path = "/api/skip", responses(
    (status = 200, description = "Current pass skipped", body = CommandResult)
))]
pub async fn skip(State(state): State<AppState>) -> Response {
    command_response(send_command(&state.commands, CommandRequest::Skip).await)
}

#[utoipa::path(post, path = "/api/cancel", responses(
    (status = 200, description = "In-flight capture cancelled", body = CommandResult),
    (status = 500, description = "No capture in progress", body = CommandResult)
))]
pub async fn cancel(State(state): State<AppState>) -> Response {
    command_response(send_command(&state.commands, CommandRequest::Cancel).await)
}

#[utoipa::path(post, path = "/api/reload", request_body = ReloadRequest, responses(
    (status = 200, description = "Configuration reloaded", body = ReloadResponse),
    (status = 404, description = "Profile not found", body = ErrorResponse),
    (status = 500, description = "Reload failed", body = ErrorResponse)
))]
pub async fn reload(
    State(state): State<AppState>,
    body: Option<Json<ReloadRequest>>,
) -> ApiResult<Json<ReloadResponse>> {
    let profile = body.and_then(|Json(b)| b.profile);

    let load_path = match profile {
        Some(profile) => {
            let candidate = config::default_config_dir().join(format!("{profile}.toml"));
            if !candidate.is_file() {
                return Err(ApiError::NotFound(format!(
                    "profile {profile:?} not found at {}",
                    candidate.display()
                )));
            }
            candidate
        }
        None => state
            .config_path
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| ApiError::Internal("no config file path set".into()))?,
    };

    let new_cfg =
        Config::load(&load_path).map_err(|e| ApiError::Internal(format!("config reload failed: {e}")))?;
    new_cfg
        .ensure_dirs()
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    *state.cfg.write().await = new_cfg;
    *state.config_path.write().unwrap() = Some(load_path.clone());

    state.hub.log(
        DAEMON_COMPONENT,
        LogLevel::Info,
        format!("config reloaded from {}", load_path.display()),
    );

    Ok(Json(ReloadResponse {
        ok: true,
        message: format!("configuration reloaded from {}", load_path.display()),
    }))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Split "NOAA-19_20260215T143022Z.wav" into satellite and timestamp on the
/// last underscore.
fn parse_capture_name(filename: &str) -> (&str, &str) {
    let name = filename.strip_suffix(".wav").unwrap_or(filename);
    match name.rfind('_') {
        Some(idx) => (&name[..idx], &name[idx + 1..]),
        None => (name, ""),
    }
}

fn binary_on_path(name: &str) -> bool {
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| dir.join(name).is_file())
}

fn disk_usage(path: &Path) -> Option<DiskUsage> {
    let stat = nix::sys::statvfs::statvfs(path).ok()?;
    let frag = stat.fragment_size() as u64;
    let total = stat.blocks() as u64 * frag;
    let free = stat.blocks_free() as u64 * frag;
    Some(DiskUsage {
        total_bytes: total,
        used_bytes: total - free,
        available_bytes: stat.blocks_available() as u64 * frag,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_name_splits_on_last_underscore() {
        assert_eq!(
            parse_capture_name("NOAA-19_20260215T143022Z.wav"),
            ("NOAA-19", "20260215T143022Z")
        );
        assert_eq!(parse_capture_name("oddball.wav"), ("oddball", ""));
    }

    #[test]
    fn disk_usage_reports_something_for_tmp() {
        let du = disk_usage(Path::new("/tmp")).unwrap();
        assert!(du.total_bytes >= du.available_bytes);
    }
}
