use utoipa::OpenApi;

use crate::capture::Satellite;
use crate::config::{
    Config, DataConfig, DemoConfig, LoggingConfig, PredictConfig, ProfileInfo, SdrConfig,
    ServerConfig, StationConfig,
};
use crate::events::LogLevel;
use crate::predict::{CacheInfo, Location};
use crate::scheduler::CommandResult;
use crate::status::{DaemonState, LogRecord, PassInfo, PassStage, StatsSnapshot};
use crate::web::error::ErrorResponse;
use crate::web::handlers::{
    CaptureFileInfo, CapturesResponse, DeleteResponse, DiskUsage, LogsResponse, NextPassResponse,
    PassJson, PassesResponse, ProfilesResponse, ReloadRequest, ReloadResponse, SatellitesResponse,
    StatusResponse, SystemResponse, TriggerRequest, VersionResponse,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::web::handlers::healthz,
        crate::web::handlers::status,
        crate::web::handlers::version,
        crate::web::handlers::satellites,
        crate::web::handlers::get_config,
        crate::web::handlers::config_profiles,
        crate::web::handlers::passes,
        crate::web::handlers::next_pass,
        crate::web::handlers::tle_info,
        crate::web::handlers::list_captures,
        crate::web::handlers::delete_capture,
        crate::web::handlers::system,
        crate::web::handlers::logs,
        crate::web::handlers::stats,
        crate::web::handlers::trigger,
        crate::web::handlers::tle_refresh,
        crate::web::handlers::pause,
        crate::web::handlers::resume,
        crate::web::handlers::skip,
        crate::web::handlers::cancel,
        crate::web::handlers::reload,
    ),
    components(schemas(
        StatusResponse,
        VersionResponse,
        SatellitesResponse,
        Satellite,
        PassesResponse,
        PassJson,
        NextPassResponse,
        Location,
        CapturesResponse,
        CaptureFileInfo,
        DeleteResponse,
        ProfilesResponse,
        ProfileInfo,
        SystemResponse,
        DiskUsage,
        LogsResponse,
        LogRecord,
        LogLevel,
        StatsSnapshot,
        CacheInfo,
        CommandResult,
        TriggerRequest,
        ReloadRequest,
        ReloadResponse,
        ErrorResponse,
        DaemonState,
        PassInfo,
        PassStage,
        Config,
        DataConfig,
        LoggingConfig,
        ServerConfig,
        DemoConfig,
        StationConfig,
        SdrConfig,
        PredictConfig,
    )),
    info(
        title = "Ephemeris Engine API",
        description = "Control plane for the NOAA weather satellite capture daemon"
    ),
    tags(
        (name = "ephemerisd", description = "Daemon control and observation")
    )
)]
pub struct ApiDoc;
