use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tagstream::{
    Channel, CorrelationConfig, EpochStatus, FlimConfig, Handle, Measurement, MeasurementControl,
    TimeTagger, Timestamp,
};

use super::parse_handle;
use super::taggers::resolve_tagger;
use crate::error::{ApiError, ApiResult};
use crate::state::ServerState;

#[derive(Debug, Deserialize)]
pub struct CounterRequest {
    pub channels: Vec<Channel>,
}

#[derive(Debug, Serialize)]
pub struct MeasurementCreated {
    pub handle: Handle,
    pub kind: &'static str,
    pub channels: Vec<Channel>,
}

#[derive(Debug, Serialize)]
pub struct MeasurementInfo {
    pub handle: Handle,
    pub kind: &'static str,
    pub channels: Vec<Channel>,
    pub running: bool,
    pub status: EpochStatus,
}

#[derive(Debug, Deserialize)]
pub struct StartForRequest {
    /// Acquisition time in picoseconds
    pub duration: Timestamp,
    #[serde(default = "default_clear")]
    pub clear: bool,
}

fn default_clear() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct WaitRequest {
    pub timeout_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct RunningResponse {
    pub running: bool,
}

#[derive(Debug, Serialize)]
pub struct WaitResponse {
    pub finished: bool,
}

#[derive(Debug, Serialize)]
pub struct IndexResponse {
    pub index: Vec<i64>,
}

#[derive(Debug, Serialize)]
pub struct DataResponse {
    pub data: Vec<u64>,
    pub status: EpochStatus,
}

fn resolve_measurement(
    state: &ServerState,
    raw: &str,
) -> Result<Arc<dyn MeasurementControl>, ApiError> {
    let handle = parse_handle(raw)?;
    Ok(state.measurements.resolve(&handle)?)
}

fn register(
    state: &ServerState,
    measurement: Arc<dyn MeasurementControl>,
) -> Result<(StatusCode, Json<MeasurementCreated>), ApiError> {
    let created = MeasurementCreated {
        handle: state.measurements.register(measurement.clone())?,
        kind: measurement.kind(),
        channels: measurement.channels(),
    };
    tracing::info!(
        "Created {} measurement {} on channels {:?}",
        created.kind,
        created.handle,
        created.channels
    );
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn create_counter(
    State(state): State<Arc<ServerState>>,
    Path(raw): Path<String>,
    Json(req): Json<CounterRequest>,
) -> Result<(StatusCode, Json<MeasurementCreated>), ApiError> {
    let tagger: Arc<dyn TimeTagger> = resolve_tagger(&state, &raw)?;
    let measurement = Measurement::counter(tagger, &req.channels)?;
    register(&state, measurement)
}

pub async fn create_correlation(
    State(state): State<Arc<ServerState>>,
    Path(raw): Path<String>,
    Json(config): Json<CorrelationConfig>,
) -> Result<(StatusCode, Json<MeasurementCreated>), ApiError> {
    let tagger: Arc<dyn TimeTagger> = resolve_tagger(&state, &raw)?;
    let measurement = Measurement::correlation(tagger, config)?;
    register(&state, measurement)
}

pub async fn create_flim(
    State(state): State<Arc<ServerState>>,
    Path(raw): Path<String>,
    Json(config): Json<FlimConfig>,
) -> Result<(StatusCode, Json<MeasurementCreated>), ApiError> {
    let tagger: Arc<dyn TimeTagger> = resolve_tagger(&state, &raw)?;
    let measurement = Measurement::flim(tagger, config)?;
    register(&state, measurement)
}

pub async fn get_measurement(
    State(state): State<Arc<ServerState>>,
    Path(raw): Path<String>,
) -> ApiResult<MeasurementInfo> {
    let handle = parse_handle(&raw)?;
    let measurement = state.measurements.resolve(&handle)?;
    Ok(Json(MeasurementInfo {
        handle,
        kind: measurement.kind(),
        channels: measurement.channels(),
        running: measurement.is_running(),
        status: measurement.status(),
    }))
}

/// Start accumulating into the existing aggregate
pub async fn start_measurement(
    State(state): State<Arc<ServerState>>,
    Path(raw): Path<String>,
) -> Result<StatusCode, ApiError> {
    resolve_measurement(&state, &raw)?.start_with(false);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn start_measurement_for(
    State(state): State<Arc<ServerState>>,
    Path(raw): Path<String>,
    Json(req): Json<StartForRequest>,
) -> Result<StatusCode, ApiError> {
    resolve_measurement(&state, &raw)?.start_for(req.duration, req.clear)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn stop_measurement(
    State(state): State<Arc<ServerState>>,
    Path(raw): Path<String>,
) -> Result<StatusCode, ApiError> {
    resolve_measurement(&state, &raw)?.stop();
    Ok(StatusCode::NO_CONTENT)
}

pub async fn clear_measurement(
    State(state): State<Arc<ServerState>>,
    Path(raw): Path<String>,
) -> Result<StatusCode, ApiError> {
    resolve_measurement(&state, &raw)?.clear();
    Ok(StatusCode::NO_CONTENT)
}

pub async fn is_running(
    State(state): State<Arc<ServerState>>,
    Path(raw): Path<String>,
) -> ApiResult<RunningResponse> {
    let measurement = resolve_measurement(&state, &raw)?;
    Ok(Json(RunningResponse {
        running: measurement.is_running(),
    }))
}

/// Block until a timed run has finished or the timeout has passed
pub async fn wait_until_finished(
    State(state): State<Arc<ServerState>>,
    Path(raw): Path<String>,
    Json(req): Json<WaitRequest>,
) -> ApiResult<WaitResponse> {
    let measurement = resolve_measurement(&state, &raw)?;
    let timeout = Duration::from_millis(req.timeout_ms);
    let finished =
        tokio::task::spawn_blocking(move || measurement.wait_until_finished(timeout)).await?;
    Ok(Json(WaitResponse { finished }))
}

pub async fn get_index(
    State(state): State<Arc<ServerState>>,
    Path(raw): Path<String>,
) -> ApiResult<IndexResponse> {
    let measurement = resolve_measurement(&state, &raw)?;
    Ok(Json(IndexResponse {
        index: measurement.index(),
    }))
}

pub async fn get_data(
    State(state): State<Arc<ServerState>>,
    Path(raw): Path<String>,
) -> ApiResult<DataResponse> {
    let measurement = resolve_measurement(&state, &raw)?;
    Ok(Json(DataResponse {
        data: measurement.data(),
        status: measurement.status(),
    }))
}

/// Free a measurement: stop it and drop the engine, which unsubscribes it
pub async fn delete_measurement(
    State(state): State<Arc<ServerState>>,
    Path(raw): Path<String>,
) -> Result<StatusCode, ApiError> {
    let handle = parse_handle(&raw)?;
    let measurement = state.measurements.unregister(&handle)?;
    measurement.stop();
    tracing::info!("Freed {} measurement {}", measurement.kind(), handle);
    Ok(StatusCode::NO_CONTENT)
}
