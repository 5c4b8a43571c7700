use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tagstream::{
    Channel, ChannelEdge, Handle, TaggerModel, TimeTagger, Timestamp, VirtualTagger,
    VirtualTaggerConfig,
};

use super::parse_handle;
use crate::error::{ApiError, ApiResult};
use crate::state::ServerState;

/// Create tagger request
#[derive(Debug, Default, Deserialize)]
pub struct CreateTaggerRequest {
    #[serde(default)]
    pub model: TaggerModel,
    #[serde(default)]
    pub serial: Option<String>,
    /// Number of physical inputs (default 8)
    #[serde(default)]
    pub n_channels: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct TaggerCreated {
    pub handle: Handle,
    pub serial: String,
    pub model: TaggerModel,
}

/// One entry of the tagger scan
#[derive(Debug, Serialize)]
pub struct TaggerSummary {
    pub handle: Handle,
    pub serial: String,
    pub model: TaggerModel,
}

#[derive(Debug, Serialize)]
pub struct TaggerListResponse {
    pub taggers: Vec<TaggerSummary>,
}

#[derive(Debug, Serialize)]
pub struct TaggerInfo {
    pub handle: Handle,
    pub serial: String,
    pub model: TaggerModel,
    pub n_channels: u32,
    pub test_signal_divider: u32,
    pub overflows: u64,
    pub batches_delivered: u64,
}

#[derive(Debug, Deserialize)]
pub struct ChannelListQuery {
    #[serde(default)]
    pub edge: ChannelEdge,
}

#[derive(Debug, Serialize)]
pub struct ChannelListResponse {
    pub channels: Vec<Channel>,
}

#[derive(Debug, Deserialize)]
pub struct TestSignalRequest {
    pub channels: Vec<Channel>,
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChannelQuery {
    pub channel: Channel,
}

#[derive(Debug, Serialize)]
pub struct TestSignalResponse {
    pub channel: Channel,
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct InputDelayResponse {
    pub channel: Channel,
    pub delay: Timestamp,
}

#[derive(Debug, Deserialize)]
pub struct InputDelayRequest {
    pub channel: Channel,
    /// Picoseconds
    pub delay: Timestamp,
}

#[derive(Debug, Deserialize)]
pub struct DividerRequest {
    pub divider: u32,
}

#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    #[serde(default = "default_sync_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_sync_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Serialize)]
pub struct OverflowsResponse {
    pub overflows: u64,
}

pub(crate) fn resolve_tagger(
    state: &ServerState,
    raw: &str,
) -> Result<Arc<VirtualTagger>, ApiError> {
    let handle = parse_handle(raw)?;
    Ok(state.taggers.resolve(&handle)?)
}

/// Create a tagger and start its delivery thread
pub async fn create_tagger(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<CreateTaggerRequest>,
) -> Result<(StatusCode, Json<TaggerCreated>), ApiError> {
    let defaults = state.tagger_config();
    let config = VirtualTaggerConfig {
        model: req.model,
        serial: req.serial,
        n_channels: req.n_channels.unwrap_or(defaults.n_channels),
        ..defaults
    };
    let tagger = Arc::new(VirtualTagger::new(config)?);
    let created = TaggerCreated {
        handle: state.taggers.register(tagger.clone())?,
        serial: tagger.serial(),
        model: tagger.model(),
    };
    tracing::info!("Created tagger {} ({})", created.handle, created.serial);
    Ok((StatusCode::CREATED, Json(created)))
}

/// Scan the registered taggers
pub async fn list_taggers(
    State(state): State<Arc<ServerState>>,
) -> ApiResult<TaggerListResponse> {
    let taggers = state
        .taggers
        .handles()
        .into_iter()
        .filter_map(|handle| {
            // A tagger freed between the two calls is skipped
            let tagger = state.taggers.resolve(&handle).ok()?;
            Some(TaggerSummary {
                handle,
                serial: tagger.serial(),
                model: tagger.model(),
            })
        })
        .collect();
    Ok(Json(TaggerListResponse { taggers }))
}

/// Free a tagger: unregister it and stop batch delivery
pub async fn delete_tagger(
    State(state): State<Arc<ServerState>>,
    Path(raw): Path<String>,
) -> Result<StatusCode, ApiError> {
    let handle = parse_handle(&raw)?;
    let tagger = state.taggers.unregister(&handle)?;
    tokio::task::spawn_blocking(move || tagger.shutdown()).await?;
    tracing::info!("Freed tagger {}", handle);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_tagger(
    State(state): State<Arc<ServerState>>,
    Path(raw): Path<String>,
) -> ApiResult<TaggerInfo> {
    let handle = parse_handle(&raw)?;
    let tagger = state.taggers.resolve(&handle)?;
    Ok(Json(TaggerInfo {
        handle,
        serial: tagger.serial(),
        model: tagger.model(),
        n_channels: tagger.config().n_channels,
        test_signal_divider: tagger.test_signal_divider(),
        overflows: tagger.get_overflows(),
        batches_delivered: tagger.batches_delivered(),
    }))
}

pub async fn list_channels(
    State(state): State<Arc<ServerState>>,
    Path(raw): Path<String>,
    Query(query): Query<ChannelListQuery>,
) -> ApiResult<ChannelListResponse> {
    let tagger = resolve_tagger(&state, &raw)?;
    Ok(Json(ChannelListResponse {
        channels: tagger.get_channel_list(query.edge),
    }))
}

pub async fn set_test_signal(
    State(state): State<Arc<ServerState>>,
    Path(raw): Path<String>,
    Json(req): Json<TestSignalRequest>,
) -> Result<StatusCode, ApiError> {
    let tagger = resolve_tagger(&state, &raw)?;
    tagger.set_test_signal(&req.channels, req.enabled)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_test_signal(
    State(state): State<Arc<ServerState>>,
    Path(raw): Path<String>,
    Query(query): Query<ChannelQuery>,
) -> ApiResult<TestSignalResponse> {
    let tagger = resolve_tagger(&state, &raw)?;
    Ok(Json(TestSignalResponse {
        channel: query.channel,
        enabled: tagger.test_signal(query.channel)?,
    }))
}

pub async fn get_input_delay(
    State(state): State<Arc<ServerState>>,
    Path(raw): Path<String>,
    Query(query): Query<ChannelQuery>,
) -> ApiResult<InputDelayResponse> {
    let tagger = resolve_tagger(&state, &raw)?;
    Ok(Json(InputDelayResponse {
        channel: query.channel,
        delay: tagger.input_delay(query.channel)?,
    }))
}

pub async fn set_input_delay(
    State(state): State<Arc<ServerState>>,
    Path(raw): Path<String>,
    Json(req): Json<InputDelayRequest>,
) -> Result<StatusCode, ApiError> {
    let tagger = resolve_tagger(&state, &raw)?;
    tagger.set_input_delay(req.channel, req.delay)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_test_signal_divider(
    State(state): State<Arc<ServerState>>,
    Path(raw): Path<String>,
    Json(req): Json<DividerRequest>,
) -> Result<StatusCode, ApiError> {
    let tagger = resolve_tagger(&state, &raw)?;
    tagger.set_test_signal_divider(req.divider)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Wait until every tag generated before the call has been delivered
pub async fn sync_tagger(
    State(state): State<Arc<ServerState>>,
    Path(raw): Path<String>,
    Json(req): Json<SyncRequest>,
) -> Result<StatusCode, ApiError> {
    let tagger = resolve_tagger(&state, &raw)?;
    let timeout = Duration::from_millis(req.timeout_ms);
    tokio::task::spawn_blocking(move || tagger.sync(timeout)).await??;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_overflows(
    State(state): State<Arc<ServerState>>,
    Path(raw): Path<String>,
) -> ApiResult<OverflowsResponse> {
    let tagger = resolve_tagger(&state, &raw)?;
    Ok(Json(OverflowsResponse {
        overflows: tagger.get_overflows(),
    }))
}

pub async fn clear_overflows(
    State(state): State<Arc<ServerState>>,
    Path(raw): Path<String>,
) -> Result<StatusCode, ApiError> {
    let tagger = resolve_tagger(&state, &raw)?;
    tagger.clear_overflows();
    Ok(StatusCode::NO_CONTENT)
}
