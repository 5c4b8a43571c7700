use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tagstream::{Channel, Handle, Timestamp};

use super::parse_handle;
use super::taggers::resolve_tagger;
use crate::error::{ApiError, ApiResult};
use crate::state::ServerState;

#[derive(Debug, Deserialize)]
pub struct CreateDelayedChannelRequest {
    pub input_channel: Channel,
    /// Picoseconds, non-negative
    pub delay: Timestamp,
}

#[derive(Debug, Serialize)]
pub struct DelayedChannelCreated {
    pub handle: Handle,
    pub channel: Channel,
}

#[derive(Debug, Serialize)]
pub struct DelayedChannelInfo {
    pub handle: Handle,
    pub channel: Channel,
    pub input_channel: Channel,
    pub delay: Timestamp,
}

/// Create a virtual channel replaying an input shifted in time
pub async fn create_delayed_channel(
    State(state): State<Arc<ServerState>>,
    Path(raw): Path<String>,
    Json(req): Json<CreateDelayedChannelRequest>,
) -> Result<(StatusCode, Json<DelayedChannelCreated>), ApiError> {
    let tagger = resolve_tagger(&state, &raw)?;
    let delayed = Arc::new(tagger.create_delayed_channel(req.input_channel, req.delay)?);
    let created = DelayedChannelCreated {
        handle: state.channels.register(delayed.clone())?,
        channel: delayed.channel(),
    };
    tracing::info!(
        "Created delayed channel {} from input {} ({} ps)",
        created.channel,
        req.input_channel,
        req.delay
    );
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_delayed_channel(
    State(state): State<Arc<ServerState>>,
    Path(raw): Path<String>,
) -> ApiResult<DelayedChannelInfo> {
    let handle = parse_handle(&raw)?;
    let delayed = state.channels.resolve(&handle)?;
    Ok(Json(DelayedChannelInfo {
        handle,
        channel: delayed.channel(),
        input_channel: delayed.input_channel(),
        delay: delayed.delay(),
    }))
}

/// Unregister a virtual channel; its tags stop with the last reference
pub async fn delete_delayed_channel(
    State(state): State<Arc<ServerState>>,
    Path(raw): Path<String>,
) -> Result<StatusCode, ApiError> {
    let handle = parse_handle(&raw)?;
    state.channels.unregister(&handle)?;
    Ok(StatusCode::NO_CONTENT)
}
