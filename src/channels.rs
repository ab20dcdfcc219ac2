use log::{info, warn};
use rocket::{delete, get, http::Status, post, serde::json::Json, State};
use serde::{Deserialize, Serialize};

use crate::auth::{AddChannel, Authenticated, ListChannels, RemoveChannel};
use crate::error::RpcError;
use crate::models::{ChannelSummary, Permission, Role};
use crate::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct AddChannelRequest {
    pub name: String,
    #[serde(default)]
    pub is_public: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddChannelResponse {
    pub channel_id: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListChannelsResponse {
    pub channels: Vec<ChannelSummary>,
}

#[post("/channels", data = "<input>")]
pub async fn add_channel(
    state: &State<AppState>,
    auth: Result<Authenticated<AddChannel>, RpcError>,
    input: Json<AddChannelRequest>,
) -> Result<Json<AddChannelResponse>, RpcError> {
    let caller = auth?.caller;
    let name = input.name.trim();
    if name.is_empty() {
        return Err(RpcError::invalid_argument("channel name cannot be empty"));
    }

    let handle = state
        .registry
        .create(name, input.is_public, &caller.username)
        .await;
    Ok(Json(AddChannelResponse {
        channel_id: handle.id(),
    }))
}

/// Only a channel member whose role holds `remove_channel` may remove it.
#[delete("/channels/<id>")]
pub async fn remove_channel(
    state: &State<AppState>,
    auth: Result<Authenticated<RemoveChannel>, RpcError>,
    id: u64,
) -> Result<Status, RpcError> {
    let caller = auth?.caller;
    let invalid = || RpcError::invalid_argument(format!("invalid channel ID: {id}"));

    let handle = state.registry.lookup(id).await.map_err(|_| invalid())?;
    let snapshot = handle.snapshot().await.map_err(|_| invalid())?;
    let role = snapshot.role_of(&caller.username).unwrap_or(Role::Unknown);
    if !snapshot.permissions.allows(role, Permission::RemoveChannel) {
        warn!(
            "{} ({}) tried to remove channel {}",
            caller.username, role, id
        );
        return Err(RpcError::permission_denied(format!(
            "user '{}' may not remove channel {}",
            caller.username, snapshot.name
        )));
    }

    state.registry.remove(id).await.map_err(|_| invalid())?;
    info!("{} removed channel {}", caller.username, id);
    Ok(Status::NoContent)
}

#[get("/channels")]
pub async fn list_channels(
    state: &State<AppState>,
    auth: Result<Authenticated<ListChannels>, RpcError>,
) -> Result<Json<ListChannelsResponse>, RpcError> {
    let caller = auth?.caller;
    let channels = state.registry.visible_to(&caller.username).await;
    Ok(Json(ListChannelsResponse { channels }))
}
