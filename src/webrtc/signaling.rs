//! WHEP-style signaling endpoint
//!
//! `POST /rooms/{room}/whep` with an SDP offer joins the room and returns the
//! answer, `DELETE /rooms/{room}/whep/{session}` leaves it. Every route but
//! `/health` requires the room's API key pair as HTTP Basic credentials.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use axum_extra::{
    headers::{authorization::Basic, Authorization},
    TypedHeader,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::config::ApiCredentials;
use super::room::WebRtcRoom;
use crate::error::{BridgeError, Result};

/// Peer connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// States in which the participant counts as present
    pub fn is_present(&self) -> bool {
        matches!(
            self,
            ConnectionState::New | ConnectionState::Connecting | ConnectionState::Connected
        )
    }

    /// States a peer never leaves
    pub fn is_finished(&self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::New => write!(f, "new"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Failed => write!(f, "failed"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Query parameters accepted when joining
#[derive(Debug, Default, Deserialize)]
pub struct JoinParams {
    pub identity: Option<String>,
}

/// Body of `GET /rooms/{room}/peers`
#[derive(Debug, Serialize, Deserialize)]
pub struct PeersResponse {
    pub room: String,
    /// Identity of the publishing participant
    #[serde(default)]
    pub publisher: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    pub peers: Vec<String>,
}

/// Create the signaling router for `room`
pub fn create_router(room: Arc<WebRtcRoom>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([header::LOCATION]);

    let room_routes = Router::new()
        .route("/rooms/:room/whep", post(join_room))
        .route("/rooms/:room/whep/:session", delete(leave_room))
        .route("/rooms/:room/peers", get(list_peers))
        .layer(middleware::from_fn_with_state(room.clone(), auth_middleware));

    Router::new()
        .route("/health", get(health_check))
        .merge(room_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(room)
}

/// Reject requests without the room's credentials
pub fn check_credentials(
    expected: &ApiCredentials,
    provided: Option<&Authorization<Basic>>,
) -> Result<()> {
    match provided {
        Some(auth) if expected.matches(auth.username(), auth.password()) => Ok(()),
        _ => Err(BridgeError::Unauthorized),
    }
}

async fn auth_middleware(
    State(room): State<Arc<WebRtcRoom>>,
    auth: Option<TypedHeader<Authorization<Basic>>>,
    request: Request,
    next: Next,
) -> Result<Response> {
    check_credentials(room.credentials(), auth.as_ref().map(|TypedHeader(a)| a))?;
    Ok(next.run(request).await)
}

async fn health_check() -> &'static str {
    "ok"
}

fn ensure_room(room: &WebRtcRoom, name: &str) -> Result<()> {
    if room.name() != name {
        return Err(BridgeError::NotFound(format!("room {}", name)));
    }
    Ok(())
}

async fn join_room(
    State(room): State<Arc<WebRtcRoom>>,
    Path(name): Path<String>,
    Query(params): Query<JoinParams>,
    offer: String,
) -> Result<Response> {
    ensure_room(&room, &name)?;
    if offer.trim().is_empty() {
        return Err(BridgeError::BadRequest("empty SDP offer".into()));
    }

    let (session_id, answer) = room.join(params.identity, offer).await?;
    let location = format!("/rooms/{}/whep/{}", name, session_id);

    Ok((
        StatusCode::CREATED,
        [
            (header::LOCATION, location),
            (header::CONTENT_TYPE, "application/sdp".to_string()),
        ],
        answer,
    )
        .into_response())
}

async fn leave_room(
    State(room): State<Arc<WebRtcRoom>>,
    Path((name, session)): Path<(String, String)>,
) -> Result<StatusCode> {
    ensure_room(&room, &name)?;
    room.leave(&session).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_peers(
    State(room): State<Arc<WebRtcRoom>>,
    Path(name): Path<String>,
) -> Result<Json<PeersResponse>> {
    ensure_room(&room, &name)?;
    Ok(Json(PeersResponse {
        room: name,
        publisher: room.identity().to_string(),
        attributes: room.attributes(),
        peers: room.peer_identities().into_iter().collect(),
    }))
}
