//! Embedded WebRTC room
//!
//! The room owns the published tracks and the subscriber peers that joined
//! through the signaling endpoint. It is the production [`Transport`].

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webrtc::track::track_local::TrackLocal;

use super::config::{bind_address, ApiCredentials, WebRtcConfig};
use super::peer::SubscriberPeer;
use super::signaling::create_router;
use super::track::{H264SampleSink, OpusSampleSink};
use crate::config::SessionConfig;
use crate::error::{BridgeError, Result};
use crate::media::MediaKind;
use crate::transport::{PeerSet, TrackOptions, TrackSink, Transport};

/// Attribute announced for the publishing participant
pub const PUBLISHER_ROLE: &str = "agent-avatar";

struct ServerHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

/// A single named room served over HTTP signaling
pub struct WebRtcRoom {
    name: String,
    identity: String,
    config: WebRtcConfig,
    credentials: ApiCredentials,
    tracks: Mutex<Vec<Arc<dyn TrackLocal + Send + Sync>>>,
    peers: Mutex<HashMap<String, Arc<SubscriberPeer>>>,
    server: Mutex<Option<ServerHandle>>,
    local_addr: Option<SocketAddr>,
    disconnected: AtomicBool,
}

impl WebRtcRoom {
    /// Build a room without a signaling server
    pub fn new(
        name: impl Into<String>,
        identity: impl Into<String>,
        config: WebRtcConfig,
        credentials: ApiCredentials,
    ) -> Self {
        Self {
            name: name.into(),
            identity: identity.into(),
            config,
            credentials,
            tracks: Mutex::new(Vec::new()),
            peers: Mutex::new(HashMap::new()),
            server: Mutex::new(None),
            local_addr: None,
            disconnected: AtomicBool::new(false),
        }
    }

    /// Open the room and start serving signaling at the session URL
    pub async fn connect(session: &SessionConfig, room: &str, identity: &str) -> Result<Arc<Self>> {
        let (Some(key), Some(secret)) = (&session.api_key, &session.api_secret) else {
            return Err(BridgeError::Config(
                "session API key and secret are required".into(),
            ));
        };

        let addr = bind_address(&session.url);
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            BridgeError::Session(format!("Failed to bind signaling on {}: {}", addr, e))
        })?;

        let mut this = Self::new(
            room,
            identity,
            WebRtcConfig::from_session(session, identity),
            ApiCredentials::new(key.as_str(), secret.as_str()),
        );
        this.local_addr = Some(listener.local_addr()?);
        let this = Arc::new(this);

        let shutdown = CancellationToken::new();
        let app = create_router(this.clone());
        let token = shutdown.clone();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                warn!("Signaling server error: {}", e);
            }
        });
        *this.server.lock() = Some(ServerHandle { shutdown, task });

        info!(
            "Joined room '{}' as '{}', signaling on {}",
            this.name,
            this.identity,
            this.local_addr
                .map(|a| a.to_string())
                .unwrap_or_else(|| addr.to_string())
        );
        Ok(this)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Attributes of the local participant
    pub fn attributes(&self) -> BTreeMap<String, String> {
        BTreeMap::from([("role".to_string(), PUBLISHER_ROLE.to_string())])
    }

    pub fn credentials(&self) -> &ApiCredentials {
        &self.credentials
    }

    /// Address the signaling server listens on
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Accept a subscriber; returns the session id and the SDP answer
    pub async fn join(&self, identity: Option<String>, offer_sdp: String) -> Result<(String, String)> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(BridgeError::Session("room is closed".into()));
        }
        let tracks = self.tracks.lock().clone();
        if tracks.is_empty() {
            return Err(BridgeError::Session("no tracks published yet".into()));
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        let identity = identity
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("viewer-{}", &session_id[..8]));

        let peer = Arc::new(SubscriberPeer::new(&self.config, session_id.clone(), identity).await?);
        let answer = match self.negotiate(&peer, tracks, offer_sdp).await {
            Ok(answer) => answer,
            Err(e) => {
                let _ = peer.close().await;
                return Err(e);
            }
        };

        info!("Peer '{}' joined room '{}' ({})", peer.identity, self.name, session_id);
        self.peers.lock().insert(session_id.clone(), peer);
        Ok((session_id, answer))
    }

    async fn negotiate(
        &self,
        peer: &SubscriberPeer,
        tracks: Vec<Arc<dyn TrackLocal + Send + Sync>>,
        offer_sdp: String,
    ) -> Result<String> {
        for track in tracks {
            peer.add_track(track).await?;
        }
        peer.handle_offer(offer_sdp, &self.config).await
    }

    /// Remove a subscriber by session id
    pub async fn leave(&self, session_id: &str) -> Result<()> {
        let peer = self
            .peers
            .lock()
            .remove(session_id)
            .ok_or_else(|| BridgeError::NotFound(format!("session {}", session_id)))?;
        info!("Peer '{}' left room '{}'", peer.identity, self.name);
        peer.close().await
    }

    /// Identities of the peers currently present; finished peers are pruned
    pub fn peer_identities(&self) -> PeerSet {
        let mut peers = self.peers.lock();
        peers.retain(|id, peer| {
            let keep = !peer.is_finished();
            if !keep {
                debug!("Pruning peer '{}' ({}): {}", peer.identity, id, peer.state());
            }
            keep
        });
        peers
            .values()
            .filter(|peer| peer.is_present())
            .map(|peer| peer.identity.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for WebRtcRoom {
    async fn publish_track(
        &self,
        kind: MediaKind,
        options: TrackOptions,
    ) -> Result<Arc<dyn TrackSink>> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(BridgeError::Session("room is closed".into()));
        }

        let stream_id = self.config.stream_id.as_str();
        let (sink, track) = match kind {
            MediaKind::Video => {
                let sink = Arc::new(H264SampleSink::new(&options.name, stream_id));
                let track = sink.track_local();
                (sink as Arc<dyn TrackSink>, track)
            }
            MediaKind::Audio => {
                let sink = Arc::new(OpusSampleSink::new(
                    &options.name,
                    stream_id,
                    options.frame_duration,
                ));
                let track = sink.track_local();
                (sink as Arc<dyn TrackSink>, track)
            }
        };

        self.tracks.lock().push(track);
        if !self.peers.lock().is_empty() {
            debug!("{} track published after peers joined; they will not receive it", kind);
        }
        info!(
            "Published {} track '{}'{}",
            kind,
            options.name,
            options
                .dimensions
                .map(|d| format!(" ({})", d))
                .unwrap_or_default()
        );
        Ok(sink)
    }

    async fn list_peers(&self) -> Result<PeerSet> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(BridgeError::Session("room is closed".into()));
        }
        Ok(self.peer_identities())
    }

    async fn disconnect(&self) -> Result<()> {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let peers: Vec<_> = self.peers.lock().drain().map(|(_, peer)| peer).collect();
        join_all(peers.iter().map(|peer| async move {
            if let Err(e) = peer.close().await {
                debug!("Closing peer '{}' failed: {}", peer.identity, e);
            }
        }))
        .await;

        let server = self.server.lock().take();
        if let Some(server) = server {
            server.shutdown.cancel();
            if let Err(e) = server.task.await {
                warn!("Signaling server task failed: {}", e);
            }
        }

        self.tracks.lock().clear();
        info!("Left room '{}'", self.name);
        Ok(())
    }
}
