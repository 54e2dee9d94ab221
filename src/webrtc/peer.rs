//! Subscriber peer connection

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::TrackLocal;

use super::config::WebRtcConfig;
use super::signaling::ConnectionState;
use crate::error::{BridgeError, Result};

/// One remote participant receiving the room's tracks
pub struct SubscriberPeer {
    /// Session ID handed out by the signaling endpoint
    pub session_id: String,
    /// Identity the participant joined with
    pub identity: String,
    pc: Arc<RTCPeerConnection>,
    state_rx: watch::Receiver<ConnectionState>,
    closed: AtomicBool,
}

impl SubscriberPeer {
    /// Create a new peer connection
    pub async fn new(config: &WebRtcConfig, session_id: String, identity: String) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| BridgeError::Transport(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| {
            BridgeError::Transport(format!("Failed to register interceptors: {}", e))
        })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = api.new_peer_connection(rtc_config).await.map_err(|e| {
            BridgeError::Transport(format!("Failed to create peer connection: {}", e))
        })?;
        let pc = Arc::new(pc);

        let (state_tx, state_rx) = watch::channel(ConnectionState::New);
        let label = format!("{} ({})", identity, session_id);
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            if let Some(new_state) = map_state(s) {
                info!("Peer {} connection state: {}", label, new_state);
                let _ = state_tx.send(new_state);
            }
            Box::pin(async {})
        }));

        Ok(Self {
            session_id,
            identity,
            pc,
            state_rx,
            closed: AtomicBool::new(false),
        })
    }

    /// Send `track` to this peer
    pub async fn add_track(&self, track: Arc<dyn TrackLocal + Send + Sync>) -> Result<()> {
        let sender = self
            .pc
            .add_track(track)
            .await
            .map_err(|e| BridgeError::Transport(format!("Failed to add track: {}", e)))?;

        // RTCP must be drained for the interceptors to work
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });
        Ok(())
    }

    /// Answer an SDP offer; the answer carries all gathered candidates
    pub async fn handle_offer(&self, offer_sdp: String, config: &WebRtcConfig) -> Result<String> {
        let offer = RTCSessionDescription::offer(offer_sdp)
            .map_err(|e| BridgeError::BadRequest(format!("Invalid SDP offer: {}", e)))?;

        self.pc
            .set_remote_description(offer)
            .await
            .map_err(|e| BridgeError::BadRequest(format!("Failed to set remote description: {}", e)))?;

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| BridgeError::Transport(format!("Failed to create answer: {}", e)))?;

        let mut gather_complete = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| BridgeError::Transport(format!("Failed to set local description: {}", e)))?;

        if tokio::time::timeout(config.gathering_timeout, gather_complete.recv())
            .await
            .is_err()
        {
            warn!(
                "ICE gathering for {} not complete after {:?}, answering with partial candidates",
                self.session_id, config.gathering_timeout
            );
        }

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| BridgeError::Transport("No local description".into()))?;
        Ok(local.sdp)
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Whether the peer counts as present in the room
    pub fn is_present(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.state().is_present()
    }

    /// Whether the peer can be dropped from the room
    pub fn is_finished(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.state().is_finished()
    }

    /// Close the connection; closing twice is a no-op
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!("Closing peer {}", self.session_id);
        self.pc
            .close()
            .await
            .map_err(|e| BridgeError::Transport(format!("Failed to close peer connection: {}", e)))
    }
}

fn map_state(state: RTCPeerConnectionState) -> Option<ConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
        _ => None,
    }
}
