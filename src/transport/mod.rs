//! Transport session contract
//!
//! The bridge only needs three things from a real-time session: publish a
//! frame-paced track, list the peers currently present, and disconnect.
//! Packetization, negotiation and congestion control live behind this seam.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::media::{Dimensions, MediaKind, TrackFrame};

#[cfg(test)]
pub(crate) mod testing;

/// Identities of the remote peers present at one sampling instant
pub type PeerSet = BTreeSet<String>;

/// Options passed when publishing a track
#[derive(Debug, Clone, PartialEq)]
pub struct TrackOptions {
    /// Track name announced to peers
    pub name: String,
    /// Nominal duration of each frame written to the track
    pub frame_duration: Duration,
    /// Video geometry, absent for audio
    pub dimensions: Option<Dimensions>,
}

impl TrackOptions {
    pub fn video(dimensions: Dimensions) -> Self {
        Self {
            name: MediaKind::Video.track_name().to_string(),
            frame_duration: MediaKind::Video.frame_duration(),
            dimensions: Some(dimensions),
        }
    }

    pub fn audio() -> Self {
        Self {
            name: MediaKind::Audio.track_name().to_string(),
            frame_duration: MediaKind::Audio.frame_duration(),
            dimensions: None,
        }
    }
}

/// Destination for the frames of one published track
#[async_trait]
pub trait TrackSink: Send + Sync {
    /// Hand one frame to the transport
    async fn write_frame(&self, frame: TrackFrame) -> Result<()>;

    /// Stop accepting frames; closing twice is a no-op
    async fn close(&self) -> Result<()>;
}

/// A joined real-time session
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish a track and return the sink that feeds it
    async fn publish_track(
        &self,
        kind: MediaKind,
        options: TrackOptions,
    ) -> Result<Arc<dyn TrackSink>>;

    /// Fresh snapshot of the remote peers in the session
    async fn list_peers(&self) -> Result<PeerSet>;

    /// Leave the session; disconnecting twice is a no-op
    async fn disconnect(&self) -> Result<()>;
}
