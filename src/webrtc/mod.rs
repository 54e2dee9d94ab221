//! WebRTC transport
//!
//! Architecture:
//! ```text
//! FramePacedPublisher
//!        |
//!        v
//! H264SampleSink / OpusSampleSink (Annex-B / Ogg reassembly)
//!        |
//!        v
//! TrackLocalStaticSample (RTP packetization)
//!        |
//!        v
//! SubscriberPeer(s) <------- WHEP signaling (axum) ------- Viewer
//! ```

pub mod annexb;
pub mod config;
pub mod ogg;
pub mod peer;
pub mod room;
pub mod signaling;
pub mod track;

pub use config::{ApiCredentials, WebRtcConfig};
pub use peer::SubscriberPeer;
pub use room::WebRtcRoom;
pub use signaling::{create_router, ConnectionState};
pub use track::{H264SampleSink, OpusSampleSink};
