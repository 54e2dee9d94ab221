//! Avatar Bridge - raw audio/video pipes into a real-time WebRTC room
//!
//! Raw video (yuv420p behind a small dimension header) and raw audio (s16le)
//! arrive through named pipes or files. One `ffmpeg` subprocess per kind
//! compresses them to H.264 and Opus, a frame-paced publisher hands the
//! compressed bytes to the room's tracks, and a presence-based lifecycle
//! controller stops everything once the remote participants are gone.

pub mod bridge;
pub mod config;
pub mod encoder;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod media;
pub mod publisher;
pub mod source;
pub mod transport;
pub mod webrtc;

pub use error::{BridgeError, Result};
