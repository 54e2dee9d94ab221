//! Media kinds, geometry and the frame unit handed to transport sinks

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Video frames per second expected from the raw source
pub const VIDEO_FPS: u32 = 25;

/// Nominal duration of one video frame (25 fps)
pub const VIDEO_FRAME_DURATION: Duration = Duration::from_millis(40);

/// Nominal duration of one Opus frame
pub const AUDIO_FRAME_DURATION: Duration = Duration::from_millis(20);

/// Media kind carried by a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    /// Nominal duration of one track frame
    pub fn frame_duration(&self) -> Duration {
        match self {
            MediaKind::Video => VIDEO_FRAME_DURATION,
            MediaKind::Audio => AUDIO_FRAME_DURATION,
        }
    }

    /// Emit a cadence report every this many intervals
    pub fn report_every(&self) -> u64 {
        match self {
            MediaKind::Video => 100,
            MediaKind::Audio => 500,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            MediaKind::Video => "video/H264",
            MediaKind::Audio => "audio/opus",
        }
    }

    /// Track name used when publishing
    pub fn track_name(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }

    /// Label used as log prefix
    pub fn label(&self) -> &'static str {
        match self {
            MediaKind::Video => "Video",
            MediaKind::Audio => "Audio",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.track_name())
    }
}

/// Frame geometry announced by the raw video header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Dimensions {
    fn default() -> Self {
        Self::new(512, 512)
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A slice of compressed bytes with its nominal duration
#[derive(Debug, Clone)]
pub struct TrackFrame {
    pub data: Bytes,
    pub duration: Duration,
}

impl TrackFrame {
    pub fn new(data: Bytes, duration: Duration) -> Self {
        Self { data, duration }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_defaults() {
        assert_eq!(MediaKind::Video.frame_duration(), Duration::from_millis(40));
        assert_eq!(MediaKind::Audio.frame_duration(), Duration::from_millis(20));
        assert_eq!(MediaKind::Video.report_every(), 100);
        assert_eq!(MediaKind::Audio.report_every(), 500);
        assert_eq!(MediaKind::Audio.to_string(), "audio");
    }

    #[test]
    fn test_dimensions_display() {
        assert_eq!(Dimensions::new(640, 360).to_string(), "640x360");
        assert_eq!(Dimensions::default(), Dimensions::new(512, 512));
    }
}
