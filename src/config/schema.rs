use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::lifecycle::LifecyclePolicy;
use crate::media::{Dimensions, VIDEO_FPS};

/// Default FIFO paths used by the live variant
pub const DEFAULT_VIDEO_PIPE: &str = "/tmp/video_pipe.yuv";
pub const DEFAULT_AUDIO_PIPE: &str = "/tmp/audio_pipe.raw";

/// Default input files used by the file variant
pub const DEFAULT_VIDEO_FILE: &str = "video.i420";
pub const DEFAULT_AUDIO_FILE: &str = "audio.raw";

/// Room joined by the file variant
pub const DEFAULT_FILE_ROOM: &str = "test-room";

/// Identity used by the file variant
pub const DEFAULT_FILE_IDENTITY: &str = "go-user";

/// Main bridge configuration
///
/// One struct drives both the live-pipe and the static-file variant; the
/// presets only differ in input kind, encoder tuning and lifecycle policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Room (session) name to publish into
    pub room: String,
    /// Local participant identity (generated when unset)
    pub identity: Option<String>,
    /// Raw input settings
    pub input: InputConfig,
    /// Encoder subprocess settings
    pub encoder: EncoderConfig,
    /// Publisher settings
    pub publisher: PublisherConfig,
    /// When the bridge should stop
    pub lifecycle: LifecycleConfig,
    /// Session endpoint and credentials
    pub session: SessionConfig,
    /// Log start codes found in the compressed video stream
    pub diagnostics: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            room: String::new(),
            identity: None,
            input: InputConfig::default(),
            encoder: EncoderConfig::default(),
            publisher: PublisherConfig::default(),
            lifecycle: LifecycleConfig::default(),
            session: SessionConfig::default(),
            diagnostics: false,
        }
    }
}

impl BridgeConfig {
    /// Preset for the live variant: named pipes, presence-based shutdown
    pub fn live(room: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            ..Default::default()
        }
    }

    /// Preset for the file variant: static inputs, fixed run time
    pub fn file() -> Self {
        Self {
            room: DEFAULT_FILE_ROOM.to_string(),
            identity: Some(DEFAULT_FILE_IDENTITY.to_string()),
            input: InputConfig {
                mode: InputMode::File,
                video_path: PathBuf::from(DEFAULT_VIDEO_FILE),
                audio_path: PathBuf::from(DEFAULT_AUDIO_FILE),
                dimensions: Some(Dimensions::default()),
            },
            encoder: EncoderConfig {
                video: VideoEncoderConfig {
                    gop: 30,
                    force_keyframe_secs: Some(2),
                    ..Default::default()
                },
                audio: AudioEncoderConfig {
                    no_buffer: false,
                    packet_loss: Some(10),
                    ..Default::default()
                },
                ..Default::default()
            },
            lifecycle: LifecycleConfig::FixedDuration { secs: 60 },
            ..Default::default()
        }
    }

    /// Identity to join with, generating `Avatar-xxxxxxxx` when unset
    pub fn resolve_identity(&self) -> String {
        match &self.identity {
            Some(identity) if !identity.is_empty() => identity.clone(),
            _ => {
                let id = uuid::Uuid::new_v4().simple().to_string();
                format!("Avatar-{}", &id[..8])
            }
        }
    }
}

/// How raw media reaches the encoders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    /// Named pipes created by the bridge; video carries a dimension header
    #[default]
    Pipe,
    /// Static files handed to the encoder by path
    File,
}

/// Raw input configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InputConfig {
    pub mode: InputMode,
    /// Raw yuv420p video input
    pub video_path: PathBuf,
    /// Raw s16le PCM input
    pub audio_path: PathBuf,
    /// Geometry for inputs without a header (file mode)
    pub dimensions: Option<Dimensions>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            mode: InputMode::Pipe,
            video_path: PathBuf::from(DEFAULT_VIDEO_PIPE),
            audio_path: PathBuf::from(DEFAULT_AUDIO_PIPE),
            dimensions: None,
        }
    }
}

/// Encoder subprocess configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EncoderConfig {
    /// Transcoder binary
    pub program: String,
    /// Value passed to `-loglevel`
    pub log_level: String,
    pub video: VideoEncoderConfig,
    pub audio: AudioEncoderConfig,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            log_level: "warning".to_string(),
            video: VideoEncoderConfig::default(),
            audio: AudioEncoderConfig::default(),
        }
    }
}

/// H.264 codec implementation used by the transcoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VideoCodec {
    /// Software x264
    #[default]
    Libx264,
    /// NVIDIA NVENC
    H264Nvenc,
}

impl VideoCodec {
    pub fn encoder_name(&self) -> &'static str {
        match self {
            VideoCodec::Libx264 => "libx264",
            VideoCodec::H264Nvenc => "h264_nvenc",
        }
    }

    /// Lowest-latency preset and tune for this encoder
    pub fn low_latency_args(&self) -> [&'static str; 4] {
        match self {
            VideoCodec::Libx264 => ["-preset", "ultrafast", "-tune", "zerolatency"],
            VideoCodec::H264Nvenc => ["-preset", "p1", "-tune", "ll"],
        }
    }
}

/// Video encoder configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VideoEncoderConfig {
    pub codec: VideoCodec,
    /// Input frame rate
    pub fps: u32,
    /// Keyframe interval in frames
    pub gop: u32,
    /// Force a keyframe every N seconds
    pub force_keyframe_secs: Option<u32>,
}

impl Default for VideoEncoderConfig {
    fn default() -> Self {
        Self {
            codec: VideoCodec::default(),
            fps: VIDEO_FPS,
            gop: 25,
            force_keyframe_secs: None,
        }
    }
}

/// Audio encoder configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioEncoderConfig {
    /// Sample rate of the raw PCM input
    pub input_sample_rate: u32,
    /// Opus output rate required by the transport
    pub output_sample_rate: u32,
    /// Disable demuxer buffering and flush every packet
    pub no_buffer: bool,
    /// Expected packet loss percentage hint
    pub packet_loss: Option<u32>,
}

impl Default for AudioEncoderConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16000,
            output_sample_rate: 48000,
            no_buffer: true,
            packet_loss: None,
        }
    }
}

/// Frame-paced publisher configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PublisherConfig {
    /// Upper bound for one slice read from the compressed stream
    pub max_chunk_bytes: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_chunk_bytes: 64 * 1024,
        }
    }
}

/// Lifecycle policy as written in configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum LifecycleConfig {
    /// Stop after `absent_threshold` consecutive empty peer samples
    Presence {
        interval_ms: u64,
        absent_threshold: u32,
    },
    /// Stop after a fixed run time
    FixedDuration { secs: u64 },
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self::Presence {
            interval_ms: 1000,
            absent_threshold: 3,
        }
    }
}

impl LifecycleConfig {
    pub fn to_policy(&self) -> LifecyclePolicy {
        match *self {
            LifecycleConfig::Presence {
                interval_ms,
                absent_threshold,
            } => LifecyclePolicy::Presence {
                interval: Duration::from_millis(interval_ms),
                absent_threshold,
            },
            LifecycleConfig::FixedDuration { secs } => {
                LifecyclePolicy::FixedDuration(Duration::from_secs(secs))
            }
        }
    }
}

/// Session endpoint configuration
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Signaling endpoint, e.g. `http://0.0.0.0:7880`
    pub url: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    /// STUN server URLs offered to the peer connections
    pub stun_servers: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: "http://0.0.0.0:7880".to_string(),
            api_key: None,
            api_secret: None,
            stun_servers: vec![],
        }
    }
}

// Keep the secret out of logs.
impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("url", &self.url)
            .field("api_key", &self.api_key)
            .field("api_secret", &self.api_secret.as_ref().map(|_| "***"))
            .field("stun_servers", &self.stun_servers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_preset() {
        let config = BridgeConfig::live("lobby");
        assert_eq!(config.room, "lobby");
        assert_eq!(config.input.mode, InputMode::Pipe);
        assert_eq!(config.input.video_path, PathBuf::from(DEFAULT_VIDEO_PIPE));
        assert_eq!(config.encoder.video.gop, 25);
        assert!(config.encoder.audio.no_buffer);
        assert_eq!(
            config.lifecycle.to_policy(),
            LifecyclePolicy::Presence {
                interval: Duration::from_secs(1),
                absent_threshold: 3
            }
        );
    }

    #[test]
    fn test_file_preset() {
        let config = BridgeConfig::file();
        assert_eq!(config.room, DEFAULT_FILE_ROOM);
        assert_eq!(config.input.mode, InputMode::File);
        assert_eq!(config.input.dimensions, Some(Dimensions::new(512, 512)));
        assert_eq!(config.encoder.video.gop, 30);
        assert_eq!(config.encoder.video.force_keyframe_secs, Some(2));
        assert_eq!(config.encoder.audio.packet_loss, Some(10));
        assert_eq!(
            config.lifecycle.to_policy(),
            LifecyclePolicy::FixedDuration(Duration::from_secs(60))
        );
    }

    #[test]
    fn test_generated_identity() {
        let config = BridgeConfig::live("lobby");
        let identity = config.resolve_identity();
        assert!(identity.starts_with("Avatar-"));
        assert_eq!(identity.len(), "Avatar-".len() + 8);

        assert_eq!(BridgeConfig::file().resolve_identity(), DEFAULT_FILE_IDENTITY);
    }

    #[test]
    fn test_session_debug_hides_secret() {
        let session = SessionConfig {
            api_secret: Some("hunter2".into()),
            ..Default::default()
        };
        let printed = format!("{:?}", session);
        assert!(!printed.contains("hunter2"));
    }
}
