//! Transcoder command lines

use std::fmt;

use crate::config::{AudioEncoderConfig, EncoderConfig, VideoEncoderConfig};
use crate::media::{Dimensions, MediaKind};

/// Program and arguments for one encoder subprocess
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderCommand {
    pub kind: MediaKind,
    pub program: String,
    pub args: Vec<String>,
}

impl EncoderCommand {
    pub fn new<I, S>(kind: MediaKind, program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind,
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Raw yuv420p in, low-latency baseline H.264 Annex-B on stdout
    pub fn video(config: &EncoderConfig, dimensions: Dimensions, input: &str) -> Self {
        let mut args = common_prefix(config);
        args.extend(video_args(&config.video, dimensions, input));
        Self::new(MediaKind::Video, &config.program, args)
    }

    /// Raw s16le mono PCM in, Ogg/Opus at the transport rate on stdout
    pub fn audio(config: &EncoderConfig, input: &str) -> Self {
        let mut args = common_prefix(config);
        args.extend(audio_args(&config.audio, input));
        Self::new(MediaKind::Audio, &config.program, args)
    }
}

impl fmt::Display for EncoderCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.program, self.args.join(" "))
    }
}

fn common_prefix(config: &EncoderConfig) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        config.log_level.clone(),
    ]
}

fn video_args(video: &VideoEncoderConfig, dimensions: Dimensions, input: &str) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-s".into(),
        dimensions.to_string(),
        "-r".into(),
        video.fps.to_string(),
        "-i".into(),
        input.to_string(),
        "-c:v".into(),
        video.codec.encoder_name().into(),
    ];
    args.extend(video.codec.low_latency_args().iter().map(|s| s.to_string()));
    args.extend([
        "-profile:v".into(),
        "baseline".into(),
        "-g".into(),
        video.gop.to_string(),
        "-keyint_min".into(),
        "1".into(),
    ]);
    if let Some(secs) = video.force_keyframe_secs {
        args.push("-force_key_frames".into());
        args.push(format!("expr:gte(t,n_forced*{})", secs));
    }
    args.extend(
        ["-bf", "0", "-max_delay", "0", "-bufsize", "0", "-f", "h264", "-"]
            .iter()
            .map(|s| s.to_string()),
    );
    args
}

fn audio_args(audio: &AudioEncoderConfig, input: &str) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    if audio.no_buffer {
        args.extend(["-fflags", "nobuffer", "-flush_packets", "1"].map(String::from));
    }
    args.extend([
        "-f".into(),
        "s16le".into(),
        "-ar".into(),
        audio.input_sample_rate.to_string(),
        "-ac".into(),
        "1".into(),
        "-i".into(),
        input.to_string(),
        "-c:a".into(),
        "libopus".into(),
        "-ar".into(),
        audio.output_sample_rate.to_string(),
        "-page_duration".into(),
        "20000".into(),
        "-application".into(),
        "voip".into(),
        "-frame_duration".into(),
        "20".into(),
    ]);
    if let Some(loss) = audio.packet_loss {
        args.push("-packet_loss".into());
        args.push(loss.to_string());
    }
    args.extend(["-bufsize", "0", "-f", "ogg", "-"].map(String::from));
    args
}
