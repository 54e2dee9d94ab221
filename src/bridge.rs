//! Bridge orchestration
//!
//! Wires one pipeline per media kind (raw input, encoder, frame-paced
//! publisher, track sink) and a lifecycle controller, then tears everything
//! down when any of them asks for it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;
use crate::encoder::{EncoderCommand, EncoderOutput, EncoderProcess};
use crate::error::{BridgeError, Result};
use crate::lifecycle::{run_lifecycle, ShutdownReason};
use crate::media::{Dimensions, MediaKind};
use crate::publisher::{CadenceTracker, FramePacedPublisher, PublishOutcome, TimingStats};
use crate::source::{
    open_inputs, ByteCounter, CountingReader, ObservedReader, RawInputs, StartCodeLogger,
};
use crate::transport::{TrackOptions, TrackSink, Transport};
use crate::webrtc::WebRtcRoom;

/// How long publisher tasks get to finish after the encoders are killed
pub const TEARDOWN_GRACE: Duration = Duration::from_secs(5);

type PipelineResult = (MediaKind, Result<PublishOutcome>, TimingStats);

/// Summary of a bridge run that ended without a fatal error
#[derive(Debug)]
pub struct BridgeReport {
    pub reason: ShutdownReason,
    pub video: TimingStats,
    pub audio: TimingStats,
}

/// The audio/video bridge
pub struct Bridge {
    config: BridgeConfig,
    transport: Arc<dyn Transport>,
    commands: Option<(EncoderCommand, EncoderCommand)>,
}

impl Bridge {
    pub fn new(config: BridgeConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            commands: None,
        }
    }

    /// Run these commands instead of the ones derived from configuration
    pub fn with_commands(mut self, video: EncoderCommand, audio: EncoderCommand) -> Self {
        self.commands = Some((video, audio));
        self
    }

    /// Run until the lifecycle controller, `shutdown` or a failing pipeline
    /// stops the bridge
    pub async fn run(self, inputs: RawInputs, shutdown: CancellationToken) -> Result<BridgeReport> {
        let RawInputs {
            video,
            audio,
            dimensions,
        } = inputs;

        let (video_cmd, audio_cmd) = match self.commands.clone() {
            Some(commands) => commands,
            None => (
                EncoderCommand::video(&self.config.encoder, dimensions, &video.input_arg()),
                EncoderCommand::audio(&self.config.encoder, &audio.input_arg()),
            ),
        };

        let (mut video_enc, video_out) = match EncoderProcess::start(&video_cmd, video) {
            Ok(started) => started,
            Err(e) => {
                self.disconnect_quietly().await;
                return Err(e);
            }
        };
        let (mut audio_enc, audio_out) = match EncoderProcess::start(&audio_cmd, audio) {
            Ok(started) => started,
            Err(e) => {
                video_enc.terminate();
                self.disconnect_quietly().await;
                return Err(e);
            }
        };

        let sinks = match self.publish_tracks(dimensions).await {
            Ok(sinks) => sinks,
            Err(e) => {
                video_enc.terminate();
                audio_enc.terminate();
                self.disconnect_quietly().await;
                return Err(e);
            }
        };

        let max_chunk = self.config.publisher.max_chunk_bytes;
        let mut pipelines = JoinSet::new();
        for (kind, output) in [(MediaKind::Video, video_out), (MediaKind::Audio, audio_out)] {
            let sink = sinks[&kind].clone();
            let diagnostics = self.config.diagnostics && kind == MediaKind::Video;
            pipelines.spawn(run_pipeline(kind, output, sink, max_chunk, diagnostics));
        }

        let policy = self.config.lifecycle.to_policy();
        let transport = self.transport.clone();
        let token = shutdown.clone();
        let lifecycle =
            tokio::spawn(async move { run_lifecycle(policy, transport.as_ref(), token).await });

        info!("Bridge running in room '{}'", self.config.room);

        let mut stats: HashMap<MediaKind, TimingStats> = HashMap::new();
        let mut first_error: Option<BridgeError> = None;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                joined = pipelines.join_next(), if !pipelines.is_empty() => {
                    let Some(joined) = joined else { continue };
                    match joined {
                        Ok((kind, Ok(outcome), timing)) => {
                            debug!("{} pipeline finished: {:?}", kind, outcome);
                            stats.insert(kind, timing);
                        }
                        Ok((kind, Err(e), timing)) => {
                            error!("{} pipeline failed: {}", kind, e);
                            stats.insert(kind, timing);
                            first_error = Some(e);
                            shutdown.cancel();
                            break;
                        }
                        Err(e) => {
                            error!("Pipeline task failed: {}", e);
                            first_error = Some(BridgeError::Io(e.into()));
                            shutdown.cancel();
                            break;
                        }
                    }
                }
            }
        }

        info!("Shutting down bridge");

        // Killing the encoders releases blocked reads
        video_enc.terminate();
        audio_enc.terminate();

        let drained = tokio::time::timeout(TEARDOWN_GRACE, async {
            while let Some(joined) = pipelines.join_next().await {
                match joined {
                    Ok((kind, result, timing)) => {
                        if let Err(e) = result {
                            warn!("{} pipeline failed during teardown: {}", kind, e);
                        }
                        stats.insert(kind, timing);
                    }
                    Err(e) => warn!("Pipeline task failed during teardown: {}", e),
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                "Publishers still running after {:?}, aborting",
                TEARDOWN_GRACE
            );
            pipelines.abort_all();
            while pipelines.join_next().await.is_some() {}
        }

        for (kind, sink) in &sinks {
            if let Err(e) = sink.close().await {
                warn!("Failed to close {} track: {}", kind, e);
            }
        }
        self.disconnect_quietly().await;

        video_enc.wait().await;
        audio_enc.wait().await;

        let reason = lifecycle.await.unwrap_or_else(|e| {
            warn!("Lifecycle task failed: {}", e);
            ShutdownReason::Cancelled
        });

        let video = stats
            .remove(&MediaKind::Video)
            .unwrap_or_else(|| TimingStats::new(MediaKind::Video));
        let audio = stats
            .remove(&MediaKind::Audio)
            .unwrap_or_else(|| TimingStats::new(MediaKind::Audio));
        video.log_summary();
        audio.log_summary();

        match first_error {
            Some(e) => Err(e),
            None => {
                info!("Bridge stopped: {}", reason);
                Ok(BridgeReport {
                    reason,
                    video,
                    audio,
                })
            }
        }
    }

    async fn publish_tracks(
        &self,
        dimensions: Dimensions,
    ) -> Result<HashMap<MediaKind, Arc<dyn TrackSink>>> {
        let mut sinks = HashMap::new();
        let audio = self
            .transport
            .publish_track(MediaKind::Audio, TrackOptions::audio())
            .await?;
        sinks.insert(MediaKind::Audio, audio);
        let video = self
            .transport
            .publish_track(MediaKind::Video, TrackOptions::video(dimensions))
            .await?;
        sinks.insert(MediaKind::Video, video);
        Ok(sinks)
    }

    async fn disconnect_quietly(&self) {
        if let Err(e) = self.transport.disconnect().await {
            warn!("Failed to disconnect: {}", e);
        }
    }
}

/// Acquire the inputs, open the room and run the bridge until it stops
pub async fn launch(config: BridgeConfig, shutdown: CancellationToken) -> Result<BridgeReport> {
    config.validate()?;
    let identity = config.resolve_identity();

    let inputs = open_inputs(&config.input).await?;
    info!(
        "Raw inputs ready, video {} ({:?})",
        inputs.dimensions, config.input.mode
    );

    let room = WebRtcRoom::connect(&config.session, &config.room, &identity).await?;
    Bridge::new(config, room).run(inputs, shutdown).await
}

async fn run_pipeline(
    kind: MediaKind,
    output: EncoderOutput,
    sink: Arc<dyn TrackSink>,
    max_chunk: usize,
    diagnostics: bool,
) -> PipelineResult {
    let bytes = ByteCounter::new();
    let counted = CountingReader::new(output, bytes.clone());
    let mut reader: Box<dyn AsyncRead + Unpin + Send> = if diagnostics {
        Box::new(ObservedReader::new(counted, StartCodeLogger::new(kind)))
    } else {
        Box::new(counted)
    };

    let publisher =
        FramePacedPublisher::new(kind, sink, kind.frame_duration()).with_max_chunk(max_chunk);
    let mut tracker = CadenceTracker::new(kind, bytes);
    let result = {
        let mut on_frame = || tracker.record();
        publisher.publish(&mut *reader, &mut on_frame).await
    };
    (kind, result, tracker.into_stats())
}
