//! Sample tracks fed by the frame-paced publisher
//!
//! `TrackLocalStaticSample` packetizes whole codec units, so each sink first
//! rebuilds those units from the publisher's time-sliced frames: NAL units
//! for H.264, Opus packets for Ogg.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::{debug, info, trace};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use super::annexb::{nal_type, nal_unit_type, NalAssembler};
use super::ogg::{is_opus_header, OggPacketAssembler};
use crate::error::{BridgeError, Result};
use crate::media::{MediaKind, TrackFrame};
use crate::transport::TrackSink;

/// H264 clock rate (always 90kHz per RFC 6184)
pub const H264_CLOCK_RATE: u32 = 90000;

/// Opus clock rate
pub const OPUS_CLOCK_RATE: u32 = 48000;

/// Codec capability announced for a media kind
pub fn codec_capability(kind: MediaKind) -> RTCRtpCodecCapability {
    match kind {
        MediaKind::Video => RTCRtpCodecCapability {
            mime_type: kind.mime_type().to_string(),
            clock_rate: H264_CLOCK_RATE,
            channels: 0,
            sdp_fmtp_line:
                "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
                    .to_string(),
            rtcp_feedback: vec![],
        },
        MediaKind::Audio => RTCRtpCodecCapability {
            mime_type: kind.mime_type().to_string(),
            clock_rate: OPUS_CLOCK_RATE,
            channels: 2,
            sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
            rtcp_feedback: vec![],
        },
    }
}

/// Turns time-sliced Annex-B bytes into per-NAL samples
///
/// AUD and filler units are dropped. SPS/PPS are cached and re-sent in
/// front of an IDR picture whose access unit did not carry them, since the
/// encoder only emits them at stream start. Only the last unit of a frame
/// carries the frame's duration; duration of frames that completed no unit
/// is carried forward.
#[derive(Debug, Default)]
pub struct H264SampleBuilder {
    assembler: NalAssembler,
    cached_sps: Option<Bytes>,
    cached_pps: Option<Bytes>,
    sent_sps: bool,
    sent_pps: bool,
    /// A VCL unit of the current access unit has been seen
    in_picture: bool,
    pending: Duration,
}

/// `first_mb_in_slice == 0`, i.e. the slice opens a new picture
///
/// The field is the first ue(v) after the NAL header, and a ue(v) of zero
/// is encoded as a single 1 bit.
fn starts_picture(nal: &[u8]) -> bool {
    nal.get(1).map_or(true, |b| b & 0x80 != 0)
}

impl H264SampleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8], duration: Duration) -> Vec<(Bytes, Duration)> {
        self.pending += duration;
        let mut units = Vec::new();
        for nal in self.assembler.push(data) {
            self.accept(nal, &mut units);
        }
        self.stamp(units)
    }

    /// Emit the unit still buffered at end of stream
    pub fn flush(&mut self) -> Vec<(Bytes, Duration)> {
        let mut units = Vec::new();
        if let Some(nal) = self.assembler.flush() {
            self.accept(nal, &mut units);
        }
        self.stamp(units)
    }

    fn end_picture(&mut self) {
        if self.in_picture {
            self.in_picture = false;
            self.sent_sps = false;
            self.sent_pps = false;
        }
    }

    fn accept(&mut self, nal: Bytes, units: &mut Vec<Bytes>) {
        let Some(kind) = nal_unit_type(&nal) else {
            return;
        };
        match kind {
            nal_type::AUD => {
                self.end_picture();
                return;
            }
            nal_type::FILLER => return,
            nal_type::SPS => {
                self.end_picture();
                self.cached_sps = Some(nal.clone());
                self.sent_sps = true;
            }
            nal_type::PPS => {
                self.end_picture();
                self.cached_pps = Some(nal.clone());
                self.sent_pps = true;
            }
            nal_type::SEI => self.end_picture(),
            nal_type::IDR | nal_type::NON_IDR if starts_picture(&nal) => {
                self.end_picture();
                if kind == nal_type::IDR {
                    self.inject_parameter_sets(units);
                }
                self.in_picture = true;
            }
            _ => {}
        }
        trace!("NAL type={} size={} bytes", kind, nal.len());
        units.push(nal);
    }

    fn inject_parameter_sets(&mut self, units: &mut Vec<Bytes>) {
        if !self.sent_sps {
            if let Some(sps) = self.cached_sps.clone() {
                debug!("Injecting cached SPS before IDR frame");
                units.push(sps);
                self.sent_sps = true;
            }
        }
        if !self.sent_pps {
            if let Some(pps) = self.cached_pps.clone() {
                debug!("Injecting cached PPS before IDR frame");
                units.push(pps);
                self.sent_pps = true;
            }
        }
    }

    fn stamp(&mut self, units: Vec<Bytes>) -> Vec<(Bytes, Duration)> {
        let count = units.len();
        units
            .into_iter()
            .enumerate()
            .map(|(i, unit)| {
                let duration = if i + 1 == count {
                    std::mem::take(&mut self.pending)
                } else {
                    Duration::ZERO
                };
                (unit, duration)
            })
            .collect()
    }
}

/// Turns time-sliced Ogg pages into Opus packet samples
#[derive(Debug)]
pub struct OpusSampleBuilder {
    assembler: OggPacketAssembler,
    packet_duration: Duration,
}

impl OpusSampleBuilder {
    pub fn new(packet_duration: Duration) -> Self {
        Self {
            assembler: OggPacketAssembler::new(),
            packet_duration,
        }
    }

    pub fn push(&mut self, data: &[u8]) -> Vec<(Bytes, Duration)> {
        self.assembler
            .push(data)
            .into_iter()
            .filter(|packet| !is_opus_header(packet))
            .map(|packet| (packet, self.packet_duration))
            .collect()
    }
}

/// Per-sink counters
#[derive(Debug, Default)]
struct SinkCounters {
    frames: AtomicU64,
    samples: AtomicU64,
    bytes: AtomicU64,
}

/// State shared by both sample sinks
struct SampleTrack {
    kind: MediaKind,
    track: Arc<TrackLocalStaticSample>,
    closed: AtomicBool,
    counters: SinkCounters,
}

impl SampleTrack {
    fn new(kind: MediaKind, track_id: &str, stream_id: &str) -> Self {
        let track = Arc::new(TrackLocalStaticSample::new(
            codec_capability(kind),
            track_id.to_string(),
            stream_id.to_string(),
        ));
        Self {
            kind,
            track,
            closed: AtomicBool::new(false),
            counters: SinkCounters::default(),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BridgeError::Transport(format!("{} track closed", self.kind)));
        }
        Ok(())
    }

    async fn write_samples(&self, samples: Vec<(Bytes, Duration)>) {
        self.counters.frames.fetch_add(1, Ordering::Relaxed);
        for (data, duration) in samples {
            let len = data.len() as u64;
            let sample = Sample {
                data,
                duration,
                ..Default::default()
            };
            // Fails only while no peer is bound; the frame is simply dropped.
            if let Err(e) = self.track.write_sample(&sample).await {
                let samples = self.counters.samples.load(Ordering::Relaxed);
                if samples % 100 == 0 {
                    debug!("[{}] Write sample failed (no peer?): {}", self.kind, e);
                }
            }
            self.counters.samples.fetch_add(1, Ordering::Relaxed);
            self.counters.bytes.fetch_add(len, Ordering::Relaxed);
        }
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!(
                "{} track closed after {} frames, {} samples, {} bytes",
                self.kind.label(),
                self.counters.frames.load(Ordering::Relaxed),
                self.counters.samples.load(Ordering::Relaxed),
                self.counters.bytes.load(Ordering::Relaxed)
            );
        }
    }
}

/// H.264 sink writing one sample per NAL unit
pub struct H264SampleSink {
    inner: SampleTrack,
    builder: Mutex<H264SampleBuilder>,
}

impl H264SampleSink {
    pub fn new(track_id: &str, stream_id: &str) -> Self {
        Self {
            inner: SampleTrack::new(MediaKind::Video, track_id, stream_id),
            builder: Mutex::new(H264SampleBuilder::new()),
        }
    }

    /// Track to bind to peer connections
    pub fn track_local(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.inner.track.clone()
    }

    pub fn samples_written(&self) -> u64 {
        self.inner.counters.samples.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TrackSink for H264SampleSink {
    async fn write_frame(&self, frame: TrackFrame) -> Result<()> {
        self.inner.ensure_open()?;
        let samples = self.builder.lock().await.push(&frame.data, frame.duration);
        self.inner.write_samples(samples).await;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.inner.ensure_open().is_ok() {
            let samples = self.builder.lock().await.flush();
            if !samples.is_empty() {
                self.inner.write_samples(samples).await;
            }
        }
        self.inner.close();
        Ok(())
    }
}

/// Opus sink writing one sample per packet
pub struct OpusSampleSink {
    inner: SampleTrack,
    builder: Mutex<OpusSampleBuilder>,
}

impl OpusSampleSink {
    pub fn new(track_id: &str, stream_id: &str, packet_duration: Duration) -> Self {
        Self {
            inner: SampleTrack::new(MediaKind::Audio, track_id, stream_id),
            builder: Mutex::new(OpusSampleBuilder::new(packet_duration)),
        }
    }

    pub fn track_local(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.inner.track.clone()
    }

    pub fn samples_written(&self) -> u64 {
        self.inner.counters.samples.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TrackSink for OpusSampleSink {
    async fn write_frame(&self, frame: TrackFrame) -> Result<()> {
        self.inner.ensure_open()?;
        let samples = self.builder.lock().await.push(&frame.data);
        self.inner.write_samples(samples).await;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.inner.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webrtc::ogg::tests::page;

    const FRAME: Duration = Duration::from_millis(40);

    fn types(samples: &[(Bytes, Duration)]) -> Vec<u8> {
        samples.iter().map(|(b, _)| b[0] & 0x1F).collect()
    }

    #[test]
    fn test_skips_aud_and_filler() {
        let mut builder = H264SampleBuilder::new();
        let data = [
            0, 0, 0, 1, 0x09, 0xF0, // AUD
            0, 0, 0, 1, 0x67, 0x42, // SPS
            0, 0, 0, 1, 0x68, 0xCE, // PPS
            0, 0, 0, 1, 0x0C, 0xFF, // filler
            0, 0, 0, 1, 0x65, 0x88, // IDR
            0, 0, 0, 1, 0x41, // next unit, incomplete
        ];
        let samples = builder.push(&data, FRAME);
        assert_eq!(types(&samples), vec![7, 8, 5]);

        // only the last unit carries the frame duration
        let durations: Vec<Duration> = samples.iter().map(|(_, d)| *d).collect();
        assert_eq!(durations, vec![Duration::ZERO, Duration::ZERO, FRAME]);
    }

    #[test]
    fn test_injects_parameter_sets_before_later_idr() {
        let mut builder = H264SampleBuilder::new();
        builder.push(
            &[0, 0, 0, 1, 0x67, 0x42, 0, 0, 0, 1, 0x68, 0xCE, 0, 0, 0, 1, 0x65, 0x88],
            FRAME,
        );
        builder.push(&[0, 0, 0, 1, 0x41, 0x9A], FRAME);
        let samples = builder.push(&[0, 0, 0, 1, 0x65, 0x99, 0, 0, 0, 1], FRAME);

        // first push completed SPS+PPS, second the first IDR, third the P slice
        // and the second IDR which gets SPS/PPS re-injected
        assert_eq!(types(&samples), vec![1, 7, 8, 5]);
        assert_eq!(&samples[1].0[..], &[0x67, 0x42]);
        assert_eq!(&samples[2].0[..], &[0x68, 0xCE]);
    }

    #[test]
    fn test_multi_slice_idr_gets_parameter_sets_once() {
        let mut builder = H264SampleBuilder::new();
        let data = [
            0, 0, 0, 1, 0x67, 0x42, // SPS
            0, 0, 0, 1, 0x68, 0xCE, // PPS
            0, 0, 0, 1, 0x65, 0x88, // IDR, first_mb_in_slice == 0
            0, 0, 0, 1, 0x65, 0x40, // IDR, same picture
            0, 0, 0, 1, 0x41, 0x9A, // P
            0, 0, 0, 1, 0x65, 0x88, // next IDR picture
            0, 0, 0, 1, 0x65, 0x40, // and its second slice
            0, 0, 0, 1,
        ];
        let samples = builder.push(&data, FRAME);
        assert_eq!(types(&samples), vec![7, 8, 5, 5, 1, 7, 8, 5, 5]);
    }

    #[test]
    fn test_flush_emits_trailing_unit() {
        let mut builder = H264SampleBuilder::new();
        assert!(builder.push(&[0, 0, 0, 1, 0x41, 0x9A], FRAME).is_empty());
        let samples = builder.flush();
        assert_eq!(types(&samples), vec![1]);
        assert_eq!(samples[0].1, FRAME);
        assert!(builder.flush().is_empty());
    }

    #[test]
    fn test_duration_carried_over_empty_frames() {
        let mut builder = H264SampleBuilder::new();
        assert!(builder.push(&[0, 0, 0, 1, 0x41, 0x01], FRAME).is_empty());
        assert!(builder.push(&[0x02, 0x03], FRAME).is_empty());
        let samples = builder.push(&[0, 0, 0, 1], FRAME);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].1, FRAME * 3);
    }

    #[test]
    fn test_opus_builder_skips_headers() {
        let mut data = page(0x02, &[8], b"OpusHead");
        data.extend(page(0, &[8], b"OpusTags"));
        data.extend(page(0, &[2, 2], &[0xFC, 0x01, 0xFC, 0x02]));

        let mut builder = OpusSampleBuilder::new(Duration::from_millis(20));
        let (head, tail) = data.split_at(30);
        let mut samples = builder.push(head);
        samples.extend(builder.push(tail));

        assert_eq!(samples.len(), 2);
        assert!(samples
            .iter()
            .all(|(_, d)| *d == Duration::from_millis(20)));
        assert_eq!(&samples[1].0[..], &[0xFC, 0x02]);
    }

    #[tokio::test]
    async fn test_close_writes_last_nal() {
        let sink = H264SampleSink::new("video", "avatar");
        let frame = TrackFrame::new(
            Bytes::from_static(&[0, 0, 0, 1, 0x67, 0x42, 0, 0, 0, 1, 0x68, 0xCE, 0, 0, 0, 1, 0x65]),
            FRAME,
        );
        sink.write_frame(frame).await.unwrap();
        assert_eq!(sink.samples_written(), 2);

        sink.close().await.unwrap();
        assert_eq!(sink.samples_written(), 3);
        sink.close().await.unwrap();
        assert_eq!(sink.samples_written(), 3);
    }

    #[tokio::test]
    async fn test_sink_without_peers() {
        let sink = H264SampleSink::new("video", "avatar");
        let frame = TrackFrame::new(
            Bytes::from_static(&[0, 0, 0, 1, 0x67, 0x42, 0, 0, 0, 1, 0x68, 0xCE, 0, 0, 0, 1]),
            FRAME,
        );
        sink.write_frame(frame.clone()).await.unwrap();
        assert_eq!(sink.samples_written(), 2);

        sink.close().await.unwrap();
        sink.close().await.unwrap();
        assert!(matches!(
            sink.write_frame(frame).await,
            Err(BridgeError::Transport(_))
        ));
    }
}
