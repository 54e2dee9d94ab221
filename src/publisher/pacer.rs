//! Frame-paced delivery of a compressed byte stream

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::encoder::stream_error;
use crate::error::Result;
use crate::media::{MediaKind, TrackFrame};
use crate::transport::TrackSink;

/// Default upper bound for one slice
pub const DEFAULT_MAX_CHUNK: usize = 64 * 1024;

/// How a publisher finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The stream closed cleanly after `frames` deliveries
    EndOfStream { frames: u64 },
}

/// Slices a byte stream into fixed-duration frames and hands them to a
/// track sink no faster than one per nominal duration
///
/// A slice is whatever one read returns. Hand-offs are fixed-interval:
/// late frames are not caught up and nothing is skipped.
pub struct FramePacedPublisher {
    kind: MediaKind,
    sink: Arc<dyn TrackSink>,
    frame_duration: Duration,
    max_chunk: usize,
}

impl FramePacedPublisher {
    pub fn new(kind: MediaKind, sink: Arc<dyn TrackSink>, frame_duration: Duration) -> Self {
        Self {
            kind,
            sink,
            frame_duration,
            max_chunk: DEFAULT_MAX_CHUNK,
        }
    }

    pub fn with_max_chunk(mut self, max_chunk: usize) -> Self {
        self.max_chunk = max_chunk.max(1);
        self
    }

    /// Drain `stream` into the sink, calling `on_frame_complete` after each
    /// delivered frame
    ///
    /// Returns on clean end of stream. Read faults and sink failures are
    /// fatal to this publisher.
    pub async fn publish<R>(
        &self,
        stream: &mut R,
        on_frame_complete: &mut (dyn FnMut() + Send),
    ) -> Result<PublishOutcome>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; self.max_chunk];
        let mut last_delivery: Option<Instant> = None;
        let mut frames = 0u64;

        debug!(
            "[{}] Publishing with frame duration {:?}",
            self.kind.label(),
            self.frame_duration
        );

        loop {
            let n = match stream.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(stream_error(self.kind, e)),
            };

            if let Some(last) = last_delivery {
                tokio::time::sleep_until(last + self.frame_duration).await;
            }

            let frame = TrackFrame::new(Bytes::copy_from_slice(&buf[..n]), self.frame_duration);
            self.sink.write_frame(frame).await?;
            last_delivery = Some(Instant::now());
            frames += 1;
            on_frame_complete();
        }

        info!(
            "[{}] Stream ended after {} frames",
            self.kind.label(),
            frames
        );
        Ok(PublishOutcome::EndOfStream { frames })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use crate::media::Dimensions;
    use crate::publisher::TimingStats;
    use crate::source::{encode_video_header, read_video_header};
    use crate::transport::testing::RecordingSink;
    use std::io;

    fn publisher(kind: MediaKind) -> (FramePacedPublisher, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let publisher = FramePacedPublisher::new(kind, sink.clone(), kind.frame_duration());
        (publisher, sink)
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_faster_than_nominal() {
        let (publisher, sink) = publisher(MediaKind::Audio);
        // everything is available at once
        let data: Vec<u8> = (0..40u8).collect();
        let mut mock = tokio_test::io::Builder::new();
        for chunk in data.chunks(4) {
            mock.read(chunk);
        }
        let mut stream = mock.build();

        let mut calls = 0;
        let outcome = publisher
            .publish(&mut stream, &mut || calls += 1)
            .await
            .unwrap();

        assert_eq!(outcome, PublishOutcome::EndOfStream { frames: 10 });
        assert_eq!(calls, 10);

        let frames = sink.frames();
        assert_eq!(frames.len(), 10);
        let span = frames[9].0 - frames[0].0;
        assert!(span >= Duration::from_millis(20) * 9, "span {:?}", span);
        for pair in frames.windows(2) {
            assert!(pair[1].0 - pair[0].0 >= Duration::from_millis(20));
        }

        // bytes arrive unchanged and in order
        let delivered: Vec<u8> = frames.iter().flat_map(|(_, f)| f.data.to_vec()).collect();
        assert_eq!(delivered, data);
        assert!(frames
            .iter()
            .all(|(_, f)| f.duration == Duration::from_millis(20)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_header_and_ten_frames_end_to_end() {
        let (publisher, sink) = publisher(MediaKind::Video);
        let mut builder = tokio_test::io::Builder::new();
        builder.read(&encode_video_header(Dimensions::new(512, 512)));
        for i in 0..10u8 {
            builder.wait(Duration::from_millis(40));
            builder.read(&[0, 0, 0, 1, 0x65, i]);
        }
        let mut stream = builder.build();

        let dims = read_video_header(&mut stream).await.unwrap();
        assert_eq!(dims, Dimensions::new(512, 512));

        let mut stats = TimingStats::new(MediaKind::Video);
        let outcome = publisher
            .publish(&mut stream, &mut || stats.record())
            .await
            .unwrap();

        assert_eq!(outcome, PublishOutcome::EndOfStream { frames: 10 });
        assert_eq!(sink.frame_count(), 10);
        assert_eq!(stats.frames_delivered(), 10);
        assert_eq!(stats.count(), 9);
        assert!(stats.min().unwrap() >= Duration::from_millis(40));
        for pair in sink.frames().windows(2) {
            assert!(pair[1].0 - pair[0].0 >= Duration::from_millis(40));
        }
    }

    #[tokio::test]
    async fn test_read_error_is_fatal() {
        let (publisher, sink) = publisher(MediaKind::Audio);
        let mut stream = tokio_test::io::Builder::new()
            .read(b"OggS")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "gone"))
            .build();

        let err = publisher
            .publish(&mut stream, &mut || {})
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::StreamFault {
                kind: MediaKind::Audio,
                ..
            }
        ));
        assert_eq!(sink.frame_count(), 1);
    }

    #[tokio::test]
    async fn test_sink_failure_is_fatal() {
        let (publisher, sink) = publisher(MediaKind::Video);
        sink.close().await.unwrap();
        let mut stream: &[u8] = b"data";

        let err = publisher
            .publish(&mut stream, &mut || {})
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Transport(_)));
    }

    #[tokio::test]
    async fn test_chunk_cap() {
        let sink = Arc::new(RecordingSink::default());
        let publisher =
            FramePacedPublisher::new(MediaKind::Audio, sink.clone(), Duration::ZERO)
                .with_max_chunk(3);
        let mut stream: &[u8] = b"abcdefg";

        publisher.publish(&mut stream, &mut || {}).await.unwrap();
        let sizes: Vec<usize> = sink.frames().iter().map(|(_, f)| f.len()).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
    }
}
