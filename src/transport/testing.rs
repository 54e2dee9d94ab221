//! In-memory transport used by the pipeline tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

use super::{PeerSet, TrackOptions, TrackSink, Transport};
use crate::error::{BridgeError, Result};
use crate::media::{MediaKind, TrackFrame};

/// Sink that records every frame with its hand-off instant
#[derive(Default)]
pub(crate) struct RecordingSink {
    frames: Mutex<Vec<(Instant, TrackFrame)>>,
    closed: AtomicBool,
    close_calls: AtomicUsize,
}

impl RecordingSink {
    pub fn frames(&self) -> Vec<(Instant, TrackFrame)> {
        self.frames.lock().clone()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TrackSink for RecordingSink {
    async fn write_frame(&self, frame: TrackFrame) -> Result<()> {
        if self.is_closed() {
            return Err(BridgeError::Transport("track closed".into()));
        }
        self.frames.lock().push((Instant::now(), frame));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Transport with scripted peer snapshots and recording sinks
///
/// Snapshots are consumed in order; the last one repeats forever.
pub(crate) struct FakeTransport {
    snapshots: Mutex<VecDeque<PeerSet>>,
    last: Mutex<PeerSet>,
    samples: AtomicUsize,
    sinks: Mutex<Vec<(MediaKind, TrackOptions, Arc<RecordingSink>)>>,
    disconnects: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Self::with_snapshots(vec![peers(&["viewer"])])
    }

    pub fn with_snapshots(snapshots: Vec<PeerSet>) -> Arc<Self> {
        Arc::new(Self {
            snapshots: Mutex::new(snapshots.into()),
            last: Mutex::new(PeerSet::new()),
            samples: AtomicUsize::new(0),
            sinks: Mutex::new(Vec::new()),
            disconnects: AtomicUsize::new(0),
        })
    }

    pub fn sink(&self, kind: MediaKind) -> Option<Arc<RecordingSink>> {
        self.sinks
            .lock()
            .iter()
            .find(|(k, _, _)| *k == kind)
            .map(|(_, _, sink)| sink.clone())
    }

    pub fn published(&self) -> Vec<(MediaKind, TrackOptions)> {
        self.sinks
            .lock()
            .iter()
            .map(|(kind, options, _)| (*kind, options.clone()))
            .collect()
    }

    pub fn samples(&self) -> usize {
        self.samples.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn publish_track(
        &self,
        kind: MediaKind,
        options: TrackOptions,
    ) -> Result<Arc<dyn TrackSink>> {
        let sink = Arc::new(RecordingSink::default());
        self.sinks.lock().push((kind, options, sink.clone()));
        Ok(sink)
    }

    async fn list_peers(&self) -> Result<PeerSet> {
        self.samples.fetch_add(1, Ordering::SeqCst);
        let next = self.snapshots.lock().pop_front();
        let mut last = self.last.lock();
        if let Some(snapshot) = next {
            *last = snapshot;
        }
        Ok(last.clone())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Build a peer set from identities
pub(crate) fn peers(identities: &[&str]) -> PeerSet {
    identities.iter().map(|s| s.to_string()).collect()
}
