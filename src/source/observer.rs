//! Read-side observers
//!
//! Wrappers that watch bytes flowing through a reader without changing them:
//! a start-code scanner for diagnostics and a byte counter for statistics.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};
use tracing::debug;

use crate::media::MediaKind;

/// Length of a start code prefix found in a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartCode {
    /// `00 00 01`
    Short,
    /// `00 00 00 01`
    Long,
}

impl StartCode {
    pub fn len(&self) -> usize {
        match self {
            StartCode::Short => 3,
            StartCode::Long => 4,
        }
    }
}

/// Find Annex-B start codes in one buffer
///
/// Stateless: a code split across two buffers is not reported.
pub fn find_start_codes(buf: &[u8]) -> Vec<(usize, StartCode)> {
    let mut found = Vec::new();
    let mut i = 0;
    while i + 3 <= buf.len() {
        if buf[i] == 0 && buf[i + 1] == 0 {
            if buf[i + 2] == 1 {
                found.push((i, StartCode::Short));
                i += 3;
                continue;
            }
            if i + 4 <= buf.len() && buf[i + 2] == 0 && buf[i + 3] == 1 {
                found.push((i, StartCode::Long));
                i += 4;
                continue;
            }
        }
        i += 1;
    }
    found
}

/// Capability to watch each buffer returned by a read
pub trait FrameBoundaryObserver: Send {
    fn observe(&mut self, buf: &[u8]);
}

/// Logs every start code offset at debug level
pub struct StartCodeLogger {
    kind: MediaKind,
}

impl StartCodeLogger {
    pub fn new(kind: MediaKind) -> Self {
        Self { kind }
    }
}

impl FrameBoundaryObserver for StartCodeLogger {
    fn observe(&mut self, buf: &[u8]) {
        let mut previous = 0;
        for (offset, code) in find_start_codes(buf) {
            debug!(
                "[{}] start code ({} bytes) at offset {}, chunk {} bytes, read {} bytes",
                self.kind,
                code.len(),
                offset,
                offset - previous,
                buf.len()
            );
            previous = offset;
        }
    }
}

/// Reader wrapper that shows each read buffer to an observer
pub struct ObservedReader<R, O> {
    inner: R,
    observer: O,
}

impl<R, O> ObservedReader<R, O> {
    pub fn new(inner: R, observer: O) -> Self {
        Self { inner, observer }
    }
}

impl<R, O> AsyncRead for ObservedReader<R, O>
where
    R: AsyncRead + Unpin,
    O: FrameBoundaryObserver + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let result = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &result {
            let fresh = &buf.filled()[before..];
            if !fresh.is_empty() {
                this.observer.observe(fresh);
            }
        }
        result
    }
}

/// Shared count of bytes that passed a [`CountingReader`]
#[derive(Debug, Clone, Default)]
pub struct ByteCounter(Arc<AtomicU64>);

impl ByteCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Reader wrapper that counts bytes read
pub struct CountingReader<R> {
    inner: R,
    counter: ByteCounter,
}

impl<R> CountingReader<R> {
    pub fn new(inner: R, counter: ByteCounter) -> Self {
        Self { inner, counter }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for CountingReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let result = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &result {
            this.counter.add((buf.filled().len() - before) as u64);
        }
        result
    }
}
