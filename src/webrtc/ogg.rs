//! Ogg page parsing for the Opus audio sink
//!
//! Pages arrive split across arbitrary slices. Packets are rebuilt from the
//! lacing values; a lacing value of 255 means the packet continues in the
//! next segment (possibly on the next page). CRCs are not verified.

use bytes::{Buf, Bytes, BytesMut};
use tracing::debug;

const CAPTURE_PATTERN: &[u8; 4] = b"OggS";
const PAGE_HEADER_LEN: usize = 27;
const HEADER_TYPE_CONTINUED: u8 = 0x01;

/// Opus identification header magic
pub const OPUS_HEAD: &[u8] = b"OpusHead";
/// Opus comment header magic
pub const OPUS_TAGS: &[u8] = b"OpusTags";

/// Whether `packet` is one of the Opus stream headers rather than audio
pub fn is_opus_header(packet: &[u8]) -> bool {
    packet.starts_with(OPUS_HEAD) || packet.starts_with(OPUS_TAGS)
}

/// Incremental Ogg demuxer yielding complete packets
#[derive(Debug, Default)]
pub struct OggPacketAssembler {
    buf: BytesMut,
    partial: BytesMut,
    pages: u64,
}

impl OggPacketAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one slice; returns the packets it completed
    pub fn push(&mut self, data: &[u8]) -> Vec<Bytes> {
        self.buf.extend_from_slice(data);
        let mut packets = Vec::new();
        while self.next_page(&mut packets) {}
        packets
    }

    /// Pages parsed so far
    pub fn pages(&self) -> u64 {
        self.pages
    }

    /// Parse one page from the buffer; false when more bytes are needed
    fn next_page(&mut self, packets: &mut Vec<Bytes>) -> bool {
        if !self.resync() || self.buf.len() < PAGE_HEADER_LEN {
            return false;
        }

        let header_type = self.buf[5];
        let segments = self.buf[26] as usize;
        let table_end = PAGE_HEADER_LEN + segments;
        if self.buf.len() < table_end {
            return false;
        }
        let body_len: usize = self.buf[PAGE_HEADER_LEN..table_end]
            .iter()
            .map(|&lace| lace as usize)
            .sum();
        if self.buf.len() < table_end + body_len {
            return false;
        }

        let page = self.buf.split_to(table_end + body_len).freeze();
        self.pages += 1;

        if header_type & HEADER_TYPE_CONTINUED == 0 && !self.partial.is_empty() {
            debug!("Dropping {} bytes of unterminated Ogg packet", self.partial.len());
            self.partial.clear();
        }

        let mut offset = table_end;
        for &lace in &page[PAGE_HEADER_LEN..table_end] {
            let end = offset + lace as usize;
            self.partial.extend_from_slice(&page[offset..end]);
            offset = end;
            if lace < 255 {
                let packet = self.partial.split().freeze();
                if !packet.is_empty() {
                    packets.push(packet);
                }
            }
        }
        true
    }

    /// Align the buffer on a capture pattern; false when none is buffered
    fn resync(&mut self) -> bool {
        if self.buf.starts_with(CAPTURE_PATTERN) {
            return true;
        }
        match self
            .buf
            .windows(CAPTURE_PATTERN.len())
            .position(|w| w == CAPTURE_PATTERN)
        {
            Some(pos) => {
                debug!("Skipping {} bytes before Ogg capture pattern", pos);
                self.buf.advance(pos);
                true
            }
            None => {
                // keep a possible partial capture pattern
                let keep = self.buf.len().min(CAPTURE_PATTERN.len() - 1);
                let stale = self.buf.len() - keep;
                self.buf.advance(stale);
                false
            }
        }
    }
}
