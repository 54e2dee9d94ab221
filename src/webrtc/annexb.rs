//! H.264 Annex-B NAL unit reassembly
//!
//! The publisher slices the encoder output by read, not by codec syntax, so
//! a NAL unit may straddle any number of slices. The assembler buffers bytes
//! until the next start code proves a unit complete.

use bytes::{Buf, Bytes, BytesMut};

/// NAL unit types the video sink cares about
pub mod nal_type {
    pub const NON_IDR: u8 = 1;
    pub const IDR: u8 = 5;
    pub const SEI: u8 = 6;
    pub const SPS: u8 = 7;
    pub const PPS: u8 = 8;
    pub const AUD: u8 = 9;
    pub const FILLER: u8 = 12;
}

/// Type of a NAL unit given without its start code
pub fn nal_unit_type(nal: &[u8]) -> Option<u8> {
    nal.first().map(|header| header & 0x1F)
}

/// Locate the next start code at or after `from`
///
/// Returns `(position, length)`; a zero byte right before `00 00 01` makes
/// it a four-byte code.
fn find_start_code(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= buf.len() {
        if buf[i + 2] > 1 {
            i += 3;
            continue;
        }
        if buf[i] == 0 && buf[i + 1] == 0 && buf[i + 2] == 1 {
            if i > from && buf[i - 1] == 0 {
                return Some((i - 1, 4));
            }
            return Some((i, 3));
        }
        i += 1;
    }
    None
}

/// Incremental Annex-B splitter
#[derive(Debug, Default)]
pub struct NalAssembler {
    buf: BytesMut,
    /// Bytes after the leading start code already searched without a match
    searched: usize,
}

impl NalAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one slice; returns the NAL units it completed, without start codes
    pub fn push(&mut self, data: &[u8]) -> Vec<Bytes> {
        self.buf.extend_from_slice(data);
        let mut nals = Vec::new();

        loop {
            let Some((start, code_len)) = find_start_code(&self.buf, 0) else {
                // Not synced yet: keep only what could be a partial start code
                let keep = self.buf.len().min(3);
                let stale = self.buf.len() - keep;
                self.buf.advance(stale);
                self.searched = 0;
                break;
            };
            if start > 0 {
                self.buf.advance(start);
                self.searched = 0;
                continue;
            }

            // A start code may have been split across slices
            let from = code_len.max(self.searched.saturating_sub(4));
            match find_start_code(&self.buf, from) {
                Some((next, _)) => {
                    let unit = self.buf.split_to(next).freeze();
                    self.searched = 0;
                    let body = unit.slice(code_len..);
                    if !body.is_empty() {
                        nals.push(body);
                    }
                }
                None => {
                    self.searched = self.buf.len();
                    break;
                }
            }
        }

        nals
    }

    /// Take the trailing unit at end of stream
    pub fn flush(&mut self) -> Option<Bytes> {
        let (start, code_len) = find_start_code(&self.buf, 0)?;
        let unit = self.buf.split().freeze();
        self.searched = 0;
        let body = unit.slice(start + code_len..);
        (!body.is_empty()).then_some(body)
    }
}
