//! Raw frame sources
//!
//! Everything between the producer of uncompressed media and the encoders:
//! named pipe setup, the video dimension header, and the read-side
//! observers used for diagnostics and statistics.

pub mod header;
pub mod input;
pub mod observer;

pub use header::{encode_video_header, read_video_header, VIDEO_HEADER_LEN};
pub use input::{create_fifo, open_inputs, RawInput, RawInputs};
pub use observer::{
    find_start_codes, ByteCounter, CountingReader, FrameBoundaryObserver, ObservedReader,
    StartCode, StartCodeLogger,
};
