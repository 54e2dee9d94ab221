//! External transcoder supervision
//!
//! One `ffmpeg` subprocess per media kind: raw media on stdin, compressed
//! codec output on stdout, stderr forwarded to the log.

mod args;
mod process;

pub use args::EncoderCommand;
pub use process::{stream_error, EncoderExit, EncoderOutput, EncoderProcess, UncleanExit};
