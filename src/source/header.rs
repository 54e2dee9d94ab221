//! Raw video dimension header

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::info;

use crate::error::{BridgeError, Result};
use crate::media::Dimensions;

/// Size of the header preceding raw video frames
pub const VIDEO_HEADER_LEN: usize = 8;

/// Read the `u32 LE width, u32 LE height` header from a raw video channel
///
/// Consumes exactly eight bytes; everything after is pixel data.
pub async fn read_video_header<R>(reader: &mut R) -> Result<Dimensions>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let width = read_field(reader, "width").await?;
    let height = read_field(reader, "height").await?;

    if width == 0 || height == 0 {
        return Err(BridgeError::Header(format!(
            "invalid dimensions {}x{}",
            width, height
        )));
    }

    let dimensions = Dimensions::new(width, height);
    info!("Video dimensions from header: {}", dimensions);
    Ok(dimensions)
}

async fn read_field<R>(reader: &mut R, name: &str) -> Result<u32>
where
    R: AsyncRead + Unpin + ?Sized,
{
    reader.read_u32_le().await.map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => {
            BridgeError::Header(format!("stream closed before {} was read", name))
        }
        _ => BridgeError::Header(format!("failed to read {}: {}", name, e)),
    })
}

/// Encode a header, used by producers and tests
pub fn encode_video_header(dimensions: Dimensions) -> [u8; VIDEO_HEADER_LEN] {
    let mut header = [0u8; VIDEO_HEADER_LEN];
    header[..4].copy_from_slice(&dimensions.width.to_le_bytes());
    header[4..].copy_from_slice(&dimensions.height.to_le_bytes());
    header
}
