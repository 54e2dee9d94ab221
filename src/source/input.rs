//! Raw input acquisition
//!
//! Live mode creates two named pipes and blocks until a producer attaches;
//! file mode hands static files to the encoders by path.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use nix::sys::stat::Mode;
use tracing::{debug, info};

use super::header::read_video_header;
use crate::config::{InputConfig, InputMode};
use crate::error::{BridgeError, Result};
use crate::media::Dimensions;

/// What an encoder reads its raw media from
#[derive(Debug)]
pub enum RawInput {
    /// Open descriptor bound to the encoder's stdin
    Descriptor(std::fs::File),
    /// File the encoder opens itself
    Path(PathBuf),
    /// No input, stdin is `/dev/null`
    Null,
}

impl RawInput {
    /// Value for the encoder's `-i` flag
    pub fn input_arg(&self) -> String {
        match self {
            RawInput::Path(path) => path.display().to_string(),
            RawInput::Descriptor(_) | RawInput::Null => "pipe:0".to_string(),
        }
    }

    pub fn into_stdio(self) -> Stdio {
        match self {
            RawInput::Descriptor(file) => Stdio::from(file),
            RawInput::Path(_) | RawInput::Null => Stdio::null(),
        }
    }
}

/// Both raw inputs plus the video geometry
#[derive(Debug)]
pub struct RawInputs {
    pub video: RawInput,
    pub audio: RawInput,
    pub dimensions: Dimensions,
}

/// Acquire the raw inputs described by `config`
pub async fn open_inputs(config: &InputConfig) -> Result<RawInputs> {
    match config.mode {
        InputMode::Pipe => open_pipes(&config.video_path, &config.audio_path).await,
        InputMode::File => {
            let dimensions = config.dimensions.ok_or_else(|| {
                BridgeError::Config("File input requires explicit video dimensions".into())
            })?;
            open_files(&config.video_path, &config.audio_path, dimensions).await
        }
    }
}

async fn open_pipes(video_path: &Path, audio_path: &Path) -> Result<RawInputs> {
    create_fifo(video_path).await?;
    create_fifo(audio_path).await?;
    info!("Created video pipe at {}", video_path.display());
    info!("Created audio pipe at {}", audio_path.display());

    // Opening a FIFO read-only blocks until a writer attaches
    let mut video = open_fifo(video_path).await?;
    let audio = open_fifo(audio_path).await?;
    info!("Pipes opened, waiting for video header");

    let dimensions = read_video_header(&mut video).await?;

    Ok(RawInputs {
        video: RawInput::Descriptor(video.into_std().await),
        audio: RawInput::Descriptor(audio.into_std().await),
        dimensions,
    })
}

async fn open_files(
    video_path: &Path,
    audio_path: &Path,
    dimensions: Dimensions,
) -> Result<RawInputs> {
    for path in [video_path, audio_path] {
        tokio::fs::metadata(path).await.map_err(|e| {
            BridgeError::Config(format!("Input file {}: {}", path.display(), e))
        })?;
    }
    info!(
        "Streaming {} and {} at {}",
        video_path.display(),
        audio_path.display(),
        dimensions
    );

    Ok(RawInputs {
        video: RawInput::Path(video_path.to_path_buf()),
        audio: RawInput::Path(audio_path.to_path_buf()),
        dimensions,
    })
}

/// Create a named pipe at `path`, replacing whatever was there
pub async fn create_fifo(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed stale {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    nix::unistd::mkfifo(path, Mode::from_bits_truncate(0o666)).map_err(|e| {
        BridgeError::Io(std::io::Error::new(
            std::io::Error::from(e).kind(),
            format!("Failed to create pipe {}: {}", path.display(), e),
        ))
    })
}

async fn open_fifo(path: &Path) -> Result<tokio::fs::File> {
    tokio::fs::File::open(path).await.map_err(|e| {
        BridgeError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to open pipe {}: {}", path.display(), e),
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::header::encode_video_header;
    use std::io::Write;
    use std::os::unix::fs::FileTypeExt;

    #[tokio::test]
    async fn test_create_fifo_replaces_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("video_pipe.yuv");
        std::fs::write(&path, b"stale").unwrap();

        create_fifo(&path).await.unwrap();
        let meta = std::fs::metadata(&path).unwrap();
        assert!(meta.file_type().is_fifo());

        // second creation over an existing fifo also succeeds
        create_fifo(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_fifo_in_missing_dir() {
        let err = create_fifo(Path::new("/nonexistent-dir/pipe")).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_open_pipes_reads_header() {
        let dir = tempfile::tempdir().unwrap();
        let video_path = dir.path().join("video");
        let audio_path = dir.path().join("audio");
        let config = InputConfig {
            mode: InputMode::Pipe,
            video_path: video_path.clone(),
            audio_path: audio_path.clone(),
            dimensions: None,
        };

        let opener = tokio::spawn(async move { open_inputs(&config).await });

        // producer side: wait for the fifos, then attach writers
        let writer = tokio::task::spawn_blocking(move || {
            while !video_path.exists() || !audio_path.exists() {
                std::thread::sleep(std::time::Duration::from_millis(5));
            }
            let mut video = std::fs::OpenOptions::new()
                .write(true)
                .open(&video_path)
                .unwrap();
            let audio = std::fs::OpenOptions::new()
                .write(true)
                .open(&audio_path)
                .unwrap();
            video
                .write_all(&encode_video_header(Dimensions::new(320, 240)))
                .unwrap();
            (video, audio)
        });

        let inputs = opener.await.unwrap().unwrap();
        let _writers = writer.await.unwrap();
        assert_eq!(inputs.dimensions, Dimensions::new(320, 240));
        assert!(matches!(inputs.video, RawInput::Descriptor(_)));
        assert_eq!(inputs.audio.input_arg(), "pipe:0");
    }

    #[tokio::test]
    async fn test_open_files() {
        let dir = tempfile::tempdir().unwrap();
        let video_path = dir.path().join("video.i420");
        let audio_path = dir.path().join("audio.raw");
        std::fs::write(&video_path, b"").unwrap();
        std::fs::write(&audio_path, b"").unwrap();

        let config = InputConfig {
            mode: InputMode::File,
            video_path: video_path.clone(),
            audio_path,
            dimensions: Some(Dimensions::new(512, 512)),
        };
        let inputs = open_inputs(&config).await.unwrap();
        assert_eq!(inputs.dimensions, Dimensions::new(512, 512));
        assert_eq!(inputs.video.input_arg(), video_path.display().to_string());

        let missing = InputConfig {
            video_path: dir.path().join("nope.i420"),
            ..config
        };
        assert!(matches!(
            open_inputs(&missing).await,
            Err(BridgeError::Config(_))
        ));
    }
}
