//! Layered configuration loading
//!
//! Precedence, lowest first: variant preset, TOML file, CLI/environment
//! overrides applied by the binaries.

use std::path::Path;
use tracing::{debug, info};

use super::schema::{BridgeConfig, InputMode, LifecycleConfig};
use crate::error::{BridgeError, Result};

impl BridgeConfig {
    /// Overlay the TOML file at `path` (if any) onto this preset
    pub async fn with_file(self, path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(self);
        };

        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            BridgeError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        info!("Loaded configuration file {}", path.display());
        self.with_toml(&content)
    }

    /// Overlay a TOML document onto this preset
    pub fn with_toml(self, content: &str) -> Result<Self> {
        let overlay: toml::Value = toml::from_str(content)
            .map_err(|e| BridgeError::Config(format!("Invalid TOML: {}", e)))?;

        let mut base = toml::Value::try_from(&self)
            .map_err(|e| BridgeError::Config(format!("Failed to serialize preset: {}", e)))?;
        merge_values(&mut base, overlay);

        let merged: BridgeConfig = base
            .try_into()
            .map_err(|e| BridgeError::Config(format!("Invalid configuration: {}", e)))?;
        debug!("Merged configuration: {:?}", merged);
        Ok(merged)
    }

    /// Reject configurations the bridge cannot start with
    pub fn validate(&self) -> Result<()> {
        if self.room.trim().is_empty() {
            return Err(BridgeError::Config("Room name is required".into()));
        }
        if self.session.api_key.as_deref().unwrap_or("").is_empty()
            || self.session.api_secret.as_deref().unwrap_or("").is_empty()
        {
            return Err(BridgeError::Config(
                "Session API key and secret are required".into(),
            ));
        }
        if self.encoder.video.fps == 0 {
            return Err(BridgeError::Config("Video fps must be positive".into()));
        }
        if self.encoder.video.gop == 0 {
            return Err(BridgeError::Config("Keyframe interval must be positive".into()));
        }
        if self.publisher.max_chunk_bytes == 0 {
            return Err(BridgeError::Config("max_chunk_bytes must be positive".into()));
        }
        if let LifecycleConfig::Presence {
            interval_ms,
            absent_threshold,
        } = self.lifecycle
        {
            if interval_ms == 0 {
                return Err(BridgeError::Config(
                    "Presence interval_ms must be positive".into(),
                ));
            }
            if absent_threshold == 0 {
                return Err(BridgeError::Config(
                    "Presence absent_threshold must be positive".into(),
                ));
            }
        }
        if self.input.mode == InputMode::File && self.input.dimensions.is_none() {
            return Err(BridgeError::Config(
                "File input requires explicit video dimensions".into(),
            ));
        }
        Ok(())
    }
}

/// Recursively merge `overlay` into `base`; tables merge, everything else replaces
fn merge_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::VideoCodec;
    use crate::media::Dimensions;
    use std::io::Write;

    fn with_credentials(mut config: BridgeConfig) -> BridgeConfig {
        config.session.api_key = Some("key".into());
        config.session.api_secret = Some("secret".into());
        config
    }

    #[test]
    fn test_toml_overlay_keeps_preset_fields() {
        let config = BridgeConfig::file()
            .with_toml(
                r#"
                room = "studio"

                [encoder.video]
                codec = "h264_nvenc"

                [lifecycle]
                policy = "fixed_duration"
                secs = 5
                "#,
            )
            .unwrap();

        assert_eq!(config.room, "studio");
        assert_eq!(config.encoder.video.codec, VideoCodec::H264Nvenc);
        // untouched preset values survive the merge
        assert_eq!(config.encoder.video.gop, 30);
        assert_eq!(config.input.dimensions, Some(Dimensions::new(512, 512)));
        assert_eq!(config.lifecycle, LifecycleConfig::FixedDuration { secs: 5 });
    }

    #[test]
    fn test_toml_switches_lifecycle_policy() {
        let config = BridgeConfig::file()
            .with_toml(
                r#"
                [lifecycle]
                policy = "presence"
                interval_ms = 500
                absent_threshold = 4
                "#,
            )
            .unwrap();
        assert_eq!(
            config.lifecycle,
            LifecycleConfig::Presence {
                interval_ms: 500,
                absent_threshold: 4
            }
        );
    }

    #[test]
    fn test_invalid_toml() {
        let err = BridgeConfig::live("x").with_toml("room = [").unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[tokio::test]
    async fn test_with_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "diagnostics = true").unwrap();
        writeln!(file, "[session]").unwrap();
        writeln!(file, "url = \"http://127.0.0.1:9000\"").unwrap();

        let config = BridgeConfig::live("lobby")
            .with_file(Some(file.path()))
            .await
            .unwrap();
        assert!(config.diagnostics);
        assert_eq!(config.session.url, "http://127.0.0.1:9000");
        assert_eq!(config.room, "lobby");

        let missing = BridgeConfig::live("lobby")
            .with_file(Some(Path::new("/nonexistent/bridge.toml")))
            .await;
        assert!(missing.is_err());
    }

    #[test]
    fn test_validate() {
        assert!(BridgeConfig::live("lobby").validate().is_err());
        assert!(with_credentials(BridgeConfig::live("lobby")).validate().is_ok());
        assert!(with_credentials(BridgeConfig::live("  ")).validate().is_err());

        let mut file = with_credentials(BridgeConfig::file());
        assert!(file.validate().is_ok());
        file.input.dimensions = None;
        assert!(file.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_presence_values() {
        let mut config = with_credentials(BridgeConfig::live("lobby"));
        config.lifecycle = LifecycleConfig::Presence {
            interval_ms: 0,
            absent_threshold: 3,
        };
        assert!(matches!(config.validate(), Err(BridgeError::Config(_))));

        config.lifecycle = LifecycleConfig::Presence {
            interval_ms: 1000,
            absent_threshold: 0,
        };
        assert!(matches!(config.validate(), Err(BridgeError::Config(_))));

        // zero-second fixed runs stay allowed
        config.lifecycle = LifecycleConfig::FixedDuration { secs: 0 };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_with_zero_interval_fails_validation() {
        let config = with_credentials(BridgeConfig::live("lobby"))
            .with_toml(
                r#"
                [lifecycle]
                policy = "presence"
                interval_ms = 0
                absent_threshold = 3
                "#,
            )
            .unwrap();
        assert!(config.validate().is_err());
    }
}
