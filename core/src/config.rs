//! Host configuration and file locations
//!
//! Everything lives under `~/.asplay/`:
//! - `config.toml`: host settings (below)
//! - `comments.db`: the comment store
//! - `bridge.sock` / `viewer.sock`: host sockets
//!
//! ```toml
//! [comment_overlay]
//! realtime = false
//! archive = true
//!
//! [general]
//! host_loader = "bookmarklet"
//! post_comment = false
//! heartbeat_timeout_secs = 10
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};
use crate::relay::{AvailableFunctions, HostLoader, HEARTBEAT_TIMEOUT};
use crate::types::PageType;

/// Base directory for all asplay files.
pub fn asplay_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".asplay")
}

pub fn config_path() -> PathBuf {
    asplay_dir().join("config.toml")
}

pub fn database_path() -> PathBuf {
    asplay_dir().join("comments.db")
}

pub fn bridge_socket_path() -> PathBuf {
    asplay_dir().join("bridge.sock")
}

/// Whether captured comments are overlaid on the video, per page type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentOverlayConfig {
    #[serde(default)]
    pub realtime: bool,
    #[serde(default = "default_true")]
    pub archive: bool,
}

impl Default for CommentOverlayConfig {
    fn default() -> Self {
        Self {
            realtime: false,
            archive: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default)]
    pub host_loader: HostLoader,
    /// Whether the page supports posting comments
    #[serde(default)]
    pub post_comment: bool,
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            host_loader: HostLoader::default(),
            post_comment: false,
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_heartbeat_timeout_secs() -> u64 {
    HEARTBEAT_TIMEOUT.as_secs()
}

/// Host settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub comment_overlay: CommentOverlayConfig,
    #[serde(default)]
    pub general: GeneralConfig,
}

impl HostConfig {
    /// Load from `path`; a missing or unreadable file gives the defaults.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match Self::try_load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!("Ignoring config at {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    /// Load from `path`, failing on unreadable or invalid files.
    pub fn try_load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Render as the TOML written by `save`.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Whether new comments are overlaid on pages of this type.
    pub fn overlay_enabled(&self, page_type: PageType) -> bool {
        match page_type {
            PageType::RealtimePlayPage => self.comment_overlay.realtime,
            PageType::ArchivePlayPage => self.comment_overlay.archive,
            PageType::Unknown => false,
        }
    }

    pub fn available_functions(&self) -> AvailableFunctions {
        AvailableFunctions {
            post_comment: self.general.post_comment,
        }
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.general.heartbeat_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HostConfig::default();
        assert!(!config.overlay_enabled(PageType::RealtimePlayPage));
        assert!(config.overlay_enabled(PageType::ArchivePlayPage));
        assert!(!config.overlay_enabled(PageType::Unknown));
        assert_eq!(config.general.host_loader, HostLoader::Bookmarklet);
        assert_eq!(config.heartbeat_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: HostConfig = toml::from_str(
            r#"
            [comment_overlay]
            realtime = true

            [general]
            host_loader = "chrome_ext"
            "#,
        )
        .unwrap();

        assert!(config.comment_overlay.realtime);
        assert!(config.comment_overlay.archive);
        assert_eq!(config.general.host_loader, HostLoader::ChromeExt);
        assert!(!config.available_functions().post_comment);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = HostConfig::default();
        config.general.post_comment = true;
        config.save(&path).unwrap();

        assert_eq!(HostConfig::load(&path), config);
    }

    #[test]
    fn test_invalid_config_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "general = [").unwrap();

        assert!(HostConfig::try_load(&path).is_err());
        assert_eq!(HostConfig::load(&path), HostConfig::default());
        assert_eq!(HostConfig::load(&dir.path().join("missing.toml")), HostConfig::default());
    }
}
