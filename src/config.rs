// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Provides sensible defaults if config file is missing or has errors.

use anyhow::{Context, Result};
use glam::{UVec2, Vec4};
use serde::Deserialize;
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub app: AppConfig,
    pub window: WindowMode,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
}

/// Application identity, forwarded to the Vulkan instance
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
    pub version: Version,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "App".to_string(),
            version: Version::new(0, 0, 1),
        }
    }
}

/// `[major, minor, patch]` in TOML
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "[u32; 3]")]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    pub fn to_vk(self) -> u32 {
        ash::vk::make_api_version(0, self.major, self.minor, self.patch)
    }
}

impl From<[u32; 3]> for Version {
    fn from([major, minor, patch]: [u32; 3]) -> Self {
        Self { major, minor, patch }
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// How the window is placed on screen
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum WindowMode {
    Windowed(WindowedMode),
    Fullscreen(FullscreenMode),
}

impl Default for WindowMode {
    fn default() -> Self {
        WindowMode::Fullscreen(FullscreenMode::default())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WindowedMode {
    pub size: UVec2,
    pub resizable: bool,
    /// Keep the window above all others
    pub floating: bool,
}

impl Default for WindowedMode {
    fn default() -> Self {
        Self {
            size: UVec2::new(800, 800),
            resizable: false,
            floating: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FullscreenMode {
    pub monitor: usize,
}

impl FullscreenMode {
    /// Clamp the configured monitor into `[0, monitor_count - 1]`.
    /// Returns `None` when no monitor is connected.
    pub fn resolve_monitor(&self, monitor_count: usize) -> Option<usize> {
        if monitor_count == 0 {
            return None;
        }
        Some(self.monitor.min(monitor_count - 1))
    }
}

/// Graphics settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub clear_color: Vec4,
    /// Upper bound on every fence wait. Absent means wait forever.
    pub fence_timeout_ms: Option<u64>,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            clear_color: Vec4::new(0.1, 0.2, 0.8, 1.0),
            fence_timeout_ms: None,
        }
    }
}

impl GraphicsConfig {
    /// Fence/acquire timeout in nanoseconds, as Vulkan expects it
    pub fn fence_timeout_ns(&self) -> u64 {
        match self.fence_timeout_ms {
            Some(ms) => ms.saturating_mul(1_000_000),
            None => u64::MAX,
        }
    }
}

/// Debug settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_to_file: false,
            log_file: "vulkan_debug.log".to_string(),
            show_fps: true,
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.app.name, "App");
        assert_eq!(config.app.version, Version::new(0, 0, 1));
        assert_eq!(config.window, WindowMode::Fullscreen(FullscreenMode { monitor: 0 }));
        assert_eq!(config.graphics.fence_timeout_ns(), u64::MAX);
    }

    #[test]
    fn parses_windowed_mode() {
        let config = Config::parse(
            r#"
            [app]
            name = "Clear"
            version = [1, 2, 3]

            [window]
            mode = "windowed"
            size = [1280, 720]
            resizable = true
            "#,
        )
        .unwrap();

        assert_eq!(config.app.version.to_string(), "1.2.3");
        match config.window {
            WindowMode::Windowed(mode) => {
                assert_eq!(mode.size, UVec2::new(1280, 720));
                assert!(mode.resizable);
                assert!(!mode.floating);
            }
            other => panic!("expected windowed mode, got {:?}", other),
        }
    }

    #[test]
    fn parses_fullscreen_mode_and_timeout() {
        let config = Config::parse(
            r#"
            [window]
            mode = "fullscreen"
            monitor = 3

            [graphics]
            clear_color = [0.0, 0.0, 0.0, 1.0]
            fence_timeout_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.window, WindowMode::Fullscreen(FullscreenMode { monitor: 3 }));
        assert_eq!(config.graphics.clear_color, Vec4::new(0.0, 0.0, 0.0, 1.0));
        assert_eq!(config.graphics.fence_timeout_ns(), 250_000_000);
    }

    #[test]
    fn unknown_window_mode_is_rejected() {
        assert!(Config::parse("[window]\nmode = \"borderless\"\n").is_err());
    }

    #[test]
    fn load_reports_bad_files_and_defaults_missing_ones() {
        let dir = std::env::temp_dir().join(format!("vk-present-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let missing = Config::load_from_path(dir.join("absent.toml")).unwrap();
        assert_eq!(missing.app.name, "App");

        // A typo must surface as an error for the caller to log, not as silent defaults
        let broken = dir.join("broken.toml");
        std::fs::write(&broken, "[window]\nmode = \"windowd\"\n").unwrap();
        let err = Config::load_from_path(&broken).unwrap_err();
        assert!(format!("{:#}", err).contains("broken.toml"));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn monitor_index_is_clamped() {
        let mode = FullscreenMode { monitor: 5 };
        assert_eq!(mode.resolve_monitor(2), Some(1));
        assert_eq!(mode.resolve_monitor(8), Some(5));
        assert_eq!(mode.resolve_monitor(0), None);
        assert_eq!(FullscreenMode { monitor: 0 }.resolve_monitor(1), Some(0));
    }
}
