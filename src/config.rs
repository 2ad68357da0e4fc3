// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section is optional; missing keys fall back to the defaults below.
// The frame, upload and retry types never read the file themselves, they
// are built from it here.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::frame::{RetryPolicy, SchedulerConfig, UploaderConfig};

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub scheduler: SchedulerSection,
    pub upload: UploadSection,
    pub stereo: StereoSection,
    pub debug: DebugConfig,
    pub sample: SampleConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Frame Scheduler".to_string(),
            width: 1280,
            height: 720,
            fullscreen: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub clear_color: [f32; 4],
    /// 0 presents immediately, 1 waits for one vertical blank.
    pub vsync_interval: u32,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "fifo".to_string(),
            clear_color: [0.1, 0.2, 0.8, 1.0],
            vsync_interval: 1,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    /// Bound on every fence wait; 0 waits forever.
    pub wait_timeout_ms: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self { wait_timeout_ms: 5000 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct UploadSection {
    pub queue_capacity: usize,
    /// Use a second queue for uploads when the device exposes one.
    pub dedicated_queue: bool,
}

impl Default for UploadSection {
    fn default() -> Self {
        Self {
            queue_capacity: 16,
            dedicated_queue: true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StereoSection {
    pub enabled: bool,
    pub eye_width: u32,
    pub eye_height: u32,
    pub render_model_attempts: u32,
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
}

impl Default for StereoSection {
    fn default() -> Self {
        Self {
            enabled: false,
            eye_width: 1024,
            eye_height: 1024,
            render_model_attempts: 50,
            retry_initial_ms: 1,
            retry_max_ms: 100,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    /// Default filter when RUST_LOG is unset.
    pub log_level: String,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: cfg!(debug_assertions),
            log_level: "info".to_string(),
            log_to_file: false,
            log_file: "frame_scheduler.log".to_string(),
            show_fps: true,
        }
    }
}

/// Which demo the binary runs.
#[derive(Debug, Deserialize, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sample {
    #[default]
    Clear,
    Upload,
    Stereo,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct SampleConfig {
    pub name: Sample,
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
        let config = Self::parse(&content).with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn wait_timeout(&self) -> Option<Duration> {
        match self.scheduler.wait_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            vsync_interval: self.graphics.vsync_interval,
            wait_timeout: self.wait_timeout(),
        }
    }

    pub fn uploader_config(&self) -> UploaderConfig {
        UploaderConfig {
            queue_capacity: self.upload.queue_capacity.max(1),
            wait_timeout: self.wait_timeout(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.stereo.render_model_attempts.max(1),
            initial_delay: Duration::from_millis(self.stereo.retry_initial_ms),
            max_delay: Duration::from_millis(self.stereo.retry_max_ms),
        }
    }

    /// Sample selection, with `stereo.enabled` forcing the stereo sample.
    pub fn sample(&self) -> Sample {
        if self.stereo.enabled {
            Sample::Stereo
        } else {
            self.sample.name
        }
    }

    /// Get present mode as Vulkan enum
    pub fn get_present_mode(&self) -> ash::vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => ash::vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => ash::vk::PresentModeKHR::MAILBOX,
            "fifo" => ash::vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => ash::vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to FIFO",
                    self.graphics.present_mode
                );
                ash::vk::PresentModeKHR::FIFO
            }
        }
    }
}
