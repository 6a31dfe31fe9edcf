//! Configuration management.
//!
//! This module provides:
//! - TOML-based configuration with logical sections
//! - Atomic file writes (write to temp, then rename)
//! - Section-level updates (only changed section is modified)
//! - Validation on load with automatic defaults
//!
//! # Example
//!
//! ```no_run
//! use tomoprep_core::config::{ConfigManager, ConfigSection};
//!
//! let mut config = ConfigManager::new("tomoprep.toml");
//! config.load_or_create().unwrap();
//!
//! println!("Sinogram queue: {}", config.settings().sinogram.queue);
//!
//! config.settings_mut().monitor.total_wait_ms = 60 * 60 * 1000;
//! config.update_section(ConfigSection::Monitor).unwrap();
//! ```

mod manager;
mod settings;

pub use manager::{ConfigError, ConfigManager, ConfigResult};
pub use settings::{
    ClassificationSettings, ConfigSection, CorSettings, DatasetSettings, LayoutSettings,
    LoggingSettings, MonitorSettings, PathSettings, PreviewSettings, ReconstructionSettings,
    SchedulerSettings, Settings, SinogramSettings,
};
