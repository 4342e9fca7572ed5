//! Application settings persisted in the user's config directory:
//! `<config dir>/taskdeck/settings.json`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::execute::ExecuteOptions;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    /// Kernelspec to launch when the operator starts a new kernel.
    #[serde(default = "default_kernel_name")]
    pub kernel_name: String,

    /// Budget for a freshly started kernel to become reachable.
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    /// Broadcast poll interval while a task is running.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Stdin probe budget when the broadcast stream is quiet.
    #[serde(default = "default_input_poll_ms")]
    pub input_poll_ms: u64,

    /// Echo the generated snippet to the console before running it.
    #[serde(default)]
    pub show_code_snippet: bool,
}

fn default_kernel_name() -> String {
    "python3".to_string()
}

fn default_startup_timeout_secs() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_input_poll_ms() -> u64 {
    100
}

impl Default for AppSettings {
    fn default() -> Self {
        AppSettings {
            kernel_name: default_kernel_name(),
            startup_timeout_secs: default_startup_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            input_poll_ms: default_input_poll_ms(),
            show_code_snippet: false,
        }
    }
}

impl AppSettings {
    pub fn settings_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("taskdeck")
            .join("settings.json")
    }

    pub fn load() -> Self {
        Self::load_from(&Self::settings_path())
    }

    /// Load settings, falling back to defaults on a missing or unreadable
    /// file. A corrupt file is reported, never fatal.
    pub fn load_from(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(_) => return AppSettings::default(),
        };
        match serde_json::from_str(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("failed to parse {}: {}; using defaults", path.display(), e);
                AppSettings::default()
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::settings_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, format!("{json}\n"))?;
        info!("saved settings to {}", path.display());
        Ok(())
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    /// Bridge tuning derived from these settings.
    pub fn execute_options(&self) -> ExecuteOptions {
        ExecuteOptions {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            input_poll: Duration::from_millis(self.input_poll_ms),
            expected_prompts: None,
            echo_code: self.show_code_snippet,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let settings = AppSettings::load_from(Path::new("/nonexistent/settings.json"));
        assert_eq!(settings, AppSettings::default());
        assert_eq!(settings.kernel_name, "python3");
    }

    #[test]
    fn test_partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "kernel_name": "julia-1.10" }"#).unwrap();

        let settings = AppSettings::load_from(&path);
        assert_eq!(settings.kernel_name, "julia-1.10");
        assert_eq!(settings.poll_interval_ms, 1000);
        assert!(!settings.show_code_snippet);
    }

    #[test]
    fn test_corrupt_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();

        assert_eq!(AppSettings::load_from(&path), AppSettings::default());
    }

    #[test]
    fn test_save_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let settings = AppSettings {
            show_code_snippet: true,
            poll_interval_ms: 250,
            ..AppSettings::default()
        };
        settings.save_to(&path).unwrap();

        assert_eq!(AppSettings::load_from(&path), settings);
    }

    #[test]
    fn test_execute_options_follow_settings() {
        let settings = AppSettings {
            poll_interval_ms: 500,
            input_poll_ms: 50,
            show_code_snippet: true,
            ..AppSettings::default()
        };

        let options = settings.execute_options();
        assert_eq!(options.poll_interval, Duration::from_millis(500));
        assert_eq!(options.input_poll, Duration::from_millis(50));
        assert!(options.echo_code);
    }
}
