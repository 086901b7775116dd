//! Configuration loading and management

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::hotkey::{HotkeyBinding, Key};

/// Overrides the per-user config directory
pub const CONFIG_DIR_ENV: &str = "SNAPLOG_CONFIG_DIR";

/// Overrides the persisted hotkey for one run, e.g. `alt+shift+space`
pub const HOTKEY_ENV: &str = "SNAPLOG_HOTKEY";

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Per-user config directory
    pub config_dir: PathBuf,

    /// Singleton lock marker
    pub lock_path: PathBuf,

    /// Persisted hotkey settings
    pub settings_path: PathBuf,

    /// Path to the Unix domain socket for IPC
    #[cfg(unix)]
    pub socket_path: PathBuf,

    /// Binding from the environment, if set
    pub hotkey_override: Option<String>,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let config_dir = match std::env::var_os(CONFIG_DIR_ENV) {
            Some(dir) => PathBuf::from(dir),
            None => dirs::config_dir()
                .context("no per-user config directory on this system")?
                .join("snaplog"),
        };

        let mut config = Self::from_dir(config_dir);
        config.hotkey_override = std::env::var(HOTKEY_ENV).ok().filter(|s| !s.trim().is_empty());
        Ok(config)
    }

    /// Configuration rooted at `config_dir` with no environment overrides
    pub fn from_dir(config_dir: impl Into<PathBuf>) -> Self {
        let config_dir = config_dir.into();
        Self {
            lock_path: config_dir.join("snaplog.lock"),
            settings_path: config_dir.join("settings.json"),
            #[cfg(unix)]
            socket_path: config_dir.join("daemon.sock"),
            hotkey_override: None,
            config_dir,
        }
    }

    /// Ensure config directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.config_dir).with_context(|| {
            format!("failed to create config directory {}", self.config_dir.display())
        })?;
        Ok(())
    }

    /// Binding to register at startup: the environment override when it
    /// parses, otherwise the persisted settings
    pub fn startup_binding(&self, settings: &Settings) -> HotkeyBinding {
        if let Some(raw) = &self.hotkey_override {
            match raw.parse::<HotkeyBinding>() {
                Ok(binding) => {
                    info!(%binding, "using hotkey from {}", HOTKEY_ENV);
                    return binding;
                }
                Err(e) => warn!(value = %raw, error = %e, "ignoring invalid {}", HOTKEY_ENV),
            }
        }
        settings.binding()
    }
}

/// Persisted hotkey settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub hotkey_modifiers: Vec<String>,
    pub hotkey_key: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_binding(&HotkeyBinding::default())
    }
}

impl Settings {
    /// Read settings from `path`; missing or unreadable files yield defaults
    pub fn load(path: &Path) -> Self {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no settings file, using defaults");
                return Self::default();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read settings, using defaults");
                return Self::default();
            }
        };

        match serde_json::from_slice(&data) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "invalid settings file, using defaults");
                Self::default()
            }
        }
    }

    /// Write settings as pretty JSON, creating the parent directory
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let data = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, data)
            .with_context(|| format!("failed to write settings to {}", path.display()))?;
        debug!(path = %path.display(), "settings saved");
        Ok(())
    }

    pub fn from_binding(binding: &HotkeyBinding) -> Self {
        Self {
            hotkey_modifiers: binding
                .modifiers()
                .iter()
                .map(|m| m.name().to_string())
                .collect(),
            hotkey_key: binding.key().name().to_string(),
        }
    }

    /// The binding these settings describe
    ///
    /// Unknown modifier names are dropped; an unknown key falls back to `l`.
    pub fn binding(&self) -> HotkeyBinding {
        let key = Key::from_name(&self.hotkey_key).unwrap_or_else(|| {
            warn!(key = %self.hotkey_key, "unsupported hotkey key, falling back to l");
            Key::default()
        });
        HotkeyBinding::from_names(self.hotkey_modifiers.as_slice(), key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkey::Modifier;

    fn temp_dir(name: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("snaplog-config-{name}-{}-{nanos}", std::process::id()))
    }

    #[test]
    fn test_config_paths() {
        let config = Config::from_dir("/tmp/snaplog-test");
        assert!(config.lock_path.ends_with("snaplog.lock"));
        assert!(config.settings_path.ends_with("settings.json"));
        #[cfg(unix)]
        assert!(config.socket_path.ends_with("daemon.sock"));
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.hotkey_modifiers, vec!["ctrl", "shift"]);
        assert_eq!(settings.hotkey_key, "l");
        assert_eq!(settings.binding(), HotkeyBinding::default());
    }

    #[test]
    fn test_settings_json_shape() {
        let json = r#"{"hotkey_modifiers":["alt","meta","bogus"],"hotkey_key":"space"}"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        let binding = settings.binding();
        assert_eq!(binding.modifiers(), &[Modifier::Alt, Modifier::Cmd]);
        assert_eq!(binding.key(), Key::Space);
    }

    #[test]
    fn test_unknown_key_falls_back_to_l() {
        let settings = Settings {
            hotkey_modifiers: vec!["ctrl".to_string()],
            hotkey_key: "f13".to_string(),
        };
        assert_eq!(settings.binding().key(), Key::L);
    }

    #[test]
    fn test_save_and_load() {
        let dir = temp_dir("save");
        let path = dir.join("settings.json");

        assert_eq!(Settings::load(&path), Settings::default());

        let binding: HotkeyBinding = "alt+shift+n".parse().unwrap();
        Settings::from_binding(&binding).save(&path).unwrap();
        assert_eq!(Settings::load(&path).binding(), binding);

        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(Settings::load(&path), Settings::default());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_override_wins_when_valid() {
        let mut config = Config::from_dir("/tmp/snaplog-test");
        let settings = Settings::default();

        config.hotkey_override = Some("alt+t".to_string());
        assert_eq!(config.startup_binding(&settings).to_string(), "alt+t");

        config.hotkey_override = Some("ctrl+q".to_string());
        assert_eq!(config.startup_binding(&settings), HotkeyBinding::default());
    }
}
