//! Application configuration
//!
//! One TOML file holds the engine timing defaults, runtime queue sizes,
//! controller settings and every profile. A missing file is not an error:
//! the built-in default profile is used instead.

use crate::controller::ControllerSettings;
use crate::mapping::{MappingError, Profile};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read or write config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid profile '{profile}': {source}")]
    InvalidProfile {
        profile: String,
        #[source]
        source: MappingError,
    },

    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("No profiles configured")]
    NoProfiles,

    #[error("Could not determine the config directory")]
    NoConfigDir,
}

/// Timing defaults for everything the engine schedules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub chord_window_ms: u64,
    pub modifier_tap_delay_ms: u64,
    pub long_hold_ms: u64,
    pub double_tap_ms: u64,
    pub repeat_interval_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            chord_window_ms: 150,
            modifier_tap_delay_ms: 50,
            long_hold_ms: 500,
            double_tap_ms: 300,
            repeat_interval_ms: 100,
        }
    }
}

impl EngineSettings {
    pub fn chord_window(&self) -> Duration {
        Duration::from_millis(self.chord_window_ms)
    }

    pub fn modifier_tap_delay(&self) -> Duration {
        Duration::from_millis(self.modifier_tap_delay_ms)
    }

    pub fn long_hold(&self) -> Duration {
        Duration::from_millis(self.long_hold_ms)
    }

    pub fn double_tap(&self) -> Duration {
        Duration::from_millis(self.double_tap_ms)
    }

    pub fn repeat_interval(&self) -> Duration {
        Duration::from_millis(self.repeat_interval_ms)
    }
}

/// Queue sizes and the analog polling rate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    pub analog_poll_hz: u32,
    pub discrete_capacity: usize,
    pub analog_capacity: usize,
    /// Pointer deltas allowed to wait before new ones are shed; key output is never dropped
    pub output_capacity: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            analog_poll_hz: 120,
            discrete_capacity: 1000,
            analog_capacity: 256,
            output_capacity: 256,
        }
    }
}

impl RuntimeSettings {
    pub fn analog_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.analog_poll_hz.max(1)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub runtime: RuntimeSettings,
    #[serde(default)]
    pub controller: ControllerSettings,
    /// Name of the profile to start with; the first profile when unset
    #[serde(default)]
    pub active_profile: Option<String>,
    #[serde(default)]
    pub profiles: Vec<Profile>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine: EngineSettings::default(),
            runtime: RuntimeSettings::default(),
            controller: ControllerSettings::default(),
            active_profile: None,
            profiles: vec![Profile::default_profile()],
        }
    }
}

impl AppConfig {
    /// `<config dir>/padmapper/config.toml`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join("padmapper").join("config.toml"))
            .ok_or(ConfigError::NoConfigDir)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading config from {:?}", path);
        let content = tokio::fs::read_to_string(path).await?;
        let config = Self::from_toml_str(&content)?;
        info!(
            "Loaded {} profile(s) from {:?}",
            config.profiles.len(),
            path
        );
        Ok(config)
    }

    /// Falls back to the default configuration when the file does not exist
    pub async fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !tokio::fs::try_exists(path).await? {
            warn!("No config at {:?}, using built-in defaults", path);
            return Ok(Self::default());
        }
        Self::load(path).await
    }

    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, self.to_toml_string()?).await?;
        info!("Config saved to {:?}", path);
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for profile in &self.profiles {
            profile
                .validate()
                .map_err(|source| ConfigError::InvalidProfile {
                    profile: profile.name.clone(),
                    source,
                })?;
        }
        if let Some(name) = &self.active_profile {
            self.profile(name)?;
        }
        Ok(())
    }

    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles
            .iter()
            .find(|profile| profile.name == name)
            .ok_or_else(|| ConfigError::ProfileNotFound(name.to_string()))
    }

    pub fn active_profile(&self) -> Result<&Profile, ConfigError> {
        match &self.active_profile {
            Some(name) => self.profile(name),
            None => self.profiles.first().ok_or(ConfigError::NoProfiles),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config.engine, EngineSettings::default());
        assert_eq!(config.runtime.analog_poll_hz, 120);
        assert!(config.profiles.is_empty());
        assert!(matches!(
            config.active_profile(),
            Err(ConfigError::NoProfiles)
        ));
    }

    #[test]
    fn test_engine_overrides() {
        let config = AppConfig::from_toml_str(
            r#"
            [engine]
            chord_window_ms = 80
            double_tap_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.chord_window(), Duration::from_millis(80));
        assert_eq!(config.engine.double_tap(), Duration::from_millis(250));
        assert_eq!(config.engine.long_hold(), Duration::from_millis(500));
    }

    #[test]
    fn test_unknown_active_profile_is_rejected() {
        let result = AppConfig::from_toml_str(
            r#"
            active_profile = "Gaming"

            [[profiles]]
            name = "Desktop"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::ProfileNotFound(name)) if name == "Gaming"));
    }

    #[test]
    fn test_invalid_profile_names_the_profile() {
        let result = AppConfig::from_toml_str(
            r#"
            [[profiles]]
            name = "Broken"

            [[profiles.chords]]
            buttons = ["A"]
            key = "C"
            "#,
        );
        match result {
            Err(ConfigError::InvalidProfile { profile, source }) => {
                assert_eq!(profile, "Broken");
                assert_eq!(source, MappingError::ChordTooSmall(1));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let config = AppConfig::default();
        let text = config.to_toml_string().unwrap();
        let parsed = AppConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed.active_profile().unwrap().name, "Default");
        assert_eq!(parsed.profiles[0].buttons.len(), config.profiles[0].buttons.len());
    }

    #[tokio::test]
    async fn test_missing_file_falls_back_to_default() {
        let path = std::env::temp_dir().join("padmapper-missing-config-test.toml");
        let _ = tokio::fs::remove_file(&path).await;
        let config = AppConfig::load_or_default(&path).await.unwrap();
        assert_eq!(config.active_profile().unwrap().name, "Default");
    }
}
