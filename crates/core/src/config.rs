//! FocusRoom Configuration
//!
//! This module defines the configuration structures with proper defaults
//! using derive macros and serde attributes for cleaner code.

use crate::error::FocusRoomError;
use crate::model::{DEFAULT_DURATION_SECS, DEFAULT_MAX_PARTICIPANTS};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

// ============================================================================
// Constants
// ============================================================================

/// Default presence heartbeat interval (seconds)
pub const DEFAULT_HEARTBEAT_INTERVAL: u64 = 60;
/// Default active-user count poll interval (seconds)
pub const DEFAULT_ACTIVE_COUNT_POLL: u64 = 30;
/// Default cleanup sweep interval (seconds)
pub const DEFAULT_CLEANUP_INTERVAL: u64 = 15 * 60;
/// Grace period used when neither the room nor the config sets one (seconds)
pub const FALLBACK_GRACE_PERIOD: u64 = 120;
/// Default HTTP timeout for store requests (seconds)
pub const DEFAULT_REQUEST_TIMEOUT: u64 = 15;
/// Default display name
pub const DEFAULT_DISPLAY_NAME: &str = "Anonymous";

pub const ENV_DATABASE_URL: &str = "FOCUSROOM_DATABASE_URL";
pub const ENV_AUTH_TOKEN: &str = "FOCUSROOM_AUTH_TOKEN";
pub const ENV_GRACE_PERIOD: &str = "FOCUSROOM_GRACE_PERIOD_SECS";

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn default_focusroom_dir() -> PathBuf {
    home_dir().join(".focusroom")
}

// ============================================================================
// Main Config
// ============================================================================

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Realtime backend selection
    #[serde(default)]
    pub backend: BackendConfig,
    /// Presence heartbeat and polling
    #[serde(default)]
    pub presence: PresenceConfig,
    /// Defaults for newly created rooms
    #[serde(default)]
    pub rooms: RoomDefaults,
    /// Cleanup sweep
    #[serde(default)]
    pub cleanup: CleanupConfig,
    /// Local identity
    #[serde(default)]
    pub user: UserConfig,
}

// ============================================================================
// Backend Config
// ============================================================================

/// Which realtime backend to construct
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Firebase Realtime Database over REST
    #[default]
    Firebase,
    /// Process-local simulation
    Memory,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Firebase => write!(f, "firebase"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
    /// Fall back to the memory backend when the requested one fails
    #[serde(default = "BackendConfig::default_allow_fallback")]
    pub allow_fallback: bool,
    #[serde(default)]
    pub firebase: FirebaseConfig,
}

impl BackendConfig {
    fn default_allow_fallback() -> bool {
        true
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            allow_fallback: true,
            firebase: FirebaseConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirebaseConfig {
    /// e.g. https://my-app-default-rtdb.firebaseio.com
    #[serde(default)]
    pub database_url: String,
    /// ID token or database secret, sent as the `auth` query parameter
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "FirebaseConfig::default_timeout")]
    pub request_timeout_secs: u64,
}

impl FirebaseConfig {
    fn default_timeout() -> u64 {
        DEFAULT_REQUEST_TIMEOUT
    }

    /// Config values with environment overrides applied
    pub fn resolved(&self) -> Self {
        let mut resolved = self.clone();
        if let Ok(url) = std::env::var(ENV_DATABASE_URL) {
            resolved.database_url = url;
        }
        if let Ok(token) = std::env::var(ENV_AUTH_TOKEN) {
            resolved.auth_token = Some(token);
        }
        resolved
    }
}

impl Default for FirebaseConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            auth_token: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

// ============================================================================
// Presence Config
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    #[serde(default = "PresenceConfig::default_heartbeat")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "PresenceConfig::default_poll")]
    pub active_count_poll_secs: u64,
}

impl PresenceConfig {
    fn default_heartbeat() -> u64 {
        DEFAULT_HEARTBEAT_INTERVAL
    }
    fn default_poll() -> u64 {
        DEFAULT_ACTIVE_COUNT_POLL
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL,
            active_count_poll_secs: DEFAULT_ACTIVE_COUNT_POLL,
        }
    }
}

// ============================================================================
// Room Defaults
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomDefaults {
    #[serde(default = "RoomDefaults::default_max_participants")]
    pub max_participants: u32,
    #[serde(default = "RoomDefaults::default_duration")]
    pub duration_secs: u64,
}

impl RoomDefaults {
    fn default_max_participants() -> u32 {
        DEFAULT_MAX_PARTICIPANTS
    }
    fn default_duration() -> u64 {
        DEFAULT_DURATION_SECS
    }
}

impl Default for RoomDefaults {
    fn default() -> Self {
        Self {
            max_participants: DEFAULT_MAX_PARTICIPANTS,
            duration_secs: DEFAULT_DURATION_SECS,
        }
    }
}

// ============================================================================
// Cleanup Config
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    #[serde(default = "CleanupConfig::default_interval")]
    pub interval_secs: u64,
    /// Applies to rooms without their own removal delay
    #[serde(default)]
    pub default_grace_period_secs: Option<u64>,
}

impl CleanupConfig {
    fn default_interval() -> u64 {
        DEFAULT_CLEANUP_INTERVAL
    }

    /// Configured grace period, else the environment, else nothing
    pub fn default_grace_period(&self) -> Option<u64> {
        self.grace_period_with(std::env::var(ENV_GRACE_PERIOD).ok())
    }

    fn grace_period_with(&self, env_value: Option<String>) -> Option<u64> {
        self.default_grace_period_secs
            .or_else(|| env_value.and_then(|v| v.trim().parse().ok()))
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_CLEANUP_INTERVAL,
            default_grace_period_secs: None,
        }
    }
}

// ============================================================================
// User Config
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    /// Stable user id; generated and written back on first load when absent
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default = "UserConfig::default_display_name")]
    pub display_name: String,
}

impl UserConfig {
    fn default_display_name() -> String {
        DEFAULT_DISPLAY_NAME.to_string()
    }

    pub fn user_id(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            id: None,
            display_name: DEFAULT_DISPLAY_NAME.to_string(),
        }
    }
}

// ============================================================================
// Config Loading and Validation
// ============================================================================

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file or default locations
    pub fn load(path: Option<&str>) -> Result<Config, FocusRoomError> {
        let config_path = Self::resolve_config_path(path)?;
        tracing::debug!("Loading config from {:?}", config_path);
        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Config, FocusRoomError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FocusRoomError::config_parse_error(format!("Failed to read: {}", e)))?;
        let mut config: Config = serde_yml::from_str(&content)
            .map_err(|e| FocusRoomError::config_parse_error(format!("Failed to parse: {}", e)))?;
        ConfigValidator::validate(&config)?;
        if config.user.id.is_none() {
            Self::assign_user_id(&mut config, path);
        }
        Ok(config)
    }

    /// Generate a user id and write it back so later runs keep the same identity
    fn assign_user_id(config: &mut Config, path: &Path) {
        let id = uuid::Uuid::new_v4().to_string();
        tracing::info!("Assigned user id {} in {:?}", id, path);
        config.user.id = Some(id);
        if let Err(e) = config.save(path) {
            tracing::warn!("Could not persist user id to {:?}: {}", path, e);
        }
    }

    fn resolve_config_path(path: Option<&str>) -> Result<PathBuf, FocusRoomError> {
        if let Some(p) = path {
            return Ok(PathBuf::from(p));
        }

        let default_paths = [
            default_focusroom_dir().join("config.yaml"),
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("focusroom.yaml"),
            PathBuf::from("./focusroom.yaml"),
        ];

        default_paths
            .into_iter()
            .find(|p| p.exists())
            .ok_or_else(|| {
                FocusRoomError::config_not_found(
                    "Config not found. Run `focusroom init` or create ~/.focusroom/config.yaml",
                )
            })
    }

    pub fn default_path() -> PathBuf {
        default_focusroom_dir().join("config.yaml")
    }
}

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &Config) -> Result<(), FocusRoomError> {
        if config.backend.kind == BackendKind::Firebase
            && !config.backend.allow_fallback
            && config.backend.firebase.resolved().database_url.trim().is_empty()
        {
            return Err(FocusRoomError::config_invalid(
                "backend.firebase.database_url",
                "Database URL is required when fallback is disabled",
            ));
        }

        if config.presence.heartbeat_interval_secs == 0 {
            return Err(FocusRoomError::config_invalid(
                "presence.heartbeat_interval_secs",
                "Heartbeat interval must be positive",
            ));
        }

        // A heartbeat slower than the activity window makes every user look idle
        let heartbeat_ms = config.presence.heartbeat_interval_secs.saturating_mul(1000);
        if heartbeat_ms >= crate::model::ACTIVE_THRESHOLD_MS as u64 {
            return Err(FocusRoomError::config_invalid(
                "presence.heartbeat_interval_secs",
                format!(
                    "Heartbeat interval must be shorter than {} seconds",
                    crate::model::ACTIVE_THRESHOLD_MS / 1000
                ),
            ));
        }

        if config.presence.active_count_poll_secs == 0 {
            return Err(FocusRoomError::config_invalid(
                "presence.active_count_poll_secs",
                "Active user poll interval must be positive",
            ));
        }

        if config.rooms.max_participants == 0 {
            return Err(FocusRoomError::config_invalid(
                "rooms.max_participants",
                "Rooms need room for at least one participant",
            ));
        }

        if config.cleanup.interval_secs == 0 {
            return Err(FocusRoomError::config_invalid(
                "cleanup.interval_secs",
                "Sweep interval must be positive",
            ));
        }

        Ok(())
    }
}

impl Config {
    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), FocusRoomError> {
        let content = serde_yml::to_string(self).map_err(|e| {
            FocusRoomError::config_parse_error(format!("Serialization failed: {}", e))
        })?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Generate a sample configuration
    pub fn sample() -> Self {
        Config {
            backend: BackendConfig {
                kind: BackendKind::Firebase,
                allow_fallback: true,
                firebase: FirebaseConfig {
                    database_url: "https://your-project-default-rtdb.firebaseio.com".to_string(),
                    auth_token: None,
                    request_timeout_secs: DEFAULT_REQUEST_TIMEOUT,
                },
            },
            presence: PresenceConfig::default(),
            rooms: RoomDefaults::default(),
            cleanup: CleanupConfig::default(),
            user: UserConfig {
                id: Some(uuid::Uuid::new_v4().to_string()),
                display_name: DEFAULT_DISPLAY_NAME.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grace_period_prefers_config_then_environment() {
        let mut cleanup = CleanupConfig::default();
        assert_eq!(cleanup.grace_period_with(None), None);
        assert_eq!(cleanup.grace_period_with(Some(" 300 ".to_string())), Some(300));
        assert_eq!(cleanup.grace_period_with(Some("soon".to_string())), None);

        cleanup.default_grace_period_secs = Some(60);
        assert_eq!(cleanup.grace_period_with(Some("300".to_string())), Some(60));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let mut config = Config::default();
        config.backend.kind = BackendKind::Memory;
        assert!(ConfigValidator::validate(&config).is_ok());

        config.presence.active_count_poll_secs = 0;
        let err = ConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("presence.active_count_poll_secs"));
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config: Config = serde_yml::from_str("{}").expect("parse empty config");
        assert_eq!(config.backend.kind, BackendKind::Firebase);
        assert!(config.backend.allow_fallback);
        assert_eq!(config.presence.active_count_poll_secs, 30);
        assert_eq!(config.rooms.max_participants, 10);
        assert_eq!(config.rooms.duration_secs, 1500);
        assert_eq!(config.cleanup.interval_secs, 900);
    }

    #[test]
    fn backend_kind_is_lowercase() {
        let config: Config =
            serde_yml::from_str("backend:\n  kind: memory\n").expect("parse backend kind");
        assert_eq!(config.backend.kind, BackendKind::Memory);
    }

    #[test]
    fn slow_heartbeat_is_rejected() {
        let mut config = Config::default();
        config.backend.kind = BackendKind::Memory;
        config.presence.heartbeat_interval_secs = 120;
        assert!(ConfigValidator::validate(&config).is_err());
        config.presence.heartbeat_interval_secs = 60;
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn sample_round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/config.yaml");
        let sample = Config::sample();
        sample.save(&path).expect("save sample");

        let loaded = ConfigLoader::load(path.to_str()).expect("load sample");
        assert_eq!(loaded.backend.firebase.database_url, sample.backend.firebase.database_url);
        assert_eq!(loaded.user.id, sample.user.id);
    }
}
