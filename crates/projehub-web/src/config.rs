use std::path::PathBuf;
use std::str::FromStr;

use projehub_core::ingest::{DEFAULT_JPEG_QUALITY, DEFAULT_MAX_DIMENSION};
use projehub_core::{BatchPolicy, IngestOptions};
use serde::{Deserialize, Serialize};

use crate::state::SessionLimits;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_SESSION_IDLE_MINUTES: i64 = 30;
pub const DEFAULT_MAX_SESSIONS: usize = 1024;

/// One year; longer idle timeouts are clamped to it.
const MAX_SESSION_IDLE_MINUTES: i64 = 60 * 24 * 365;

/// Which persistence adapter the server runs on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Whole project list in one key-value document, single local user.
    #[default]
    Embedded,
    /// Project and file tables with credential sign-in.
    Relational,
}

impl Backend {
    #[must_use]
    pub const fn requires_sign_in(self) -> bool {
        matches!(self, Self::Relational)
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "embedded" => Ok(Self::Embedded),
            "relational" => Ok(Self::Relational),
            _ => Err(format!("Unknown backend: {s}")),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub backend: Backend,
    pub db_path: PathBuf,
    pub port: u16,
    pub static_dir: PathBuf,
    pub max_image_dimension: u32,
    pub jpeg_quality: u8,
    pub batch_policy: BatchPolicy,
    pub session_idle_minutes: i64,
    pub max_sessions: usize,
    /// Account created at startup when the relational backend is in use.
    pub admin: Option<(String, String)>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            db_path: default_db_path(),
            port: DEFAULT_PORT,
            static_dir: PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/static")),
            max_image_dimension: DEFAULT_MAX_DIMENSION,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            batch_policy: BatchPolicy::default(),
            session_idle_minutes: DEFAULT_SESSION_IDLE_MINUTES,
            max_sessions: DEFAULT_MAX_SESSIONS,
            admin: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let admin = match (
            std::env::var("PROJEHUB_ADMIN_EMAIL"),
            std::env::var("PROJEHUB_ADMIN_PASSWORD"),
        ) {
            (Ok(email), Ok(password)) if !email.trim().is_empty() && !password.is_empty() => {
                Some((email, password))
            }
            _ => None,
        };

        Self {
            backend: env_parse("PROJEHUB_BACKEND", defaults.backend),
            db_path: std::env::var("PROJEHUB_DB").map_or(defaults.db_path, PathBuf::from),
            port: env_parse("PROJEHUB_PORT", defaults.port),
            static_dir: std::env::var("PROJEHUB_STATIC")
                .map_or(defaults.static_dir, PathBuf::from),
            max_image_dimension: env_parse(
                "PROJEHUB_MAX_IMAGE_DIMENSION",
                defaults.max_image_dimension,
            )
            .max(1),
            jpeg_quality: env_parse("PROJEHUB_JPEG_QUALITY", defaults.jpeg_quality).clamp(1, 100),
            batch_policy: env_parse("PROJEHUB_BATCH_POLICY", defaults.batch_policy),
            session_idle_minutes: env_parse(
                "PROJEHUB_SESSION_IDLE_MINUTES",
                defaults.session_idle_minutes,
            )
            .clamp(1, MAX_SESSION_IDLE_MINUTES),
            max_sessions: env_parse("PROJEHUB_MAX_SESSIONS", defaults.max_sessions).max(1),
            admin,
        }
    }

    #[must_use]
    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            recompress_images: true,
            max_dimension: self.max_image_dimension.max(1),
            jpeg_quality: self.jpeg_quality.clamp(1, 100),
        }
    }

    #[must_use]
    pub fn session_limits(&self) -> SessionLimits {
        SessionLimits {
            idle_timeout: chrono::Duration::minutes(
                self.session_idle_minutes.clamp(1, MAX_SESSION_IDLE_MINUTES),
            ),
            max_sessions: self.max_sessions.max(1),
        }
    }
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|e| {
            tracing::warn!(key, value = %raw, error = %e, "ignoring invalid setting");
            default
        }),
        Err(_) => default,
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("projehub")
        .join("projehub.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_from_str() {
        assert_eq!("embedded".parse::<Backend>().unwrap(), Backend::Embedded);
        assert_eq!("Relational".parse::<Backend>().unwrap(), Backend::Relational);
        assert!("postgres".parse::<Backend>().is_err());
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.backend, Backend::Embedded);
        assert_eq!(config.port, 3000);
        assert_eq!(config.max_image_dimension, 1024);
        assert_eq!(config.jpeg_quality, 70);
        assert!(config.db_path.ends_with("projehub/projehub.db"));
        assert!(!config.backend.requires_sign_in());
        assert!(config.admin.is_none());
    }

    #[test]
    fn test_ingest_options_follow_config() {
        let config = ServerConfig {
            max_image_dimension: 512,
            jpeg_quality: 90,
            ..ServerConfig::default()
        };
        let options = config.ingest_options();
        assert_eq!(options.max_dimension, 512);
        assert_eq!(options.jpeg_quality, 90);
        assert!(options.recompress_images);
    }

    #[test]
    fn test_zero_image_dimension_is_raised_to_one() {
        let config = ServerConfig {
            max_image_dimension: 0,
            jpeg_quality: 0,
            ..ServerConfig::default()
        };
        let options = config.ingest_options();
        assert_eq!(options.max_dimension, 1);
        assert_eq!(options.jpeg_quality, 1);
    }

    #[test]
    fn test_from_env_clamps_out_of_range_values() {
        std::env::set_var("PROJEHUB_MAX_IMAGE_DIMENSION", "0");
        std::env::set_var("PROJEHUB_MAX_SESSIONS", "0");
        let config = ServerConfig::from_env();
        std::env::remove_var("PROJEHUB_MAX_IMAGE_DIMENSION");
        std::env::remove_var("PROJEHUB_MAX_SESSIONS");

        assert_eq!(config.max_image_dimension, 1);
        assert_eq!(config.max_sessions, 1);
    }

    #[test]
    fn test_session_limits_follow_config() {
        let config = ServerConfig {
            session_idle_minutes: 5,
            max_sessions: 10,
            ..ServerConfig::default()
        };
        let limits = config.session_limits();
        assert_eq!(limits.idle_timeout, chrono::Duration::minutes(5));
        assert_eq!(limits.max_sessions, 10);
    }
}
