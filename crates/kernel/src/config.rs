//! Configuration loaded from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::media::{DEFAULT_BATCH_SIZE, DEFAULT_INTERVAL, MAX_UPLOAD_BYTES, MediaSettings};

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port (default: 3000).
    pub port: u16,

    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Maximum database connections in pool (default: 10).
    pub database_max_connections: u32,

    /// Path to uploads directory (default: ./uploads).
    pub uploads_dir: PathBuf,

    /// Base URL for serving uploaded files (default: /uploads).
    pub files_url: String,

    /// HS256 secret for verifying bearer tokens.
    pub jwt_secret: String,

    /// CORS allowed origins (comma-separated, default: "*").
    pub cors_allowed_origins: Vec<String>,

    /// Time an uploaded file may wait to be linked (default: 1800s).
    pub media_ttl: Duration,

    /// Time between reaper sweeps (default: 21600s).
    pub reaper_interval: Duration,

    /// Records examined per reaper sweep (default: 100).
    pub reaper_batch_size: i64,

    /// Upload size cap in bytes (default: 10 MiB).
    pub max_upload_bytes: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("PORT must be a valid u16")?;

        let database_url =
            env::var("DATABASE_URL").context("DATABASE_URL environment variable is required")?;

        let database_max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .context("DATABASE_MAX_CONNECTIONS must be a valid u32")?;

        let uploads_dir = env::var("UPLOADS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./uploads"));

        let files_url = env::var("FILES_URL").unwrap_or_else(|_| "/uploads".to_string());

        let jwt_secret =
            env::var("JWT_SECRET").context("JWT_SECRET environment variable is required")?;
        if jwt_secret.len() < 32 {
            bail!("JWT_SECRET must be at least 32 bytes");
        }

        let cors_allowed_origins = env::var("CORS_ALLOWED_ORIGINS")
            .map(|v| parse_list(&v))
            .unwrap_or_else(|_| vec!["*".to_string()]);

        let media_ttl = env::var("MEDIA_TTL_SECS")
            .map(|v| v.parse().context("MEDIA_TTL_SECS must be a number of seconds"))
            .unwrap_or(Ok(30 * 60))
            .map(Duration::from_secs)?;

        let reaper_interval = env::var("REAPER_INTERVAL_SECS")
            .map(|v| {
                v.parse()
                    .context("REAPER_INTERVAL_SECS must be a number of seconds")
            })
            .unwrap_or(Ok(DEFAULT_INTERVAL.as_secs()))
            .map(Duration::from_secs)?;
        if reaper_interval.is_zero() {
            bail!("REAPER_INTERVAL_SECS must be greater than zero");
        }

        let reaper_batch_size = env::var("REAPER_BATCH_SIZE")
            .unwrap_or_else(|_| DEFAULT_BATCH_SIZE.to_string())
            .parse()
            .context("REAPER_BATCH_SIZE must be a valid i64")?;

        let max_upload_bytes = env::var("MAX_UPLOAD_BYTES")
            .unwrap_or_else(|_| MAX_UPLOAD_BYTES.to_string())
            .parse()
            .context("MAX_UPLOAD_BYTES must be a valid u64")?;

        Ok(Self {
            port,
            database_url,
            database_max_connections,
            uploads_dir,
            files_url,
            jwt_secret,
            cors_allowed_origins,
            media_ttl,
            reaper_interval,
            reaper_batch_size,
            max_upload_bytes,
        })
    }

    /// Intake settings derived from this configuration.
    pub fn media_settings(&self) -> Result<MediaSettings> {
        let ttl = chrono::Duration::from_std(self.media_ttl).context("MEDIA_TTL_SECS is too large")?;
        Ok(MediaSettings {
            ttl,
            max_upload_bytes: self.max_upload_bytes,
        })
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list() {
        assert_eq!(
            parse_list("https://a.example, https://b.example,,"),
            vec!["https://a.example", "https://b.example"]
        );
        assert!(parse_list("").is_empty());
    }

    #[test]
    fn test_media_settings() {
        let config = Config {
            port: 3000,
            database_url: "postgres://localhost/pictor".into(),
            database_max_connections: 10,
            uploads_dir: PathBuf::from("./uploads"),
            files_url: "/uploads".into(),
            jwt_secret: "x".repeat(32),
            cors_allowed_origins: vec!["*".into()],
            media_ttl: Duration::from_secs(1800),
            reaper_interval: DEFAULT_INTERVAL,
            reaper_batch_size: DEFAULT_BATCH_SIZE,
            max_upload_bytes: MAX_UPLOAD_BYTES,
        };
        let settings = config.media_settings().unwrap();
        assert_eq!(settings.ttl, chrono::Duration::minutes(30));
        assert_eq!(settings.max_upload_bytes, 10 * 1024 * 1024);
    }
}
