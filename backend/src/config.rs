// src/config.rs

use std::env;
use std::net::SocketAddr;

use dotenvy::dotenv;

use crate::error::AppError;

/// Questions per exam when the client does not ask for a count.
pub const DEFAULT_QUESTION_COUNT: usize = 15;
/// Hard cap on questions per exam.
pub const MAX_QUESTION_COUNT: usize = 50;
/// Percentage needed to pass.
pub const PASSING_PERCENTAGE: u32 = 60;
/// Longest exam a client may request (4 hours).
pub const MAX_DURATION_SECONDS: u32 = 4 * 60 * 60;
/// How often suspended sessions past their deadline are closed.
pub const SWEEP_INTERVAL_SECONDS: u64 = 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub rust_log: String,
    pub bind_addr: SocketAddr,
    /// Default exam length in seconds.
    pub exam_duration_seconds: u32,
    pub allowed_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://exam_portal.db?mode=rwc".to_string());

        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| AppError::InternalServerError("JWT_SECRET must be set".to_string()))?;

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let bind_addr = env::var("BIND_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:5000".to_string())
            .parse::<SocketAddr>()
            .map_err(|e| AppError::InternalServerError(format!("Invalid BIND_ADDR: {}", e)))?;

        let exam_duration_seconds = match env::var("EXAM_DURATION_SECONDS") {
            Ok(raw) => parse_duration(&raw)?,
            Err(_) => 30 * 60,
        };

        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173,http://localhost:3000".to_string())
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            database_url,
            jwt_secret,
            rust_log,
            bind_addr,
            exam_duration_seconds,
            allowed_origins,
        })
    }
}

fn parse_duration(raw: &str) -> Result<u32, AppError> {
    match raw.trim().parse::<u32>() {
        Ok(secs) if secs > 0 && secs <= MAX_DURATION_SECONDS => Ok(secs),
        _ => Err(AppError::InternalServerError(format!(
            "EXAM_DURATION_SECONDS must be between 1 and {}, got '{}'",
            MAX_DURATION_SECONDS, raw
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_bounds() {
        assert_eq!(parse_duration("1800").unwrap(), 1800);
        assert_eq!(parse_duration(" 60 ").unwrap(), 60);
        assert!(parse_duration("0").is_err());
        assert!(parse_duration("-5").is_err());
        assert!(parse_duration("999999").is_err());
        assert!(parse_duration("soon").is_err());
    }
}
