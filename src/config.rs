use std::net::SocketAddr;

use chrono::FixedOffset;

use crate::aggregate::ConfidencePolicy;
use crate::calendar::parse_utc_offset;
use crate::error::{AttendanceError, Result};

/// Runtime configuration, loaded from `ATTENDANCE_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string. Only required by database-backed commands.
    pub database_url: Option<String>,
    pub listen_addr: SocketAddr,
    /// Canonical timezone that defines a calendar day.
    pub utc_offset: FixedOffset,
    pub confidence: ConfidencePolicy,
    pub max_db_connections: u32,
    /// Request body limit for enrollment uploads, sized for ten full photos.
    pub max_enroll_bytes: usize,
}

pub const DEFAULT_MAX_ENROLL_BYTES: usize = 32 * 1024 * 1024;

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup. Malformed values are errors, not defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen_addr = match lookup("ATTENDANCE_LISTEN_ADDR") {
            Some(value) => value.parse().map_err(|_| {
                AttendanceError::InvalidParameter(format!(
                    "ATTENDANCE_LISTEN_ADDR '{value}' is not a socket address"
                ))
            })?,
            None => SocketAddr::from(([0, 0, 0, 0], 8080)),
        };

        let utc_offset = match lookup("ATTENDANCE_UTC_OFFSET") {
            Some(value) => parse_utc_offset(&value)?,
            None => parse_utc_offset("+00:00")?,
        };

        let confidence = match lookup("ATTENDANCE_MIN_CONFIDENCE") {
            Some(value) => {
                let threshold: f64 = value.trim().parse().map_err(|_| {
                    AttendanceError::InvalidParameter(format!(
                        "ATTENDANCE_MIN_CONFIDENCE '{value}' is not a number"
                    ))
                })?;
                ConfidencePolicy::at_least(threshold)?
            }
            None => ConfidencePolicy::AcceptAll,
        };

        let max_db_connections = match lookup("ATTENDANCE_MAX_DB_CONNECTIONS") {
            Some(value) => positive("ATTENDANCE_MAX_DB_CONNECTIONS", &value)?,
            None => 5,
        };

        let max_enroll_bytes = match lookup("ATTENDANCE_MAX_ENROLL_BYTES") {
            Some(value) => positive("ATTENDANCE_MAX_ENROLL_BYTES", &value)?,
            None => DEFAULT_MAX_ENROLL_BYTES,
        };

        Ok(Self {
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            listen_addr,
            utc_offset,
            confidence,
            max_db_connections,
            max_enroll_bytes,
        })
    }
}

fn positive<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr + PartialEq + Default,
{
    let invalid = || {
        AttendanceError::InvalidParameter(format!("{key} '{value}' is not a positive integer"))
    };
    let parsed: T = value.trim().parse().map_err(|_| invalid())?;
    if parsed == T::default() {
        return Err(invalid());
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.listen_addr.port(), 8080);
        assert_eq!(config.utc_offset.local_minus_utc(), 0);
        assert_eq!(config.confidence, ConfidencePolicy::AcceptAll);
        assert_eq!(config.max_db_connections, 5);
        assert_eq!(config.max_enroll_bytes, DEFAULT_MAX_ENROLL_BYTES);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn reads_overrides() {
        let config = config_from(&[
            ("ATTENDANCE_UTC_OFFSET", "+05:30"),
            ("ATTENDANCE_MIN_CONFIDENCE", "80"),
            ("ATTENDANCE_LISTEN_ADDR", "127.0.0.1:9000"),
            ("DATABASE_URL", "postgres://localhost/attendance"),
        ])
        .unwrap();
        assert_eq!(config.utc_offset.local_minus_utc(), 19_800);
        assert_eq!(config.confidence, ConfidencePolicy::MinConfidence(80.0));
        assert_eq!(config.listen_addr.port(), 9000);
        assert!(config.database_url.is_some());
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert!(config_from(&[("ATTENDANCE_MIN_CONFIDENCE", "high")]).is_err());
        assert!(config_from(&[("ATTENDANCE_MIN_CONFIDENCE", "140")]).is_err());
        assert!(config_from(&[("ATTENDANCE_UTC_OFFSET", "IST")]).is_err());
        assert!(config_from(&[("ATTENDANCE_LISTEN_ADDR", "nowhere")]).is_err());
    }

    #[test]
    fn zero_sized_limits_are_rejected() {
        assert!(matches!(
            config_from(&[("ATTENDANCE_MAX_DB_CONNECTIONS", "0")]),
            Err(AttendanceError::InvalidParameter(_))
        ));
        assert!(config_from(&[("ATTENDANCE_MAX_DB_CONNECTIONS", "-3")]).is_err());
        assert!(config_from(&[("ATTENDANCE_MAX_ENROLL_BYTES", "0")]).is_err());

        let config = config_from(&[
            ("ATTENDANCE_MAX_DB_CONNECTIONS", "1"),
            ("ATTENDANCE_MAX_ENROLL_BYTES", "1048576"),
        ])
        .unwrap();
        assert_eq!(config.max_db_connections, 1);
        assert_eq!(config.max_enroll_bytes, 1_048_576);
    }
}
