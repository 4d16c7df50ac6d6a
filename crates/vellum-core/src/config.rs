use std::time::Duration;

use serde::{Deserialize, Serialize};
use vellum_codec::DEFAULT_COMPRESSION_LEVEL;
use vellum_store::{ChunkedConfig, ReservationPolicy, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_RECORD_BYTES};
use vellum_types::Deadline;

use crate::error::{CoreError, CoreResult};

/// Tunables for the content store and its backends.
///
/// Every field has a default, so a TOML document only needs the keys it
/// changes. Durations are spelled out in their unit to keep the TOML flat.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Largest chunk written by the chunked backend.
    pub chunk_size: usize,
    /// Per-record size limit of the chunked backend's collections.
    pub max_record_bytes: u64,
    /// Threads used to write one record's chunks.
    pub write_parallelism: usize,
    /// zstd level used at ingest.
    pub compression_level: i32,
    /// How long a reservation stays exclusive without a commit.
    pub reservation_ttl_secs: u64,
    /// Claim attempts before a reserve gives up.
    pub max_reserve_attempts: u32,
    pub backoff_base_micros: u64,
    pub backoff_max_millis: u64,
    /// Deadline applied by convenience calls; `0` means no deadline.
    pub operation_timeout_millis: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_record_bytes: DEFAULT_MAX_RECORD_BYTES,
            write_parallelism: 4,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            reservation_ttl_secs: 24 * 60 * 60,
            max_reserve_attempts: 1024,
            backoff_base_micros: 200,
            backoff_max_millis: 20,
            operation_timeout_millis: 30_000,
        }
    }
}

impl StoreConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> CoreResult<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CoreResult<()> {
        self.chunked()
            .validate()
            .map_err(|e| CoreError::InvalidConfig(e.to_string()))?;
        if !(1..=22).contains(&self.compression_level) {
            return Err(CoreError::InvalidConfig(format!(
                "compression_level {} is outside 1..=22",
                self.compression_level
            )));
        }
        if self.reservation_ttl_secs == 0 {
            return Err(CoreError::InvalidConfig(
                "reservation_ttl_secs must be positive".into(),
            ));
        }
        if self.max_reserve_attempts == 0 {
            return Err(CoreError::InvalidConfig(
                "max_reserve_attempts must be positive".into(),
            ));
        }
        if Duration::from_micros(self.backoff_base_micros)
            > Duration::from_millis(self.backoff_max_millis)
        {
            return Err(CoreError::InvalidConfig(
                "backoff_base_micros exceeds backoff_max_millis".into(),
            ));
        }
        Ok(())
    }

    pub fn chunked(&self) -> ChunkedConfig {
        ChunkedConfig {
            chunk_size: self.chunk_size,
            max_record_bytes: self.max_record_bytes,
            write_parallelism: self.write_parallelism,
        }
    }

    pub fn reservation_policy(&self) -> ReservationPolicy {
        ReservationPolicy {
            ttl: Duration::from_secs(self.reservation_ttl_secs),
            max_attempts: self.max_reserve_attempts,
            backoff_base: Duration::from_micros(self.backoff_base_micros),
            backoff_max: Duration::from_millis(self.backoff_max_millis),
        }
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        (self.operation_timeout_millis > 0)
            .then(|| Duration::from_millis(self.operation_timeout_millis))
    }

    /// A deadline starting now from `operation_timeout_millis`.
    pub fn deadline(&self) -> Deadline {
        self.operation_timeout()
            .map_or_else(Deadline::never, Deadline::after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = StoreConfig::default();
        assert_eq!(c.chunk_size, 15 << 20);
        assert_eq!(c.max_record_bytes, 16 << 20);
        assert_eq!(c.compression_level, 3);
        assert_eq!(c.max_reserve_attempts, 1024);
        assert_eq!(c.operation_timeout(), Some(Duration::from_secs(30)));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let c = StoreConfig::from_toml_str(
            r#"
            chunk_size = 4096
            max_record_bytes = 8192
            operation_timeout_millis = 0
            "#,
        )
        .unwrap();
        assert_eq!(c.chunk_size, 4096);
        assert_eq!(c.max_record_bytes, 8192);
        assert_eq!(c.operation_timeout(), None);
        assert!(!c.deadline().is_expired());
        assert_eq!(c.reservation_ttl_secs, 24 * 60 * 60);
    }

    #[test]
    fn reservation_policy_conversion() {
        let c = StoreConfig {
            reservation_ttl_secs: 60,
            max_reserve_attempts: 8,
            backoff_base_micros: 100,
            backoff_max_millis: 5,
            ..StoreConfig::default()
        };
        let policy = c.reservation_policy();
        assert_eq!(policy.ttl, Duration::from_secs(60));
        assert_eq!(policy.max_attempts, 8);
        assert_eq!(policy.backoff_base, Duration::from_micros(100));
        assert_eq!(policy.backoff_max, Duration::from_millis(5));
    }

    #[test]
    fn rejects_chunk_larger_than_record_limit() {
        let err = StoreConfig::from_toml_str("chunk_size = 20000000").unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_zero_values() {
        for bad in [
            StoreConfig {
                chunk_size: 0,
                ..StoreConfig::default()
            },
            StoreConfig {
                max_reserve_attempts: 0,
                ..StoreConfig::default()
            },
            StoreConfig {
                reservation_ttl_secs: 0,
                ..StoreConfig::default()
            },
            StoreConfig {
                compression_level: 0,
                ..StoreConfig::default()
            },
            StoreConfig {
                backoff_base_micros: 50_000,
                ..StoreConfig::default()
            },
        ] {
            assert!(bad.validate().is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = StoreConfig::from_toml_str("chunk_size = \"big\"").unwrap_err();
        assert!(matches!(err, CoreError::ConfigParse(_)));
    }

    #[test]
    fn toml_round_trip() {
        let c = StoreConfig::default();
        let text = toml::to_string(&c).unwrap();
        assert_eq!(StoreConfig::from_toml_str(&text).unwrap(), c);
    }
}
