// std
use std::num::NonZeroUsize;
use std::time::Duration;
// crates
use serde::{Deserialize, Serialize};
use thiserror::Error;
// internal

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("download pessimism must be at least 1.0, got {0}")]
    DownloadPessimism(f64),
    #[error("verification pessimism must be at least 1.0, got {0}")]
    VerificationPessimism(f64),
    #[error("minimum chunk count must be greater than zero")]
    ZeroMinimumChunkCount,
    #[error("{0} pool size must be greater than zero")]
    ZeroPoolSize(&'static str),
    #[error("control loop period must be greater than zero")]
    ZeroControlLoopPeriod,
    #[error("download order must list every assigned operator exactly once")]
    InvalidDownloadOrder,
}

/// Policy knobs of the distributed retrieval.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    /// Multiplier over the minimum chunk count giving the number of chunks we
    /// want downloading or better. At 2.0 twice the needed chunks are fetched,
    /// assuming some operators will not answer in time.
    pub download_pessimism: f64,
    /// Multiplier over the minimum chunk count giving the number of chunks we
    /// want verifying or better, assuming some operators send invalid data.
    pub verification_pessimism: f64,
    /// Once a download runs this long another operator is scheduled in its
    /// place. The slow download itself keeps going.
    #[serde(with = "humantime_serde")]
    pub pessimistic_timeout: Duration,
    /// Hard limit for a single download. The call is dropped once reached.
    #[serde(with = "humantime_serde")]
    pub download_timeout: Duration,
    /// Cadence of the control loop housekeeping (soft timeout detection).
    #[serde(with = "humantime_serde")]
    pub control_loop_period: Duration,
    pub connection_pool_size: usize,
    pub compute_pool_size: usize,
    /// Emit per operator progress events at debug level.
    pub detailed_logging: bool,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            download_pessimism: 2.0,
            verification_pessimism: 1.0,
            pessimistic_timeout: Duration::from_secs(10),
            download_timeout: Duration::from_secs(30),
            control_loop_period: Duration::from_secs(1),
            connection_pool_size: 32,
            compute_pool_size: std::thread::available_parallelism().map_or(1, NonZeroUsize::get),
            detailed_logging: false,
        }
    }
}

impl RetrievalSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        // negated comparisons so that NaN is rejected too
        if !(self.download_pessimism >= 1.0) {
            return Err(ConfigError::DownloadPessimism(self.download_pessimism));
        }
        if !(self.verification_pessimism >= 1.0) {
            return Err(ConfigError::VerificationPessimism(
                self.verification_pessimism,
            ));
        }
        if self.connection_pool_size == 0 {
            return Err(ConfigError::ZeroPoolSize("connection"));
        }
        if self.compute_pool_size == 0 {
            return Err(ConfigError::ZeroPoolSize("compute"));
        }
        if self.control_loop_period.is_zero() {
            return Err(ConfigError::ZeroControlLoopPeriod);
        }
        Ok(())
    }

    /// Chunks we want in `downloading` state or further along.
    #[must_use]
    pub fn target_download_count(&self, minimum_chunk_count: u32) -> u32 {
        pessimistic_target(minimum_chunk_count, self.download_pessimism)
    }

    /// Chunks we want in `verifying` state or further along.
    #[must_use]
    pub fn target_verified_count(&self, minimum_chunk_count: u32) -> u32 {
        pessimistic_target(minimum_chunk_count, self.verification_pessimism)
    }
}

// pessimism is validated to be >= 1.0 and the cast saturates at u32::MAX
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn pessimistic_target(minimum_chunk_count: u32, pessimism: f64) -> u32 {
    (f64::from(minimum_chunk_count) * pessimism).ceil() as u32
}

#[cfg(test)]
mod test {
    use super::{ConfigError, RetrievalSettings};
    use std::time::Duration;

    #[test]
    fn defaults_are_valid() {
        let settings = RetrievalSettings::default();
        assert!(settings.validate().is_ok());
        assert!(settings.compute_pool_size > 0);
    }

    #[test]
    fn rejects_optimistic_ratios() {
        let settings = RetrievalSettings {
            download_pessimism: 0.99,
            ..Default::default()
        };
        assert_eq!(
            settings.validate(),
            Err(ConfigError::DownloadPessimism(0.99))
        );

        let settings = RetrievalSettings {
            verification_pessimism: 0.5,
            ..Default::default()
        };
        assert_eq!(
            settings.validate(),
            Err(ConfigError::VerificationPessimism(0.5))
        );

        let settings = RetrievalSettings {
            download_pessimism: f64::NAN,
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::DownloadPessimism(_))
        ));
    }

    #[test]
    fn rejects_empty_pools_and_zero_period() {
        let settings = RetrievalSettings {
            compute_pool_size: 0,
            ..Default::default()
        };
        assert_eq!(settings.validate(), Err(ConfigError::ZeroPoolSize("compute")));

        let settings = RetrievalSettings {
            control_loop_period: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(settings.validate(), Err(ConfigError::ZeroControlLoopPeriod));
    }

    #[test]
    fn targets_round_up() {
        let settings = RetrievalSettings {
            download_pessimism: 1.5,
            verification_pessimism: 1.0,
            ..Default::default()
        };
        assert_eq!(settings.target_download_count(7), 11);
        assert_eq!(settings.target_verified_count(7), 7);
    }

    #[test]
    fn deserializes_humantime_durations() {
        let settings: RetrievalSettings = serde_json::from_str(
            r#"{
                "download_pessimism": 3.0,
                "pessimistic_timeout": "250ms",
                "download_timeout": "1m",
                "detailed_logging": true
            }"#,
        )
        .unwrap();
        assert!((settings.download_pessimism - 3.0).abs() < f64::EPSILON);
        assert_eq!(settings.pessimistic_timeout, Duration::from_millis(250));
        assert_eq!(settings.download_timeout, Duration::from_secs(60));
        assert_eq!(settings.control_loop_period, Duration::from_secs(1));
        assert!(settings.detailed_logging);
    }
}
