use crate::error::{Result, SyncError};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Root configuration for docsync.
///
/// Every field has a default, so an empty JSON object is a valid
/// configuration.
///
/// # Examples
///
/// ```
/// use docsync_core::config::SyncConfig;
///
/// let json = r#"{
///     "coalescer": { "debounce_ms": 250 },
///     "lifecycle": { "retry_delay_ms": 2000 }
/// }"#;
///
/// let config = SyncConfig::from_json_str(json).unwrap();
/// assert_eq!(config.coalescer.debounce_ms, 250);
/// assert_eq!(config.lifecycle.retry_delay_ms, 2000);
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SyncConfig {
    #[serde(default)]
    pub coalescer: CoalescerConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
}

impl SyncConfig {
    /// Parses configuration from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        Ok(config)
    }

    /// Reads and parses a JSON configuration file.
    pub async fn from_path(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        Self::from_json_str(&raw).map_err(|e| {
            SyncError::InvalidConfig(format!("{}: {}", path.display(), e))
        })
    }
}

/// Write coalescer timing.
///
/// # Defaults
///
/// - `debounce_ms`: `500`
///
/// A zero debounce is legal: the flush starts on the next turn of the
/// coalescer's loop, which still folds writes that are already queued.
#[derive(Debug, Clone, Deserialize)]
pub struct CoalescerConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl CoalescerConfig {
    pub fn with_debounce(debounce: Duration) -> Self {
        Self {
            debounce_ms: debounce.as_millis() as u64,
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

/// Document lifecycle timing.
///
/// # Defaults
///
/// - `retry_delay_ms`: `1000`
#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleConfig {
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl LifecycleConfig {
    pub fn with_retry_delay(delay: Duration) -> Self {
        Self {
            retry_delay_ms: delay.as_millis() as u64,
        }
    }

    /// Delay between a failed load and the next attempt.
    ///
    /// Never zero, so a store that fails instantly cannot spin the lifecycle.
    pub fn retry_delay(&self) -> Duration {
        if self.retry_delay_ms < MIN_RETRY_DELAY_MS {
            tracing::warn!(
                "retry_delay_ms of {} is below the minimum, using {}ms",
                self.retry_delay_ms,
                MIN_RETRY_DELAY_MS
            );
            return Duration::from_millis(MIN_RETRY_DELAY_MS);
        }
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

const MIN_RETRY_DELAY_MS: u64 = 1;

const fn default_debounce_ms() -> u64 {
    500
}

const fn default_retry_delay_ms() -> u64 {
    1000
}
