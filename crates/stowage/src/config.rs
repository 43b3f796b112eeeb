use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StowageError};
use crate::retry::RetryPolicy;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// 1 GiB
pub const DEFAULT_DISK_SPACE_FLOOR: u64 = 1024 * 1024 * 1024;

/// Run configuration, handed to every component at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StowageConfig {
    /// Skip VP9 variants entirely.
    pub exclude_vp9: bool,

    /// Total attempts per fragment and per manifest request, first one included.
    pub retry_limit: u32,

    /// Delay before the first retry; doubles on every further retry.
    #[serde(with = "duration_ms", rename = "retry_backoff_ms")]
    pub retry_backoff: Duration,

    /// Cap for the doubled retry delay.
    #[serde(with = "duration_ms", rename = "retry_backoff_max_ms")]
    pub retry_backoff_max: Duration,

    /// Adds up to half the base delay of random jitter to each retry.
    pub retry_jitter: bool,

    /// Titles in flight and fragment transfers in flight, each.
    pub concurrency: usize,

    /// New titles are not started once free space drops below this many bytes.
    /// `0` disables the check.
    pub disk_space_floor: u64,

    /// Parent directory of all title directories.
    pub output_dir: PathBuf,

    /// Titles whose recorded status is `Done` are not fetched again.
    pub skip_completed: bool,

    pub api: ApiConfig,

    pub transfer: TransferConfig,
}

impl Default for StowageConfig {
    fn default() -> Self {
        Self {
            exclude_vp9: true,
            retry_limit: 3,
            retry_backoff: Duration::from_secs(1),
            retry_backoff_max: Duration::from_secs(30),
            retry_jitter: true,
            concurrency: 4,
            disk_space_floor: DEFAULT_DISK_SPACE_FLOOR,
            output_dir: PathBuf::from("downloads"),
            skip_completed: true,
            api: ApiConfig::default(),
            transfer: TransferConfig::default(),
        }
    }
}

impl StowageConfig {
    pub fn validate(&self) -> Result<()> {
        if self.retry_limit == 0 {
            return Err(StowageError::configuration(
                "retry_limit must allow at least one attempt",
            ));
        }
        if self.concurrency == 0 {
            return Err(StowageError::configuration("concurrency must be at least 1"));
        }
        if self.retry_backoff > self.retry_backoff_max {
            return Err(StowageError::configuration(
                "retry_backoff must not exceed retry_backoff_max",
            ));
        }
        if let TransferConfig::Command { program, .. } = &self.transfer
            && program.trim().is_empty()
        {
            return Err(StowageError::configuration(
                "transfer command program must not be empty",
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_limit,
            base_delay: self.retry_backoff,
            max_delay: self.retry_backoff_max,
            jitter: self.retry_jitter,
        }
    }
}

/// Where titles are looked up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the title API. Required by the HTTP source.
    pub base_url: Option<String>,

    /// Metadata endpoint relative to `base_url`; `{id}` is replaced by the title id.
    pub metadata_path: String,

    /// Field of the metadata document holding the top manifest URL.
    /// Dotted paths (`stream.url`) reach into nested objects.
    pub manifest_url_field: String,

    pub user_agent: String,

    pub referer: Option<String>,

    /// Extra request headers.
    pub headers: BTreeMap<String, String>,

    /// Timeout for API and playlist requests.
    #[serde(with = "duration_secs", rename = "timeout_secs")]
    pub timeout: Duration,

    /// Timeout for a single fragment transfer.
    #[serde(with = "duration_secs", rename = "transfer_timeout_secs")]
    pub transfer_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            metadata_path: "api/titles/{id}".to_string(),
            manifest_url_field: "videoStreamUrl".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            referer: None,
            headers: BTreeMap::new(),
            timeout: Duration::from_secs(30),
            transfer_timeout: Duration::from_secs(300),
        }
    }
}

/// How fragment bytes are moved to disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransferConfig {
    /// Built-in streaming HTTP client.
    #[default]
    Http,
    /// External download manager. `{url}` and `{output}` in `args` are
    /// replaced per fragment.
    Command { program: String, args: Vec<String> },
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StowageConfig::default();
        assert!(config.exclude_vp9);
        assert_eq!(config.retry_limit, 3);
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.disk_space_floor, DEFAULT_DISK_SPACE_FLOOR);
        assert_eq!(config.transfer, TransferConfig::Http);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config: StowageConfig = serde_json::from_value(serde_json::json!({
            "exclude_vp9": false,
            "retry_backoff_ms": 250,
            "api": { "base_url": "https://api.example.com/" },
            "transfer": { "kind": "command", "program": "aria2c", "args": ["-o", "{output}", "{url}"] }
        }))
        .unwrap();

        assert!(!config.exclude_vp9);
        assert_eq!(config.retry_backoff, Duration::from_millis(250));
        assert_eq!(config.retry_limit, 3);
        assert_eq!(config.api.manifest_url_field, "videoStreamUrl");
        assert_eq!(
            config.transfer,
            TransferConfig::Command {
                program: "aria2c".to_string(),
                args: vec!["-o".into(), "{output}".into(), "{url}".into()],
            }
        );
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let config = StowageConfig {
            retry_limit: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(StowageError::Configuration { .. })
        ));

        let config = StowageConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = StowageConfig {
            retry_limit: 5,
            retry_backoff: Duration::from_millis(10),
            ..Default::default()
        };
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(10));
    }
}
