//! Agent configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, AgentResult};

/// Enforcement agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Identifier of the monitored system
    #[serde(default = "default_system_id")]
    pub system_id: String,

    /// Certification authority; standalone when absent
    #[serde(default)]
    pub authority: Option<AuthorityConfig>,

    /// Refuse to start when the authority cannot be reached
    #[serde(default = "default_true")]
    pub fail_closed: bool,

    /// Registration attempts before giving up
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,

    /// Base delay between registration attempts, multiplied by the attempt number
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Telemetry is flushed at this interval or at `telemetry_batch_size`
    #[serde(default = "default_telemetry_interval_ms")]
    pub telemetry_interval_ms: u64,

    #[serde(default = "default_telemetry_batch_size")]
    pub telemetry_batch_size: usize,

    /// JSONL file receiving telemetry that could not be delivered
    #[serde(default = "default_fallback_path")]
    pub fallback_path: Option<PathBuf>,

    /// Upper bound on the final flush during `stop`
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

/// Connection to the certification authority
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorityConfig {
    pub base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl AuthorityConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_system_id() -> String {
    "envelo-system".to_string()
}

fn default_true() -> bool {
    true
}

fn default_reconnect_attempts() -> u32 {
    3
}

fn default_reconnect_delay_ms() -> u64 {
    1_000
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_telemetry_interval_ms() -> u64 {
    5_000
}

fn default_telemetry_batch_size() -> usize {
    100
}

fn default_fallback_path() -> Option<PathBuf> {
    Some(PathBuf::from("envelo-telemetry-fallback.jsonl"))
}

fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_id: default_system_id(),
            authority: None,
            fail_closed: true,
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            telemetry_interval_ms: default_telemetry_interval_ms(),
            telemetry_batch_size: default_telemetry_batch_size(),
            fallback_path: default_fallback_path(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl AgentConfig {
    /// Standalone configuration: no authority, local enforcement only.
    pub fn standalone(system_id: impl Into<String>) -> Self {
        Self {
            system_id: system_id.into(),
            ..Default::default()
        }
    }

    pub fn with_authority(mut self, authority: AuthorityConfig) -> Self {
        self.authority = Some(authority);
        self
    }

    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms.saturating_mul(u64::from(attempt)))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_millis(self.telemetry_interval_ms.max(1))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn validate(&self) -> AgentResult<()> {
        if self.system_id.trim().is_empty() {
            return Err(AgentError::InvalidConfig("system_id must not be empty".into()));
        }
        if self.reconnect_attempts == 0 {
            return Err(AgentError::InvalidConfig(
                "reconnect_attempts must be at least 1".into(),
            ));
        }
        if self.telemetry_batch_size == 0 {
            return Err(AgentError::InvalidConfig(
                "telemetry_batch_size must be at least 1".into(),
            ));
        }
        if let Some(authority) = &self.authority {
            if authority.base_url.trim().is_empty() {
                return Err(AgentError::InvalidConfig(
                    "authority.base_url must not be empty".into(),
                ));
            }
        }
        Ok(())
    }
}
