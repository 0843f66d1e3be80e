//! `Settings` — the process-wide configuration loaded once at startup.
//!
//! Uses the same `config::{Config, Environment, File}` layered loading
//! as `config/src/settings.rs::load_settings`, scoped down to what
//! this agent's components actually read: the backend RPC client, the
//! LLM/STT/TTS vendor credentials, the carrier credentials, the
//! dashboard webhook endpoints, and the ambient server/logging/breaker
//! knobs.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Top-level settings, loaded once in `main` and shared read-only
/// across every `Call`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub llm: LlmConfig,
    pub stt: SttConfig,
    pub tts: TtsConfig,
    pub carrier: CarrierConfig,
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub dialog: DialogTimingConfig,
    #[serde(default)]
    pub log_level: LogLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// HTTP admin surface: bind address, metrics, timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
    #[serde(default = "default_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_ws_path() -> String {
    "/ws/media".to_string()
}
fn default_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ws_path: default_ws_path(),
            request_timeout_seconds: default_timeout(),
        }
    }
}

/// Required: the external booking/dispatch backend.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BackendConfig {
    pub base_url: String,
    pub api_key: String,
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
}

fn default_rpc_timeout_ms() -> u64 {
    5000
}

/// Required: the main dialog LLM.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    pub api_key: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

/// Required: the streaming STT vendor (interface-only — no
/// on-device speech model).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SttConfig {
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Required: primary + fallback TTS vendor credentials.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TtsConfig {
    pub primary_api_key: String,
    pub fallback_api_key: String,
    #[serde(default = "default_primary_voice")]
    pub primary_voice_id: String,
    #[serde(default = "default_fallback_voice")]
    pub fallback_voice_id: String,
}

fn default_primary_voice() -> String {
    "default".to_string()
}
fn default_fallback_voice() -> String {
    "default".to_string()
}

/// Required: carrier (e.g. Twilio-equivalent) credentials for the
/// inbound WebSocket media stream.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CarrierConfig {
    pub account_sid: String,
    pub auth_token: String,
}

/// Required: dashboard webhook endpoints + shared secret.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DashboardConfig {
    pub job_webhook_url: String,
    pub call_webhook_url: String,
    pub emergency_webhook_url: String,
    pub webhook_secret: String,
    #[serde(default = "default_webhook_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Attributed to every job/call/alert payload; empty if unset.
    #[serde(default)]
    pub user_email: String,
}

fn default_webhook_retry_delay_ms() -> u64 {
    2000
}

/// Optional: circuit breaker tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_failure_threshold() -> u32 {
    3
}
fn default_cooldown_secs() -> u64 {
    60
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

/// Optional: dialog-layer debounce/delay timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogTimingConfig {
    #[serde(default = "default_extraction_debounce_ms")]
    pub extraction_debounce_ms: u64,
    #[serde(default = "default_extraction_debounce_cap_ms")]
    pub extraction_debounce_cap_ms: u64,
    #[serde(default = "default_global_turn_limit")]
    pub global_turn_limit: u32,
    #[serde(default = "default_state_turn_limit")]
    pub state_turn_limit: u32,
}

fn default_extraction_debounce_ms() -> u64 {
    1500
}
fn default_extraction_debounce_cap_ms() -> u64 {
    5000
}
fn default_global_turn_limit() -> u32 {
    40
}
fn default_state_turn_limit() -> u32 {
    8
}

impl Default for DialogTimingConfig {
    fn default() -> Self {
        Self {
            extraction_debounce_ms: default_extraction_debounce_ms(),
            extraction_debounce_cap_ms: default_extraction_debounce_cap_ms(),
            global_turn_limit: default_global_turn_limit(),
            state_turn_limit: default_state_turn_limit(),
        }
    }
}

impl Settings {
    /// Fail-fast validation: every field above without a `#[serde(default...)]`
    /// must be non-empty once all sources are merged.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("backend.base_url", &self.backend.base_url),
            ("backend.api_key", &self.backend.api_key),
            ("llm.api_key", &self.llm.api_key),
            ("stt.api_key", &self.stt.api_key),
            ("tts.primary_api_key", &self.tts.primary_api_key),
            ("tts.fallback_api_key", &self.tts.fallback_api_key),
            ("carrier.account_sid", &self.carrier.account_sid),
            ("carrier.auth_token", &self.carrier.auth_token),
            ("dashboard.job_webhook_url", &self.dashboard.job_webhook_url),
            ("dashboard.call_webhook_url", &self.dashboard.call_webhook_url),
            (
                "dashboard.emergency_webhook_url",
                &self.dashboard.emergency_webhook_url,
            ),
            ("dashboard.webhook_secret", &self.dashboard.webhook_secret),
        ];

        for (field, value) in required {
            if value.is_empty() {
                return Err(ConfigError::MissingField(field.to_string()));
            }
        }

        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "port cannot be 0".to_string(),
            });
        }

        Ok(())
    }
}

/// Load settings from files and environment.
///
/// Priority (highest to lowest): `VOICE_AGENT_`-prefixed environment
/// variables, `config/{env}.yaml`, `config/default.yaml`, struct
/// defaults. `env` is typically `development`/`staging`/`production`.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("VOICE_AGENT")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_settings() -> Settings {
        Settings {
            server: ServerConfig::default(),
            backend: BackendConfig {
                base_url: "https://backend.example.com".to_string(),
                api_key: "k".to_string(),
                rpc_timeout_ms: 5000,
            },
            llm: LlmConfig {
                api_key: "k".to_string(),
                model: default_llm_model(),
                base_url: default_llm_base_url(),
            },
            stt: SttConfig {
                api_key: "k".to_string(),
                base_url: None,
            },
            tts: TtsConfig {
                primary_api_key: "k".to_string(),
                fallback_api_key: "k".to_string(),
                primary_voice_id: default_primary_voice(),
                fallback_voice_id: default_fallback_voice(),
            },
            carrier: CarrierConfig {
                account_sid: "AC1".to_string(),
                auth_token: "secret".to_string(),
            },
            dashboard: DashboardConfig {
                job_webhook_url: "https://dash.example.com/job".to_string(),
                call_webhook_url: "https://dash.example.com/call".to_string(),
                emergency_webhook_url: "https://dash.example.com/emergency".to_string(),
                webhook_secret: "shh".to_string(),
                retry_delay_ms: default_webhook_retry_delay_ms(),
                user_email: String::new(),
            },
            breaker: BreakerConfig::default(),
            dialog: DialogTimingConfig::default(),
            log_level: LogLevel::default(),
        }
    }

    #[test]
    fn complete_settings_validate_ok() {
        assert!(complete_settings().validate().is_ok());
    }

    #[test]
    fn missing_backend_api_key_fails_fast() {
        let mut s = complete_settings();
        s.backend.api_key = String::new();
        let err = s.validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(f) if f == "backend.api_key"));
    }

    #[test]
    fn missing_dashboard_webhook_secret_fails_fast() {
        let mut s = complete_settings();
        s.dashboard.webhook_secret = String::new();
        assert!(s.validate().is_err());
    }

    #[test]
    fn zero_port_is_rejected() {
        let mut s = complete_settings();
        s.server.port = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn breaker_defaults_match_spec() {
        let b = BreakerConfig::default();
        assert_eq!(b.failure_threshold, 3);
        assert_eq!(b.cooldown_secs, 60);
    }
}
