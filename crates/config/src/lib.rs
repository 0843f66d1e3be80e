//! Layered settings loading for the voice agent.
//!
//! Priority (highest to lowest):
//! environment variables prefixed `VOICE_AGENT_`, then
//! `config/{env}.yaml`, then `config/default.yaml`, then built-in
//! defaults. Required keys missing after all sources are applied fail
//! loading before the process accepts any connections.

pub mod settings;

pub use settings::{
    load_settings, BackendConfig, BreakerConfig, CarrierConfig, DashboardConfig, LlmConfig,
    Settings, SttConfig, TtsConfig,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    #[error("missing required setting: {0}")]
    MissingField(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
