//! Runtime settings
//!
//! Defaults come from the embedded config.toml; the API key and any
//! overrides come from the environment. A local .env file is honored
//! (loaded by main before settings are read).

use crate::error::AppError;
use serde::Deserialize;
use std::env;
use std::fmt;
use zeroize::Zeroize;

/// Embedded default configuration
const DEFAULT_CONFIG: &str = include_str!("../config.toml");

/// Environment variable holding the service API key
const API_KEY_VAR: &str = "API_KEY";

/// Optional environment override for the capture device prefix
const DEVICE_PREFIX_VAR: &str = "LIVESCRIBE_DEVICE_PREFIX";

/// Optional environment override for the service endpoint
const ENDPOINT_VAR: &str = "LIVESCRIBE_ENDPOINT";

/// config.toml layout
#[derive(Debug, Deserialize)]
struct ConfigFile {
    service: ServiceSection,
    capture: CaptureSection,
}

#[derive(Debug, Deserialize)]
struct ServiceSection {
    endpoint: String,
    sample_rate: u32,
    end_utterance_silence_ms: u32,
}

#[derive(Debug, Deserialize)]
struct CaptureSection {
    device_prefix: String,
}

/// API key wrapper that clears its memory on drop
pub(crate) struct ApiKey(String);

impl ApiKey {
    pub(crate) fn new(key: String) -> Self {
        Self(key)
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

impl Drop for ApiKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Resolved runtime settings
#[derive(Debug)]
pub(crate) struct Settings {
    /// Service API key, required
    pub api_key: ApiKey,
    /// WebSocket endpoint of the transcription service
    pub endpoint: String,
    /// Sample rate the audio is streamed at, in Hz
    pub sample_rate: u32,
    /// Silence duration after which the service finalizes an utterance
    pub end_utterance_silence_ms: u32,
    /// Name prefix used to pick the capture device
    pub device_prefix: String,
}

impl Settings {
    /// Load settings from the embedded defaults and the environment
    ///
    /// A missing API key is a configuration error; everything else falls
    /// back to the defaults in config.toml.
    pub(crate) fn load() -> Result<Self, AppError> {
        Self::from_sources(
            DEFAULT_CONFIG,
            env::var(API_KEY_VAR).ok(),
            env::var(ENDPOINT_VAR).ok(),
            env::var(DEVICE_PREFIX_VAR).ok(),
        )
    }

    fn from_sources(
        raw_config: &str,
        api_key: Option<String>,
        endpoint_override: Option<String>,
        device_prefix_override: Option<String>,
    ) -> Result<Self, AppError> {
        let file: ConfigFile = toml::from_str(raw_config)
            .map_err(|e| AppError::Config(format!("invalid config.toml: {}", e)))?;

        let api_key = api_key
            .filter(|k| !k.trim().is_empty())
            .map(ApiKey::new)
            .ok_or_else(|| {
                AppError::Config(format!(
                    "{} is not set - add it to the environment or a .env file",
                    API_KEY_VAR
                ))
            })?;

        Ok(Self {
            api_key,
            endpoint: endpoint_override.unwrap_or(file.service.endpoint),
            sample_rate: file.service.sample_rate,
            end_utterance_silence_ms: file.service.end_utterance_silence_ms,
            device_prefix: device_prefix_override.unwrap_or(file.capture.device_prefix),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse() {
        let settings =
            Settings::from_sources(DEFAULT_CONFIG, Some("secret".to_string()), None, None)
                .unwrap();
        assert_eq!(settings.sample_rate, 44100);
        assert_eq!(settings.end_utterance_silence_ms, 500);
        assert_eq!(settings.device_prefix, "BlackHole");
        assert!(settings.endpoint.starts_with("wss://"));
    }

    #[test]
    fn missing_api_key_is_config_error() {
        let result = Settings::from_sources(DEFAULT_CONFIG, None, None, None);
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn blank_api_key_is_config_error() {
        let result = Settings::from_sources(DEFAULT_CONFIG, Some("  ".to_string()), None, None);
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn overrides_win_over_defaults() {
        let settings = Settings::from_sources(
            DEFAULT_CONFIG,
            Some("secret".to_string()),
            Some("wss://example.test/stream".to_string()),
            Some("USB Microphone".to_string()),
        )
        .unwrap();
        assert_eq!(settings.endpoint, "wss://example.test/stream");
        assert_eq!(settings.device_prefix, "USB Microphone");
    }

    #[test]
    fn api_key_debug_is_redacted() {
        let key = ApiKey::new("very-secret".to_string());
        assert_eq!(format!("{:?}", key), "ApiKey(***)");
    }
}
