//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Upstream recognizer configuration
    #[serde(default)]
    pub asr: AsrSettings,

    /// Upstream chat-completion configuration
    #[serde(default)]
    pub llm: LlmSettings,

    /// Upstream synthesizer configuration
    #[serde(default)]
    pub tts: TtsSettings,

    /// Session engine tuning
    #[serde(default)]
    pub session: SessionSettings,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP/WebSocket server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory the browser client is served from
    #[serde(default = "default_static_dir")]
    pub static_dir: String,

    /// Allowed CORS origins; empty with cors_enabled means localhost only
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Disable to allow any origin (development only)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            static_dir: default_static_dir(),
            cors_origins: Vec::new(),
            cors_enabled: true,
        }
    }
}

/// Streaming recognizer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsrSettings {
    /// API key exchanged for the short-lived streaming token
    #[serde(default)]
    pub api_key: String,

    /// WebSocket endpoint for the streaming link
    #[serde(default = "default_asr_url")]
    pub url: String,

    /// HTTP endpoint for the token exchange
    #[serde(default = "default_asr_token_url")]
    pub token_url: String,

    /// Microphone sample rate forwarded in the start frame
    #[serde(default = "default_asr_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_channels")]
    pub channels: u8,
}

impl Default for AsrSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            url: default_asr_url(),
            token_url: default_asr_token_url(),
            sample_rate: default_asr_sample_rate(),
            channels: default_channels(),
        }
    }
}

/// Chat-completion settings (OpenAI-compatible endpoint)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    #[serde(default = "default_llm_model")]
    pub model: String,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_llm_base_url(),
            model: default_llm_model(),
        }
    }
}

/// Synthesizer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsSettings {
    /// Pre-encoded Basic credential
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_tts_url")]
    pub url: String,

    #[serde(default = "default_tts_model")]
    pub model_id: String,

    #[serde(default = "default_tts_voice")]
    pub voice_id: String,

    /// Output sample rate requested from the synthesizer
    #[serde(default = "default_tts_sample_rate")]
    pub sample_rate: u32,
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            url: default_tts_url(),
            model_id: default_tts_model(),
            voice_id: default_tts_voice(),
            sample_rate: default_tts_sample_rate(),
        }
    }
}

/// Session engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Window in which an identical final is absorbed
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Retained history entries
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Bounded microphone queue depth (drop-oldest beyond this)
    #[serde(default = "default_input_queue_depth")]
    pub input_queue_depth: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            max_history: default_max_history(),
            input_queue_depth: default_input_queue_depth(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub log_json: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

fn default_port() -> u16 {
    8080
}

fn default_static_dir() -> String {
    "static".to_string()
}

fn default_true() -> bool {
    true
}

fn default_asr_url() -> String {
    "wss://api.fennec-asr.com/api/v1/transcribe/stream".to_string()
}

fn default_asr_token_url() -> String {
    "https://api.fennec-asr.com/api/v1/transcribe/streaming-token".to_string()
}

fn default_asr_sample_rate() -> u32 {
    16000
}

fn default_channels() -> u8 {
    1
}

fn default_llm_base_url() -> String {
    "https://inference.baseten.co/v1".to_string()
}

fn default_llm_model() -> String {
    "meta-llama/Llama-4-Scout-17B-16E-Instruct".to_string()
}

fn default_tts_url() -> String {
    "https://api.inworld.ai/tts/v1/voice:stream".to_string()
}

fn default_tts_model() -> String {
    "inworld-tts-1".to_string()
}

fn default_tts_voice() -> String {
    "Olivia".to_string()
}

fn default_tts_sample_rate() -> u32 {
    48000
}

fn default_debounce_ms() -> u64 {
    220
}

fn default_max_history() -> usize {
    64
}

fn default_input_queue_depth() -> usize {
    6
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "Port cannot be 0".to_string(),
            });
        }

        if self.asr.sample_rate == 0 {
            return Err(ConfigError::InvalidValue {
                field: "asr.sample_rate".to_string(),
                message: "Sample rate must be positive".to_string(),
            });
        }

        if self.asr.channels == 0 {
            return Err(ConfigError::InvalidValue {
                field: "asr.channels".to_string(),
                message: "Channel count must be at least 1".to_string(),
            });
        }

        if self.session.input_queue_depth == 0 {
            return Err(ConfigError::InvalidValue {
                field: "session.input_queue_depth".to_string(),
                message: "Queue depth must be at least 1".to_string(),
            });
        }

        if self.session.max_history == 0 {
            return Err(ConfigError::InvalidValue {
                field: "session.max_history".to_string(),
                message: "History bound must be at least 1".to_string(),
            });
        }

        Ok(())
    }
}

/// Load settings from files and environment
///
/// Priority (highest to lowest):
/// 1. Environment variables (PITCHCALL prefix, `__` separator)
/// 2. config/default.toml
pub fn load_settings() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("PITCHCALL")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}
