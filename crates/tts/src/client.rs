//! Synthesizer client

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use pitchcall_config::TtsSettings;
use pitchcall_core::SpeechSynthesizer;

use crate::TtsError;

/// Each line's decoded payload is a complete WAV; the fixed RIFF header is
/// dropped before the PCM is forwarded.
const WAV_HEADER_LEN: usize = 44;

/// Synthesizer configuration
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// Pre-encoded Basic credential
    pub api_key: String,
    pub url: String,
    pub model_id: String,
    pub voice_id: String,
    pub sample_rate: u32,
    pub temperature: f32,
    /// Whole-request budget; synthesis streams well within it
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            url: String::new(),
            model_id: "inworld-tts-1".to_string(),
            voice_id: "Olivia".to_string(),
            sample_rate: 48000,
            temperature: 0.85,
            timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(20),
        }
    }
}

impl TtsConfig {
    pub fn from_settings(settings: &TtsSettings) -> Self {
        Self {
            api_key: settings.api_key.clone(),
            url: settings.url.clone(),
            model_id: settings.model_id.clone(),
            voice_id: settings.voice_id.clone(),
            sample_rate: settings.sample_rate,
            ..Default::default()
        }
    }
}

/// Streaming synthesizer client.
///
/// One connection pool serves every segment of the session; `stop()` aborts
/// the active synthesis without tearing the pool down.
pub struct SpeechClient {
    client: reqwest::Client,
    config: TtsConfig,
    stopping: Arc<AtomicBool>,
    active: Mutex<Option<AbortHandle>>,
}

impl SpeechClient {
    pub fn new(config: TtsConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .build()
            .unwrap_or_default();
        Self {
            client,
            config,
            stopping: Arc::new(AtomicBool::new(false)),
            active: Mutex::new(None),
        }
    }

    /// Synthesize one text segment into streaming PCM blocks.
    pub async fn synthesize(&self, text: &str) -> Result<mpsc::Receiver<Vec<u8>>, TtsError> {
        let (tx, rx) = mpsc::channel(32);
        if text.trim().is_empty() {
            return Ok(rx);
        }

        self.stopping.store(false, Ordering::Release);

        let payload = serde_json::json!({
            "text": text,
            "voiceId": self.config.voice_id,
            "modelId": self.config.model_id,
            "temperature": self.config.temperature,
            "audio_config": {
                "audio_encoding": "LINEAR16",
                "sample_rate_hertz": self.config.sample_rate,
            },
        });

        let response = self
            .client
            .post(&self.config.url)
            .header("Authorization", format!("Basic {}", self.config.api_key))
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(256).collect();
            return Err(TtsError::Api(format!("{}: {}", status, snippet)));
        }

        let stopping = self.stopping.clone();
        let handle = tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut pending = String::new();

            'outer: while let Some(chunk) = stream.next().await {
                if stopping.load(Ordering::Acquire) {
                    break;
                }
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        tracing::debug!("audio stream read error: {}", e);
                        break;
                    }
                };
                pending.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = pending.find('\n') {
                    let line = pending[..pos].trim().to_string();
                    pending.drain(..=pos);

                    if let Some(pcm) = decode_audio_line(&line) {
                        if tx.send(pcm).await.is_err() {
                            break 'outer;
                        }
                    }
                }
            }

            // Trailing line without a newline terminator.
            if !stopping.load(Ordering::Acquire) {
                if let Some(pcm) = decode_audio_line(pending.trim()) {
                    let _ = tx.send(pcm).await;
                }
            }
        });

        *self.active.lock() = Some(handle.abort_handle());
        Ok(rx)
    }

    /// Cooperatively stop the current synthesis and abort its response.
    pub async fn stop(&self) {
        self.stopping.store(true, Ordering::Release);
        if let Some(handle) = self.active.lock().take() {
            handle.abort();
        }
    }

    /// Release the connection pool.
    pub async fn close(&self) {
        self.stop().await;
    }
}

#[async_trait]
impl SpeechSynthesizer for SpeechClient {
    async fn synthesize(&self, text: &str) -> pitchcall_core::Result<mpsc::Receiver<Vec<u8>>> {
        SpeechClient::synthesize(self, text).await.map_err(Into::into)
    }

    async fn stop(&self) {
        SpeechClient::stop(self).await;
    }

    async fn close(&self) {
        SpeechClient::close(self).await;
    }
}

/// Decode one response line into a PCM block.
///
/// Returns `None` for blank lines, lines that fail JSON or base64 parsing,
/// and payloads too short to carry audio past the WAV header.
fn decode_audio_line(line: &str) -> Option<Vec<u8>> {
    if line.is_empty() {
        return None;
    }
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!("skip line, parse error: {}", e);
            return None;
        }
    };
    let data = value.get("result")?.get("audioContent")?.as_str()?;
    let wav = BASE64.decode(data).ok()?;
    if wav.len() > WAV_HEADER_LEN {
        Some(wav[WAV_HEADER_LEN..].to_vec())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio_line(pcm: &[u8]) -> String {
        let mut wav = vec![0u8; WAV_HEADER_LEN];
        wav.extend_from_slice(pcm);
        serde_json::json!({ "result": { "audioContent": BASE64.encode(&wav) } }).to_string()
    }

    #[test]
    fn test_decode_strips_wav_header() {
        let pcm = vec![1u8, 2, 3, 4];
        assert_eq!(decode_audio_line(&audio_line(&pcm)), Some(pcm));
    }

    #[test]
    fn test_decode_rejects_header_only_payload() {
        let wav = vec![0u8; WAV_HEADER_LEN];
        let line =
            serde_json::json!({ "result": { "audioContent": BASE64.encode(&wav) } }).to_string();
        assert_eq!(decode_audio_line(&line), None);
    }

    #[test]
    fn test_decode_skips_junk() {
        assert_eq!(decode_audio_line(""), None);
        assert_eq!(decode_audio_line("not json"), None);
        assert_eq!(decode_audio_line(r#"{"result":{}}"#), None);
        assert_eq!(
            decode_audio_line(r#"{"result":{"audioContent":"!!not-base64!!"}}"#),
            None
        );
    }

    #[tokio::test]
    async fn test_synthesize_blank_text_is_noop() {
        let client = SpeechClient::new(TtsConfig::default());
        let mut rx = client.synthesize("   ").await.unwrap();
        assert!(rx.recv().await.is_none());
    }
}
