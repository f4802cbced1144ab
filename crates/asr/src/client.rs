//! Recognizer client: token exchange, duplex link, receive loop

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use pitchcall_config::AsrSettings;
use pitchcall_core::{AsrEvent, SpeechRecognizer};

use crate::vad::VadConfig;
use crate::AsrError;

type WsSink = futures::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// How eagerly the recognizer ends a detected thought
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Eagerness {
    Low,
    Medium,
    High,
}

/// Optional thought-detection block of the `start` frame
#[derive(Debug, Clone)]
pub struct ThoughtDetection {
    pub eagerness: Eagerness,
    /// Seconds after which a thought is force-completed
    pub force_complete_time: f32,
    /// Domain context string primed at session start
    pub context: Option<String>,
}

impl Default for ThoughtDetection {
    fn default() -> Self {
        Self {
            eagerness: Eagerness::High,
            force_complete_time: 20.0,
            context: None,
        }
    }
}

/// Recognizer client configuration
#[derive(Debug, Clone)]
pub struct AsrConfig {
    pub api_key: String,
    pub url: String,
    pub token_url: String,
    pub sample_rate: u32,
    pub channels: u8,
    pub vad: VadConfig,
    /// Thought detection is off unless set
    pub thoughts: Option<ThoughtDetection>,
    pub connect_timeout: Duration,
    pub ready_timeout: Duration,
    pub close_timeout: Duration,
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            url: String::new(),
            token_url: String::new(),
            sample_rate: 16000,
            channels: 1,
            vad: VadConfig::default(),
            thoughts: None,
            connect_timeout: Duration::from_secs(15),
            ready_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_millis(1500),
        }
    }
}

impl AsrConfig {
    pub fn from_settings(settings: &AsrSettings) -> Self {
        Self {
            api_key: settings.api_key.clone(),
            url: settings.url.clone(),
            token_url: settings.token_url.clone(),
            sample_rate: settings.sample_rate,
            channels: settings.channels,
            ..Default::default()
        }
    }
}

#[derive(Serialize)]
struct StartFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    sample_rate: u32,
    channels: u8,
    single_utterance: bool,
    vad: &'a VadConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    detect_thoughts: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_thought_eagerness: Option<Eagerness>,
    #[serde(skip_serializing_if = "Option::is_none")]
    force_complete_time: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<&'a str>,
}

struct Link {
    sink: WsSink,
    recv_task: JoinHandle<()>,
}

/// Streaming recognizer client.
///
/// Public API mirrors the link lifecycle: `open()`, `send_pcm()`, `close()`.
pub struct AsrClient {
    config: AsrConfig,
    http: reqwest::Client,
    link: Mutex<Option<Link>>,
    ready_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,
    closed: AtomicBool,
}

impl AsrClient {
    pub fn new(config: AsrConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        let (ready_tx, ready_rx) = watch::channel(false);
        Self {
            config,
            http,
            link: Mutex::new(None),
            ready_tx,
            ready_rx,
            closed: AtomicBool::new(false),
        }
    }

    /// Exchange the API key for a short-lived streaming token.
    async fn fetch_streaming_token(&self) -> Result<String, AsrError> {
        if self.config.api_key.is_empty() {
            return Err(AsrError::Auth(
                "API key is required to obtain a streaming token".to_string(),
            ));
        }

        let resp = self
            .http
            .post(&self.config.token_url)
            .header("X-API-Key", &self.config.api_key)
            .json(&serde_json::json!({}))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(AsrError::Auth(format!(
                "token endpoint returned {}",
                resp.status()
            )));
        }

        let body: Value = resp.json().await.map_err(|e| AsrError::Auth(e.to_string()))?;
        body.get("token")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| AsrError::Auth(format!("token endpoint returned no token: {}", body)))
    }

    /// Open the duplex link and return the recognition event stream.
    pub async fn open(&self) -> Result<mpsc::Receiver<AsrEvent>, AsrError> {
        let mut link = self.link.lock().await;
        if link.is_some() {
            return Err(AsrError::AlreadyOpen);
        }

        tracing::info!(token_url = %self.config.token_url, "requesting streaming token");
        let token = self.fetch_streaming_token().await?;
        let ws_url = url_with_token(&self.config.url, &token)
            .map_err(|e| AsrError::Transport(format!("invalid stream url: {}", e)))?;

        let (stream, _) =
            tokio::time::timeout(self.config.connect_timeout, connect_async(ws_url.as_str()))
                .await
                .map_err(|_| AsrError::ConnectTimeout)??;

        let (mut sink, source) = stream.split();
        let (event_tx, event_rx) = mpsc::channel(64);
        let recv_task = tokio::spawn(recv_loop(source, event_tx, self.ready_tx.clone()));

        let start = StartFrame {
            kind: "start",
            sample_rate: self.config.sample_rate,
            channels: self.config.channels,
            single_utterance: false,
            vad: &self.config.vad,
            detect_thoughts: self.config.thoughts.as_ref().map(|_| true),
            end_thought_eagerness: self.config.thoughts.as_ref().map(|t| t.eagerness),
            force_complete_time: self.config.thoughts.as_ref().map(|t| t.force_complete_time),
            context: self
                .config
                .thoughts
                .as_ref()
                .and_then(|t| t.context.as_deref()),
        };
        let frame = serde_json::to_string(&start)
            .map_err(|e| AsrError::Transport(format!("start frame: {}", e)))?;
        sink.send(Message::Text(frame)).await?;
        tracing::info!(
            thoughts = self.config.thoughts.is_some(),
            "recognizer configured, awaiting ready"
        );

        let mut ready = self.ready_rx.clone();
        match tokio::time::timeout(self.config.ready_timeout, ready.wait_for(|r| *r)).await {
            Ok(Ok(_)) => {}
            Ok(Err(_)) | Err(_) => {
                recv_task.abort();
                return Err(AsrError::ReadyTimeout);
            }
        }

        *link = Some(Link { sink, recv_task });
        Ok(event_rx)
    }

    /// Stream one PCM frame. Blocks until the server is ready; errors after
    /// readiness are logged and swallowed.
    pub async fn send_pcm(&self, pcm: Vec<u8>) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let mut ready = self.ready_rx.clone();
        if ready.wait_for(|r| *r).await.is_err() {
            return;
        }

        let mut link = self.link.lock().await;
        if let Some(link) = link.as_mut() {
            if let Err(e) = link.sink.send(Message::Binary(pcm)).await {
                tracing::warn!("pcm send error: {}", e);
            }
        }
    }

    /// Prime thought detection with the assistant's last reply.
    /// No-op when thought detection is off or the text is empty.
    pub async fn send_ai_context(&self, text: &str) {
        if self.config.thoughts.is_none() {
            return;
        }
        let Some(frame) = ai_context_frame(text) else {
            return;
        };
        let mut ready = self.ready_rx.clone();
        if ready.wait_for(|r| *r).await.is_err() {
            return;
        }
        let mut link = self.link.lock().await;
        if let Some(link) = link.as_mut() {
            if let Err(e) = link.sink.send(Message::Text(frame.to_string())).await {
                tracing::debug!("ai_context send failed: {}", e);
            }
        }
    }

    /// Announce end-of-stream and tear the link down. The receive loop is
    /// given a bounded grace period before it is cancelled.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let link = self.link.lock().await.take();
        if let Some(mut link) = link {
            let _ = link.sink.send(Message::Text(r#"{"type":"eos"}"#.into())).await;
            let _ = link.sink.close().await;

            if tokio::time::timeout(self.config.close_timeout, &mut link.recv_task)
                .await
                .is_err()
            {
                link.recv_task.abort();
            }
        }

        let _ = self.ready_tx.send(false);
        tracing::info!("recognizer stopped");
    }
}

#[async_trait]
impl SpeechRecognizer for AsrClient {
    async fn open(&self) -> pitchcall_core::Result<mpsc::Receiver<AsrEvent>> {
        AsrClient::open(self).await.map_err(Into::into)
    }

    async fn send_pcm(&self, pcm: Vec<u8>) {
        AsrClient::send_pcm(self, pcm).await;
    }

    async fn close(&self) {
        AsrClient::close(self).await;
    }
}

/// Receive loop: dispatch inbound frames until the peer closes the link.
/// Dropping `event_tx` at exit is how downstream learns the link is gone.
async fn recv_loop(
    mut source: futures::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    event_tx: mpsc::Sender<AsrEvent>,
    ready_tx: watch::Sender<bool>,
) {
    while let Some(msg) = source.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(_)) => continue,
            Ok(Message::Close(frame)) => {
                tracing::info!(?frame, "connection closed by server");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!("recv error: {}", e);
                break;
            }
        };

        match classify(&text) {
            Inbound::Ready => {
                let _ = ready_tx.send(true);
                tracing::info!("server ready");
            }
            Inbound::UpstreamError(e) => {
                tracing::error!("upstream error: {}", e);
            }
            Inbound::Vad(value) => {
                if event_tx.send(AsrEvent::Vad(value)).await.is_err() {
                    break;
                }
            }
            Inbound::Final(text) => {
                if event_tx.send(AsrEvent::Final(text)).await.is_err() {
                    break;
                }
            }
            Inbound::Debug(msg) => {
                tracing::debug!("upstream debug: {}", msg);
            }
            Inbound::Ignored => {}
        }
    }
}

/// Classification of one inbound text frame
#[derive(Debug)]
enum Inbound {
    Ready,
    UpstreamError(String),
    Vad(Value),
    Final(String),
    Debug(String),
    Ignored,
}

/// Dispatch an inbound frame by its `type`. Malformed JSON and partial
/// transcripts are ignored.
fn classify(raw: &str) -> Inbound {
    let Ok(value) = serde_json::from_str::<Value>(raw) else {
        return Inbound::Ignored;
    };

    let kind = value.get("type").and_then(Value::as_str);
    if kind == Some("ready") {
        return Inbound::Ready;
    }

    if let Some(err) = value.get("error") {
        return Inbound::UpstreamError(err.to_string());
    }

    if matches!(kind, Some("vad") | Some("utterance")) {
        return Inbound::Vad(value);
    }

    let text = value
        .get("text")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or("");
    if text.is_empty() {
        if let Some(debug) = value.get("debug") {
            return Inbound::Debug(debug.to_string());
        }
        return Inbound::Ignored;
    }

    match kind {
        Some("complete_thought") | Some("corrected_transcript") | Some("final_transcript")
        | None => Inbound::Final(text.to_string()),
        // Partials and anything else carrying text are discarded by design.
        _ => Inbound::Ignored,
    }
}

/// Merge `?streaming_token=<jwt>` into the stream URL, replacing any stale
/// token already present.
fn url_with_token(base: &str, token: &str) -> Result<url::Url, url::ParseError> {
    let mut parsed = url::Url::parse(base)?;
    let retained: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| k != "streaming_token")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    {
        let mut pairs = parsed.query_pairs_mut();
        pairs.clear();
        for (k, v) in &retained {
            pairs.append_pair(k, v);
        }
        pairs.append_pair("streaming_token", token);
    }
    Ok(parsed)
}

/// Build the `ai_context` control frame; `None` when the text is blank.
fn ai_context_frame(text: &str) -> Option<Value> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    Some(serde_json::json!({ "type": "ai_context", "text": text }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_with_token_appends() {
        let url = url_with_token("wss://asr.example.com/v1/stream", "jwt123").unwrap();
        assert_eq!(url.query(), Some("streaming_token=jwt123"));
    }

    #[test]
    fn test_url_with_token_replaces_existing() {
        let url =
            url_with_token("wss://asr.example.com/v1/stream?streaming_token=old&lang=en", "new")
                .unwrap();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("lang".into(), "en".into())));
        assert!(pairs.contains(&("streaming_token".into(), "new".into())));
        assert_eq!(
            pairs.iter().filter(|(k, _)| k == "streaming_token").count(),
            1
        );
    }

    #[test]
    fn test_classify_ready_and_vad() {
        assert!(matches!(classify(r#"{"type":"ready"}"#), Inbound::Ready));
        assert!(matches!(
            classify(r#"{"type":"vad","state":"speech"}"#),
            Inbound::Vad(_)
        ));
        assert!(matches!(
            classify(r#"{"type":"utterance","phase":"begin"}"#),
            Inbound::Vad(_)
        ));
    }

    #[test]
    fn test_classify_finals() {
        assert!(matches!(
            classify(r#"{"type":"final_transcript","text":" hello "}"#),
            Inbound::Final(t) if t == "hello"
        ));
        assert!(matches!(
            classify(r#"{"type":"complete_thought","text":"done"}"#),
            Inbound::Final(_)
        ));
        assert!(matches!(
            classify(r#"{"text":"untyped final"}"#),
            Inbound::Final(_)
        ));
    }

    #[test]
    fn test_classify_discards_partials_and_garbage() {
        assert!(matches!(
            classify(r#"{"type":"partial_transcript","text":"hel"}"#),
            Inbound::Ignored
        ));
        assert!(matches!(classify("not json at all"), Inbound::Ignored));
        assert!(matches!(
            classify(r#"{"type":"final_transcript","text":"   "}"#),
            Inbound::Ignored
        ));
    }

    #[test]
    fn test_classify_error_and_debug() {
        assert!(matches!(
            classify(r#"{"error":"bad frame"}"#),
            Inbound::UpstreamError(_)
        ));
        assert!(matches!(
            classify(r#"{"debug":"queue depth 3"}"#),
            Inbound::Debug(_)
        ));
    }

    #[test]
    fn test_start_frame_omits_thoughts_when_disabled() {
        let config = AsrConfig::default();
        let frame = StartFrame {
            kind: "start",
            sample_rate: config.sample_rate,
            channels: config.channels,
            single_utterance: false,
            vad: &config.vad,
            detect_thoughts: None,
            end_thought_eagerness: None,
            force_complete_time: None,
            context: None,
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "start");
        assert_eq!(value["single_utterance"], false);
        assert!(value.get("detect_thoughts").is_none());
        assert!(value["vad"]["events"].as_bool().unwrap());
    }

    #[test]
    fn test_start_frame_with_thoughts() {
        let thoughts = ThoughtDetection::default();
        let frame = StartFrame {
            kind: "start",
            sample_rate: 16000,
            channels: 1,
            single_utterance: false,
            vad: &VadConfig::default(),
            detect_thoughts: Some(true),
            end_thought_eagerness: Some(thoughts.eagerness),
            force_complete_time: Some(thoughts.force_complete_time),
            context: Some("sales call"),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["detect_thoughts"], true);
        assert_eq!(value["end_thought_eagerness"], "high");
        assert_eq!(value["context"], "sales call");
    }

    #[test]
    fn test_ai_context_frame() {
        assert!(ai_context_frame("  ").is_none());
        let frame = ai_context_frame(" sounds good ").unwrap();
        assert_eq!(frame["type"], "ai_context");
        assert_eq!(frame["text"], "sounds good");
    }
}
