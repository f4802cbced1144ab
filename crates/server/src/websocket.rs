//! WebSocket transport adapter
//!
//! One session engine per connection: binary inbound frames are microphone
//! PCM, text frames are control messages, and session events stream back as
//! JSON frames plus binary synthesized audio.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;

use pitchcall_asr::{AsrClient, AsrConfig};
use pitchcall_core::{
    ClientMessage, PersonaId, ReplyStream, ServerEvent, SessionEvent, SpeechRecognizer,
    SpeechSynthesizer,
};
use pitchcall_llm::{persona_prompt, ChatClient, LlmConfig};
use pitchcall_session::{SessionConfig, SessionEngine};
use pitchcall_tts::{SpeechClient, TtsConfig};

use crate::metrics;
use crate::state::AppState;

/// Grace period for the client's final-audio acknowledgment after a hangup
const HANGUP_ACK_TIMEOUT: Duration = Duration::from_secs(6);

type WsSender = Arc<Mutex<futures::stream::SplitSink<WebSocket, Message>>>;

/// Handle WebSocket upgrade at `/ws/agent`
pub async fn ws_agent(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_event(sender: &WsSender, event: &ServerEvent) {
    let json = serde_json::to_string(event).unwrap();
    let mut s = sender.lock().await;
    let _ = s.send(Message::Text(json)).await;
}

fn build_session(
    state: &AppState,
    persona: PersonaId,
) -> (Arc<SessionEngine>, mpsc::Receiver<SessionEvent>) {
    let config = &state.config;
    let asr: Arc<dyn SpeechRecognizer> =
        Arc::new(AsrClient::new(AsrConfig::from_settings(&config.asr)));
    let llm: Arc<dyn ReplyStream> = Arc::new(ChatClient::new(
        LlmConfig::from_settings(&config.llm),
        persona_prompt(persona),
    ));
    let tts: Arc<dyn SpeechSynthesizer> =
        Arc::new(SpeechClient::new(TtsConfig::from_settings(&config.tts)));

    let (event_tx, event_rx) = mpsc::channel(256);
    let engine = Arc::new(SessionEngine::new(
        asr,
        llm,
        tts,
        SessionConfig::from_settings(&config.session),
        event_tx,
    ));
    (engine, event_rx)
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let session_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(session_id = %session_id, "transport connected");

    let (sender, mut receiver) = socket.split();
    let sender: WsSender = Arc::new(Mutex::new(sender));

    send_event(&sender, &ServerEvent::status("connected")).await;

    let mut engine: Option<Arc<SessionEngine>> = None;
    let mut forwarder: Option<JoinHandle<()>> = None;
    let mut started = false;
    // Set once the model hung up; inbound audio is ignored from then on.
    let hangup_requested = Arc::new(AtomicBool::new(false));
    let finish = Arc::new(Notify::new());

    loop {
        let msg = tokio::select! {
            _ = finish.notified() => {
                send_event(&sender, &ServerEvent::Done).await;
                break;
            }
            msg = receiver.next() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        match msg {
            Ok(Message::Binary(data)) => {
                if started && !hangup_requested.load(Ordering::Acquire) {
                    if let Some(engine) = &engine {
                        engine.feed_pcm(data);
                    }
                }
            }
            Ok(Message::Text(text)) => {
                let parsed = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        tracing::warn!(session_id = %session_id, "bad client frame: {}", e);
                        continue;
                    }
                };

                match parsed {
                    ClientMessage::Start { persona } => {
                        if started {
                            continue;
                        }
                        tracing::info!(session_id = %session_id, %persona, "starting session");
                        send_event(&sender, &ServerEvent::status("initializing")).await;

                        let (new_engine, event_rx) = build_session(&state, persona);
                        match new_engine.clone().start().await {
                            Ok(()) => {
                                metrics::record_session_started();
                                forwarder = Some(tokio::spawn(forward_events(
                                    event_rx,
                                    sender.clone(),
                                    hangup_requested.clone(),
                                    finish.clone(),
                                )));
                                engine = Some(new_engine);
                                started = true;
                                send_event(&sender, &ServerEvent::status("ready")).await;
                            }
                            Err(e) => {
                                tracing::error!(session_id = %session_id, "session start failed: {}", e);
                                send_event(&sender, &ServerEvent::error(&e)).await;
                                new_engine.close().await;
                                break;
                            }
                        }
                    }
                    ClientMessage::Stop => {
                        if let Some(engine) = &engine {
                            engine.stop().await;
                        }
                        send_event(&sender, &ServerEvent::Done).await;
                        break;
                    }
                    ClientMessage::FinalAudioComplete => {
                        if hangup_requested.load(Ordering::Acquire) {
                            send_event(&sender, &ServerEvent::Done).await;
                            break;
                        }
                    }
                }
            }
            Ok(Message::Ping(data)) => {
                let mut s = sender.lock().await;
                let _ = s.send(Message::Pong(data)).await;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(session_id = %session_id, "transport error: {}", e);
                break;
            }
        }
    }

    if let Some(engine) = engine {
        engine.close().await;
    }
    if let Some(task) = forwarder {
        task.abort();
    }
    tracing::info!(session_id = %session_id, "transport closed");
}

/// Serialize session events onto the socket. Raw VAD objects pass through
/// verbatim; synthesized audio goes out as binary frames.
async fn forward_events(
    mut events: mpsc::Receiver<SessionEvent>,
    sender: WsSender,
    hangup_requested: Arc<AtomicBool>,
    finish: Arc<Notify>,
) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::AudioChunk(pcm) => {
                let mut s = sender.lock().await;
                if s.send(Message::Binary(pcm)).await.is_err() {
                    break;
                }
            }
            SessionEvent::Vad(value) => {
                let mut s = sender.lock().await;
                let _ = s.send(Message::Text(value.to_string())).await;
            }
            SessionEvent::AsrFinal(text) => {
                metrics::record_asr_final();
                send_event(&sender, &ServerEvent::AsrFinal { text }).await;
            }
            SessionEvent::LlmToken(text) => {
                send_event(&sender, &ServerEvent::LlmToken { text }).await;
            }
            SessionEvent::AudioStart => {
                send_event(&sender, &ServerEvent::AudioStart).await;
            }
            SessionEvent::SegmentDone { is_final } => {
                send_event(&sender, &ServerEvent::SegmentDone { is_final }).await;
            }
            SessionEvent::TurnDone => {
                metrics::record_turn_done();
                send_event(&sender, &ServerEvent::TurnDone).await;
            }
            SessionEvent::Hangup => {
                metrics::record_hangup();
                hangup_requested.store(true, Ordering::Release);
                send_event(&sender, &ServerEvent::Hangup { reason: None }).await;

                // The client gets a bounded window to finish playback and ack.
                let finish = finish.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(HANGUP_ACK_TIMEOUT).await;
                    finish.notify_one();
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_frame_parsing() {
        let start: ClientMessage = serde_json::from_str(r#"{"type":"start","persona":"A"}"#).unwrap();
        assert!(matches!(start, ClientMessage::Start { .. }));

        let stop: ClientMessage = serde_json::from_str(r#"{"type":"stop"}"#).unwrap();
        assert!(matches!(stop, ClientMessage::Stop));

        let ack: ClientMessage = serde_json::from_str(r#"{"type":"final_audio_complete"}"#).unwrap();
        assert!(matches!(ack, ClientMessage::FinalAudioComplete));

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"bogus"}"#).is_err());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ServerEvent::status("ready")).unwrap();
        assert_eq!(json, r#"{"type":"status","message":"ready"}"#);

        let json = serde_json::to_string(&ServerEvent::error("auth failed")).unwrap();
        assert_eq!(json, r#"{"type":"status","message":"error: auth failed"}"#);
    }
}
