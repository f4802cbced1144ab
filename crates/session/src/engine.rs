//! Session engine
//!
//! Owns the three upstream clients for one conversation and runs the
//! ingestion pump, the turn orchestrator, the barge-in arbiter, and the
//! dialogue history. Events flow to the transport on a `SessionEvent`
//! channel.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use pitchcall_config::SessionSettings;
use pitchcall_core::{
    ChatRole, ChatTurn, History, ReplyStream, SessionEvent, SpeechRecognizer, SpeechSynthesizer,
};

use crate::queue::InputQueue;
use crate::segmenter::{segment_writer, SegMsg};

/// Engine tuning knobs
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Window in which an identical final is absorbed
    pub debounce: Duration,
    pub max_history: usize,
    pub input_queue_depth: usize,
    /// Bounded wait for a cancelled turn during barge-in
    pub barge_cancel_wait: Duration,
    /// Bounded waits during stop
    pub stop_pump_wait: Duration,
    pub stop_turn_wait: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(220),
            max_history: 64,
            input_queue_depth: 6,
            barge_cancel_wait: Duration::from_millis(500),
            stop_pump_wait: Duration::from_secs(2),
            stop_turn_wait: Duration::from_secs(5),
        }
    }
}

impl SessionConfig {
    pub fn from_settings(settings: &SessionSettings) -> Self {
        Self {
            debounce: Duration::from_millis(settings.debounce_ms),
            max_history: settings.max_history,
            input_queue_depth: settings.input_queue_depth,
            ..Default::default()
        }
    }
}

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Opening,
    Ready,
    Closing,
    Closed,
}

/// History and the debounce bookkeeping share one lock.
struct Dialogue {
    history: History,
    last_final: Option<String>,
    last_final_at: Option<Instant>,
}

pub struct SessionEngine {
    asr: Arc<dyn SpeechRecognizer>,
    llm: Arc<dyn ReplyStream>,
    tts: Arc<dyn SpeechSynthesizer>,
    config: SessionConfig,
    events: mpsc::Sender<SessionEvent>,

    state: parking_lot::Mutex<SessionState>,
    input: Arc<InputQueue>,
    dialogue: Mutex<Dialogue>,
    /// At most one live turn; guarded so start/cancel interleavings serialize
    turn: Mutex<Option<JoinHandle<()>>>,
    /// Non-reentrant arbiter: concurrent barge-ins coalesce
    barge: Mutex<()>,

    pump_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    dispatch_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl SessionEngine {
    pub fn new(
        asr: Arc<dyn SpeechRecognizer>,
        llm: Arc<dyn ReplyStream>,
        tts: Arc<dyn SpeechSynthesizer>,
        config: SessionConfig,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        let input = Arc::new(InputQueue::new(config.input_queue_depth));
        Self {
            asr,
            llm,
            tts,
            events,
            state: parking_lot::Mutex::new(SessionState::Created),
            input,
            dialogue: Mutex::new(Dialogue {
                history: History::with_capacity(config.max_history),
                last_final: None,
                last_final_at: None,
            }),
            turn: Mutex::new(None),
            barge: Mutex::new(()),
            pump_task: parking_lot::Mutex::new(None),
            dispatch_task: parking_lot::Mutex::new(None),
            config,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Dialogue snapshot, oldest first
    pub async fn transcript(&self) -> Vec<ChatTurn> {
        self.dialogue.lock().await.history.snapshot()
    }

    /// Spawn the PCM pump and open the recognizer. Readiness is reached when
    /// this returns Ok.
    pub async fn start(self: Arc<Self>) -> pitchcall_core::Result<()> {
        *self.state.lock() = SessionState::Opening;

        let pump = {
            let asr = self.asr.clone();
            let input = self.input.clone();
            tokio::spawn(async move {
                while let Some(frame) = input.pop().await {
                    asr.send_pcm(frame).await;
                }
                tracing::debug!("pcm pump finished");
            })
        };
        *self.pump_task.lock() = Some(pump);

        let asr_events = self.asr.open().await?;
        *self.state.lock() = SessionState::Ready;

        let this = self.clone();
        let dispatch = tokio::spawn(async move { this.dispatch_asr(asr_events).await });
        *self.dispatch_task.lock() = Some(dispatch);

        Ok(())
    }

    /// Enqueue one microphone frame without blocking. Accepted while the
    /// session is opening or ready; dropped silently otherwise.
    pub fn feed_pcm(&self, pcm: Vec<u8>) {
        match self.state() {
            SessionState::Opening | SessionState::Ready => self.input.push(pcm),
            _ => {}
        }
    }

    /// Route recognition events until the recognizer link closes.
    async fn dispatch_asr(self: Arc<Self>, mut asr_events: mpsc::Receiver<pitchcall_core::AsrEvent>) {
        use pitchcall_core::AsrEvent;

        while let Some(event) = asr_events.recv().await {
            match event {
                AsrEvent::Vad(value) => {
                    let _ = self.events.send(SessionEvent::Vad(value.clone())).await;
                    if is_barge_trigger(&value) {
                        let this = self.clone();
                        tokio::spawn(async move { this.barge_in().await });
                    }
                }
                AsrEvent::Final(text) => self.clone().handle_final(text).await,
            }
        }
        tracing::debug!("recognizer event stream ended");
    }

    /// Debounce, commit to history, notify the transport, and hand the turn
    /// over — cancelling any predecessor first.
    async fn handle_final(self: Arc<Self>, text: String) {
        let now = Instant::now();
        {
            let mut dialogue = self.dialogue.lock().await;
            let duplicate = match (&dialogue.last_final, dialogue.last_final_at) {
                (Some(last), Some(at)) => {
                    now.duration_since(at) < self.config.debounce && text.trim() == last.trim()
                }
                _ => false,
            };
            if duplicate {
                dialogue.last_final_at = Some(now);
                return;
            }
            dialogue.last_final = Some(text.clone());
            dialogue.last_final_at = Some(now);
            dialogue.history.push_user(&text);
        }

        let _ = self.events.send(SessionEvent::AsrFinal(text.clone())).await;

        let mut turn = self.turn.lock().await;
        if let Some(previous) = turn.take() {
            if !previous.is_finished() {
                tracing::info!("new final while turn in flight, cancelling predecessor");
                previous.abort();
            }
        }
        let this = self.clone();
        *turn = Some(tokio::spawn(async move { this.run_turn(text).await }));
    }

    /// One user-final → assistant-reply cycle. Aborting this task cancels
    /// the segmenter and the TTS consumer at their next suspension point;
    /// history is only touched after a normal join.
    async fn run_turn(self: Arc<Self>, user_text: String) {
        let user_text = user_text.trim().to_string();
        if user_text.is_empty() {
            return;
        }

        // The trailing user entry is re-supplied as the live message.
        let history = {
            let dialogue = self.dialogue.lock().await;
            let mut snapshot = dialogue.history.snapshot();
            if matches!(
                snapshot.last(),
                Some(turn) if turn.role == ChatRole::User && turn.content == user_text
            ) {
                snapshot.pop();
            }
            snapshot
        };

        let token_rx = match self.llm.stream_reply(&user_text, &history).await {
            Ok(rx) => rx,
            Err(e) => {
                tracing::error!("reply stream failed to start: {}", e);
                return;
            }
        };

        let (seg_tx, seg_rx) = mpsc::unbounded_channel();
        let writer = segment_writer(token_rx, seg_tx, self.events.clone());
        let consumer = tts_consumer(self.tts.clone(), seg_rx, self.events.clone());
        let (outcome, _) = tokio::join!(writer, consumer);

        let reply = outcome.reply_for_history();
        if !reply.is_empty() {
            self.dialogue.lock().await.history.push_assistant(&reply);
        }
        if outcome.hangup {
            let _ = self.events.send(SessionEvent::Hangup).await;
        }
        let _ = self.events.send(SessionEvent::TurnDone).await;
    }

    /// Arbitrated interruption: cancel the live turn and silence both
    /// generators. Concurrent calls coalesce on the arbiter mutex.
    pub async fn barge_in(self: Arc<Self>) {
        let Ok(_guard) = self.barge.try_lock() else {
            return;
        };

        {
            let mut dialogue = self.dialogue.lock().await;
            if let Some(last) = dialogue.last_final.clone() {
                dialogue.history.push_user(&last);
            }
        }

        let live = { self.turn.lock().await.take() };
        if let Some(handle) = live {
            if !handle.is_finished() {
                tracing::info!("barge-in detected, interrupting agent");
                handle.abort();
                let _ = tokio::time::timeout(self.config.barge_cancel_wait, handle).await;
            }
        }

        self.tts.stop().await;
        self.llm.cancel().await;
    }

    /// Signal end-of-input, drain the pump, and cancel any live turn.
    pub async fn stop(&self) {
        *self.state.lock() = SessionState::Closing;

        self.input.shutdown();
        let pump = self.pump_task.lock().take();
        if let Some(pump) = pump {
            let abort = pump.abort_handle();
            if tokio::time::timeout(self.config.stop_pump_wait, pump)
                .await
                .is_err()
            {
                tracing::warn!("pcm pump did not drain in time, cancelling");
                abort.abort();
            }
        }

        let live = { self.turn.lock().await.take() };
        if let Some(handle) = live {
            handle.abort();
            let _ = tokio::time::timeout(self.config.stop_turn_wait, handle).await;
        }
    }

    /// `stop()` then tear the clients down.
    pub async fn close(&self) {
        self.stop().await;
        self.asr.close().await;
        self.tts.close().await;
        if let Some(dispatch) = self.dispatch_task.lock().take() {
            dispatch.abort();
        }
        *self.state.lock() = SessionState::Closed;
    }
}

/// Pop segments until the terminator, synthesizing each one and forwarding
/// its audio. `AudioStart` precedes the first block of a segment; exactly
/// one `SegmentDone` follows each segment.
async fn tts_consumer(
    tts: Arc<dyn SpeechSynthesizer>,
    mut seg_rx: mpsc::UnboundedReceiver<SegMsg>,
    events: mpsc::Sender<SessionEvent>,
) {
    while let Some(msg) = seg_rx.recv().await {
        let (text, is_final) = match msg {
            SegMsg::Segment { text, is_final } => (text, is_final),
            SegMsg::End => break,
        };

        match tts.synthesize(&text).await {
            Ok(mut audio_rx) => {
                let mut got_audio = false;
                while let Some(block) = audio_rx.recv().await {
                    if block.is_empty() {
                        continue;
                    }
                    if !got_audio {
                        got_audio = true;
                        let _ = events.send(SessionEvent::AudioStart).await;
                    }
                    let _ = events.send(SessionEvent::AudioChunk(block)).await;
                }
            }
            Err(e) => {
                tracing::warn!("synthesis failed for segment: {}", e);
            }
        }
        let _ = events.send(SessionEvent::SegmentDone { is_final }).await;
    }
}

/// Voice-activity events that pre-empt the in-flight reply
fn is_barge_trigger(value: &Value) -> bool {
    let kind = value.get("type").and_then(Value::as_str);
    match kind {
        Some("utterance") => value.get("phase").and_then(Value::as_str) == Some("begin"),
        Some("vad") => value.get("state").and_then(Value::as_str) == Some("speech"),
        _ => false,
    }
}
