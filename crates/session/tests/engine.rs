//! Session engine behavior against in-memory clients

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use pitchcall_core::{
    AsrEvent, ChatRole, ChatTurn, ReplyStream, Result, SessionEvent, SpeechRecognizer,
    SpeechSynthesizer,
};
use pitchcall_session::{SessionConfig, SessionEngine, SessionState};

struct FakeRecognizer {
    pending: Mutex<Option<mpsc::Receiver<AsrEvent>>>,
    received: Mutex<Vec<Vec<u8>>>,
    closed: AtomicBool,
}

impl FakeRecognizer {
    fn new() -> (Arc<Self>, mpsc::Sender<AsrEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let recognizer = Arc::new(Self {
            pending: Mutex::new(Some(rx)),
            received: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        (recognizer, tx)
    }
}

#[async_trait]
impl SpeechRecognizer for FakeRecognizer {
    async fn open(&self) -> Result<mpsc::Receiver<AsrEvent>> {
        Ok(self.pending.lock().take().expect("opened twice"))
    }

    async fn send_pcm(&self, pcm: Vec<u8>) {
        self.received.lock().push(pcm);
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

struct FakeLlm {
    scripts: Mutex<VecDeque<Vec<&'static str>>>,
    fallback: Vec<&'static str>,
    token_delay: Duration,
    calls: AtomicUsize,
    cancels: AtomicUsize,
}

impl FakeLlm {
    fn scripted(scripts: Vec<Vec<&'static str>>, token_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            fallback: vec!["make it ", "quick?"],
            token_delay,
            calls: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
        })
    }

    fn quick() -> Arc<Self> {
        Self::scripted(Vec::new(), Duration::ZERO)
    }
}

#[async_trait]
impl ReplyStream for FakeLlm {
    async fn stream_reply(
        &self,
        _user_text: &str,
        _history: &[ChatTurn],
    ) -> Result<mpsc::Receiver<String>> {
        self.calls.fetch_add(1, Ordering::AcqRel);
        let tokens: Vec<String> = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
            .into_iter()
            .map(str::to_owned)
            .collect();
        let delay = self.token_delay;
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for token in tokens {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if tx.send(token).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::AcqRel);
    }
}

struct FakeTts {
    spoken: Mutex<Vec<String>>,
    stops: AtomicUsize,
    blocks_per_segment: usize,
    block_delay: Duration,
    stop_delay: Duration,
}

impl FakeTts {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            spoken: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
            blocks_per_segment: 2,
            block_delay: Duration::ZERO,
            stop_delay: Duration::ZERO,
        })
    }

    fn slow(blocks_per_segment: usize, block_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            spoken: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
            blocks_per_segment,
            block_delay,
            stop_delay: Duration::ZERO,
        })
    }

    fn slow_stop(stop_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            spoken: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
            blocks_per_segment: 1,
            block_delay: Duration::ZERO,
            stop_delay,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeTts {
    async fn synthesize(&self, text: &str) -> Result<mpsc::Receiver<Vec<u8>>> {
        self.spoken.lock().push(text.to_string());
        let (tx, rx) = mpsc::channel(16);
        let blocks = self.blocks_per_segment;
        let delay = self.block_delay;
        let empty = text.trim().is_empty();
        tokio::spawn(async move {
            if empty {
                return;
            }
            for _ in 0..blocks {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if tx.send(vec![0u8; 640]).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn stop(&self) {
        if !self.stop_delay.is_zero() {
            tokio::time::sleep(self.stop_delay).await;
        }
        self.stops.fetch_add(1, Ordering::AcqRel);
    }

    async fn close(&self) {}
}

struct Harness {
    engine: Arc<SessionEngine>,
    asr_tx: mpsc::Sender<AsrEvent>,
    events: mpsc::Receiver<SessionEvent>,
    recognizer: Arc<FakeRecognizer>,
    llm: Arc<FakeLlm>,
    tts: Arc<FakeTts>,
}

async fn start_engine(llm: Arc<FakeLlm>, tts: Arc<FakeTts>) -> Harness {
    let (recognizer, asr_tx) = FakeRecognizer::new();
    let (event_tx, events) = mpsc::channel(256);
    let engine = Arc::new(SessionEngine::new(
        recognizer.clone(),
        llm.clone(),
        tts.clone(),
        SessionConfig::default(),
        event_tx,
    ));
    engine.clone().start().await.unwrap();
    Harness {
        engine,
        asr_tx,
        events,
        recognizer,
        llm,
        tts,
    }
}

/// Drain events until `TurnDone` (inclusive) or panic on timeout.
async fn collect_turn(events: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = events.recv().await {
            let done = matches!(event, SessionEvent::TurnDone);
            seen.push(event);
            if done {
                break;
            }
        }
    })
    .await
    .expect("turn did not complete in time");
    seen
}

fn index_of(events: &[SessionEvent], pred: impl Fn(&SessionEvent) -> bool) -> Option<usize> {
    events.iter().position(pred)
}

#[tokio::test]
async fn test_happy_path_event_ordering() {
    let mut h = start_engine(FakeLlm::quick(), FakeTts::new()).await;

    h.asr_tx
        .send(AsrEvent::Final("hello there".into()))
        .await
        .unwrap();
    let events = collect_turn(&mut h.events).await;

    let final_at = index_of(&events, |e| {
        matches!(e, SessionEvent::AsrFinal(t) if t == "hello there")
    })
    .expect("asr_final");
    let first_token = index_of(&events, |e| matches!(e, SessionEvent::LlmToken(_))).unwrap();
    let audio_start = index_of(&events, |e| matches!(e, SessionEvent::AudioStart)).unwrap();
    let first_chunk = index_of(&events, |e| matches!(e, SessionEvent::AudioChunk(_))).unwrap();
    let segment_done =
        index_of(&events, |e| matches!(e, SessionEvent::SegmentDone { .. })).unwrap();
    let turn_done = index_of(&events, |e| matches!(e, SessionEvent::TurnDone)).unwrap();

    assert!(final_at < first_token);
    assert!(audio_start < first_chunk);
    assert!(first_chunk < segment_done);
    assert!(segment_done < turn_done);
    assert_eq!(turn_done, events.len() - 1);

    let transcript = h.engine.transcript().await;
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[0], ChatTurn::user("hello there"));
    assert_eq!(transcript[1].role, ChatRole::Assistant);
    assert!(!transcript[1].content.is_empty());
}

#[tokio::test]
async fn test_identical_finals_within_debounce_run_once() {
    let mut h = start_engine(FakeLlm::quick(), FakeTts::new()).await;

    h.asr_tx.send(AsrEvent::Final("hi".into())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.asr_tx.send(AsrEvent::Final("hi".into())).await.unwrap();

    let _ = collect_turn(&mut h.events).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(h.llm.calls.load(Ordering::Acquire), 1);
    let users: Vec<_> = h
        .engine
        .transcript()
        .await
        .into_iter()
        .filter(|t| t.role == ChatRole::User)
        .collect();
    assert_eq!(users.len(), 1);
}

#[tokio::test]
async fn test_distinct_finals_cancel_predecessor() {
    let llm = FakeLlm::scripted(
        vec![
            vec!["first ", "reply ", "that ", "keeps ", "going"],
            vec!["second!"],
        ],
        Duration::from_millis(30),
    );
    let mut h = start_engine(llm, FakeTts::slow(4, Duration::from_millis(30))).await;

    h.asr_tx.send(AsrEvent::Final("one".into())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;
    h.asr_tx.send(AsrEvent::Final("two".into())).await.unwrap();

    let events = collect_turn(&mut h.events).await;
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, SessionEvent::TurnDone))
            .count(),
        1
    );

    let transcript = h.engine.transcript().await;
    let assistants: Vec<_> = transcript
        .iter()
        .filter(|t| t.role == ChatRole::Assistant)
        .collect();
    assert_eq!(assistants.len(), 1);
    assert_eq!(assistants[0].content, "second!");
}

#[tokio::test]
async fn test_barge_in_discards_partial_reply() {
    let llm = FakeLlm::scripted(
        vec![
            vec!["I ", "was ", "saying ", "something ", "long."],
            vec!["go ", "ahead?"],
        ],
        Duration::from_millis(20),
    );
    let mut h = start_engine(llm, FakeTts::slow(10, Duration::from_millis(50))).await;

    h.asr_tx.send(AsrEvent::Final("pitch".into())).await.unwrap();

    // Wait for playback to begin, then interrupt.
    tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(event) = h.events.recv().await {
            if matches!(event, SessionEvent::AudioStart) {
                break;
            }
        }
    })
    .await
    .unwrap();

    h.engine.clone().barge_in().await;
    assert!(h.tts.stops.load(Ordering::Acquire) >= 1);
    assert!(h.llm.cancels.load(Ordering::Acquire) >= 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut leftover = Vec::new();
    while let Ok(event) = h.events.try_recv() {
        leftover.push(event);
    }
    assert!(
        !leftover.iter().any(|e| matches!(e, SessionEvent::TurnDone)),
        "cancelled turn must not complete"
    );
    assert!(h
        .engine
        .transcript()
        .await
        .iter()
        .all(|t| t.role != ChatRole::Assistant));

    // A subsequent final starts a clean turn.
    h.asr_tx.send(AsrEvent::Final("wait".into())).await.unwrap();
    let events = collect_turn(&mut h.events).await;
    assert!(events.iter().any(|e| matches!(e, SessionEvent::TurnDone)));

    let transcript = h.engine.transcript().await;
    let users: Vec<_> = transcript
        .iter()
        .filter(|t| t.role == ChatRole::User)
        .map(|t| t.content.clone())
        .collect();
    assert_eq!(users, vec!["pitch".to_string(), "wait".to_string()]);
    assert_eq!(
        transcript.last().unwrap().role,
        ChatRole::Assistant,
        "new turn commits its reply"
    );
}

#[tokio::test]
async fn test_vad_speech_onset_triggers_barge_in() {
    let llm = FakeLlm::scripted(
        vec![vec!["droning ", "on ", "and ", "on."]],
        Duration::from_millis(20),
    );
    let mut h = start_engine(llm, FakeTts::slow(10, Duration::from_millis(50))).await;

    h.asr_tx.send(AsrEvent::Final("hello".into())).await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(event) = h.events.recv().await {
            if matches!(event, SessionEvent::AudioStart) {
                break;
            }
        }
    })
    .await
    .unwrap();

    let onset = serde_json::json!({"type": "utterance", "phase": "begin"});
    h.asr_tx.send(AsrEvent::Vad(onset)).await.unwrap();

    tokio::time::timeout(Duration::from_secs(1), async {
        while h.tts.stops.load(Ordering::Acquire) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("speech onset should stop synthesis");

    // The raw event is mirrored to the transport.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut saw_vad = false;
    while let Ok(event) = h.events.try_recv() {
        if matches!(&event, SessionEvent::Vad(v) if v["type"] == "utterance") {
            saw_vad = true;
        }
    }
    assert!(saw_vad);
}

#[tokio::test]
async fn test_concurrent_barge_ins_coalesce() {
    let h = start_engine(FakeLlm::quick(), FakeTts::slow_stop(Duration::from_millis(200))).await;

    let first = {
        let engine = h.engine.clone();
        tokio::spawn(async move { engine.barge_in().await })
    };
    let second = {
        let engine = h.engine.clone();
        tokio::spawn(async move { engine.barge_in().await })
    };
    first.await.unwrap();
    second.await.unwrap();

    assert_eq!(h.tts.stops.load(Ordering::Acquire), 1);
}

#[tokio::test]
async fn test_hangup_marks_final_segment() {
    let llm = FakeLlm::scripted(vec![vec!["goodbye then ", "[HANGUP]"]], Duration::ZERO);
    let mut h = start_engine(llm, FakeTts::new()).await;

    h.asr_tx.send(AsrEvent::Final("bye".into())).await.unwrap();
    let events = collect_turn(&mut h.events).await;

    let final_done = index_of(&events, |e| {
        matches!(e, SessionEvent::SegmentDone { is_final: true })
    })
    .expect("hangup segment flagged");
    let hangup = index_of(&events, |e| matches!(e, SessionEvent::Hangup)).expect("hangup event");
    let turn_done = index_of(&events, |e| matches!(e, SessionEvent::TurnDone)).unwrap();
    assert!(final_done < hangup);
    assert!(hangup < turn_done);

    let transcript = h.engine.transcript().await;
    assert_eq!(transcript.last().unwrap().content, "goodbye then");
    // The synthesized text never carries the marker.
    assert!(h.tts.spoken.lock().iter().all(|s| !s.contains("[HANGUP]")));
}

#[tokio::test]
async fn test_pcm_flows_in_order_and_respects_state() {
    let h = start_engine(FakeLlm::quick(), FakeTts::new()).await;

    for i in 0..3u8 {
        h.engine.feed_pcm(vec![i; 4]);
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let received = h.recognizer.received.lock().clone();
    assert_eq!(received, vec![vec![0u8; 4], vec![1u8; 4], vec![2u8; 4]]);
}

#[tokio::test]
async fn test_feed_pcm_dropped_before_start() {
    let (recognizer, _asr_tx) = FakeRecognizer::new();
    let (event_tx, _events) = mpsc::channel(16);
    let engine = Arc::new(SessionEngine::new(
        recognizer.clone(),
        FakeLlm::quick(),
        FakeTts::new(),
        SessionConfig::default(),
        event_tx,
    ));

    assert_eq!(engine.state(), SessionState::Created);
    engine.feed_pcm(vec![1, 2, 3]);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(recognizer.received.lock().is_empty());
}

#[tokio::test]
async fn test_close_tears_down_clients() {
    let h = start_engine(FakeLlm::quick(), FakeTts::new()).await;

    h.engine.close().await;
    assert_eq!(h.engine.state(), SessionState::Closed);
    assert!(h.recognizer.closed.load(Ordering::Acquire));

    // Input after close is silently dropped.
    h.engine.feed_pcm(vec![9]);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.recognizer.received.lock().is_empty());
}
