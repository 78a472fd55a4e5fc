//! Shared test utilities

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use voice_chat::config::ListenMode;
use voice_chat::{
    CannedResponder, EngineEvent, EngineEvents, Error, EventSink, Result, SessionHandle,
    SessionSettings, SessionState, SessionView, SpeechEngine, SynthesisOutcome, VoiceSession,
};

/// Reply latency used by sessions under test
pub const REPLY_LATENCY: Duration = Duration::from_millis(2000);

/// Engine call, in the order the controller issued it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Start,
    Stop,
    RecognizeOnce,
    Speak(String),
    CancelSpeech,
    Shutdown,
}

/// How the mock engine behaves
#[derive(Debug, Clone)]
pub struct MockScript {
    pub start_delay: Duration,
    pub stop_delay: Duration,
    pub speech_duration: Duration,
    pub fail_start: bool,
    /// Every `speak` reports this engine-side cancellation
    pub cancel_reason: Option<String>,
    /// Transcript returned by `recognize_once`
    pub heard: Option<String>,
}

impl Default for MockScript {
    fn default() -> Self {
        Self {
            start_delay: Duration::from_millis(20),
            stop_delay: Duration::from_millis(20),
            speech_duration: Duration::from_millis(500),
            fail_start: false,
            cancel_reason: None,
            heard: None,
        }
    }
}

/// Scripted speech engine that records every call
pub struct MockEngine {
    script: MockScript,
    sink: EventSink,
    calls: Mutex<Vec<Call>>,
    listening: AtomicBool,
    duplex_violations: AtomicUsize,
    synthesizer: Mutex<CancellationToken>,
}

impl MockEngine {
    pub fn new() -> (Arc<Self>, EngineEvents) {
        Self::with_script(MockScript::default())
    }

    pub fn with_script(script: MockScript) -> (Arc<Self>, EngineEvents) {
        let (sink, events) = EventSink::channel();
        let engine = Self {
            script,
            sink,
            calls: Mutex::new(Vec::new()),
            listening: AtomicBool::new(false),
            duplex_violations: AtomicUsize::new(0),
            synthesizer: Mutex::new(CancellationToken::new()),
        };
        (Arc::new(engine), events)
    }

    /// Inject an engine event, as the recognizer would
    pub fn emit(&self, event: EngineEvent) {
        self.sink.emit(event);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }

    /// `speak` calls made while recognition was running
    pub fn duplex_violations(&self) -> usize {
        self.duplex_violations.load(Ordering::SeqCst)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl SpeechEngine for MockEngine {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn start_continuous_recognition(&self) -> Result<()> {
        self.record(Call::Start);
        tokio::time::sleep(self.script.start_delay).await;

        if self.script.fail_start {
            return Err(Error::EngineStart("device busy".to_string()));
        }

        self.listening.store(true, Ordering::SeqCst);
        self.sink.emit(EngineEvent::SessionStarted);
        Ok(())
    }

    async fn stop_continuous_recognition(&self) -> Result<()> {
        self.record(Call::Stop);
        tokio::time::sleep(self.script.stop_delay).await;

        self.listening.store(false, Ordering::SeqCst);
        self.sink.emit(EngineEvent::SessionStopped);
        Ok(())
    }

    async fn recognize_once(&self) -> Result<Option<String>> {
        self.record(Call::RecognizeOnce);
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(self.script.heard.clone())
    }

    async fn speak(&self, text: &str) -> Result<SynthesisOutcome> {
        self.record(Call::Speak(text.to_string()));
        if self.listening.load(Ordering::SeqCst) {
            self.duplex_violations.fetch_add(1, Ordering::SeqCst);
        }

        if let Some(reason) = &self.script.cancel_reason {
            return Ok(SynthesisOutcome::Canceled {
                reason: reason.clone(),
            });
        }

        let token = self.synthesizer.lock().unwrap().clone();
        self.sink.emit(EngineEvent::SynthesisStarted);

        tokio::select! {
            () = token.cancelled() => {
                self.sink.emit(EngineEvent::SynthesisCanceled);
                Ok(SynthesisOutcome::Canceled { reason: "synthesizer closed".to_string() })
            }
            () = tokio::time::sleep(self.script.speech_duration) => {
                self.sink.emit(EngineEvent::SynthesisCompleted);
                Ok(SynthesisOutcome::Completed)
            }
        }
    }

    async fn cancel_speech(&self) -> Result<()> {
        self.record(Call::CancelSpeech);
        let mut token = self.synthesizer.lock().unwrap();
        token.cancel();
        *token = CancellationToken::new();
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.record(Call::Shutdown);
        Ok(())
    }
}

/// Continuous listening with spoken replies
pub fn voice_settings() -> SessionSettings {
    SessionSettings {
        listen_mode: ListenMode::Continuous,
        voice_input: true,
        speak_replies: true,
        rearm_delay: Duration::from_millis(120),
        greeting: "Hello! Tap Mic or type a message.".to_string(),
    }
}

/// Spawn a session over the mock engine with the canned responder
pub fn spawn_session(
    engine: &Arc<MockEngine>,
    events: EngineEvents,
    settings: SessionSettings,
) -> SessionHandle {
    let engine: Arc<dyn SpeechEngine> = Arc::clone(engine) as Arc<dyn SpeechEngine>;
    VoiceSession::spawn(
        engine,
        events,
        Arc::new(CannedResponder::with_latency(REPLY_LATENCY)),
        settings,
    )
}

/// Wait for the view to satisfy `predicate`, failing the test after a minute
pub async fn wait_until(
    session: &SessionHandle,
    predicate: impl FnMut(&SessionView) -> bool,
) -> SessionView {
    tokio::time::timeout(Duration::from_secs(60), session.wait_for(predicate))
        .await
        .expect("timed out waiting for session state")
        .expect("session closed")
}

/// Everything published on a transition stream so far
pub fn drain(transitions: &mut broadcast::Receiver<SessionState>) -> Vec<SessionState> {
    let mut seen = Vec::new();
    while let Ok(state) = transitions.try_recv() {
        seen.push(state);
    }
    seen
}

/// Text of the last message in the view
pub fn last_text(view: &SessionView) -> String {
    view.messages.last().map(|m| m.text.clone()).unwrap_or_default()
}

/// The reply to the first user turn has replaced its placeholder
pub fn first_reply_resolved(view: &SessionView) -> bool {
    view.messages.get(2).is_some_and(|m| !m.thinking)
}
