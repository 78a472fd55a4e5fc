//! Voice session controller
//!
//! A single task owns the [`SessionState`] and the [`ConversationStore`].
//! Commands from [`SessionHandle`], engine events and the completions of
//! background work (mic start/stop, replies, speech, re-arm timers) are all
//! handled on that task, one at a time, so no two transitions interleave.
//!
//! The session is half-duplex: a reply is only spoken once the microphone is
//! closed, and the microphone only opens when no turn is in flight.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use super::state::{MicState, Mode, Phase, SessionState, SessionView};
use crate::config::{Config, ListenMode};
use crate::conversation::{ChatMessage, ConversationStore, MessageId, MessageSnapshot};
use crate::responder::ResponseGenerator;
use crate::voice::{EngineEvent, EngineEvents, SpeechEngine, SynthesisOutcome};
use crate::{Error, Result};

/// Buffered transitions per lagging subscriber
const TRANSITION_CAPACITY: usize = 256;

/// Controller behavior fixed at spawn time
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// How the microphone is driven
    pub listen_mode: ListenMode,
    /// Microphone input is available
    pub voice_input: bool,
    /// Resolved replies are spoken
    pub speak_replies: bool,
    /// Grace delay before the mic re-opens after a turn
    pub rearm_delay: Duration,
    /// Bot message seeded into the conversation
    pub greeting: String,
}

impl SessionSettings {
    /// Derive settings from loaded configuration
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            listen_mode: config.voice.listen_mode,
            voice_input: config.voice.enabled,
            speak_replies: config.voice.enabled && config.session.speak_replies,
            rearm_delay: config.session.rearm_delay,
            greeting: config.session.greeting.clone(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

enum Command {
    EnterVoiceMode,
    EndVoiceMode,
    InputChanged(String),
    SendText,
    StartMic,
    StopMic,
    CancelTts,
    MicOrInterrupt,
    TapMic,
    Shutdown,
}

struct Envelope {
    command: Command,
    done: oneshot::Sender<()>,
}

/// Result of background work, marshaled back onto the controller task
enum Completion {
    ReplyReady {
        id: MessageId,
        reply: Result<String>,
    },
    SpeechFinished {
        generation: u64,
        outcome: Result<SynthesisOutcome>,
    },
    RearmDue {
        epoch: u64,
    },
    Heard(Result<Option<String>>),
}

/// Pending mic start or stop
type MicOp = oneshot::Receiver<Result<()>>;

/// Bookkeeping for the conversational turn
#[derive(Debug, Default)]
struct Turn {
    /// Placeholder awaiting its reply
    pending_reply: Option<MessageId>,
    /// Replies waiting for the mic to close before they are spoken
    speech_queue: VecDeque<String>,
    /// A `speak` call is outstanding
    speech_in_flight: bool,
    /// Cancels the outstanding `speak` call, even before it first runs
    speech_cancel: Option<CancellationToken>,
    /// Bumped whenever speech is interrupted; stale outcomes are dropped
    speech_generation: u64,
    /// Bumped when voice mode ends; stale re-arm timers are dropped
    voice_epoch: u64,
    /// Push-to-talk capture outstanding
    one_shot: bool,
    /// Speech was cut short and the mic has not reopened yet
    interrupted: bool,
    /// The turn ended while the mic was stopping; reopen once it is idle
    rearm_owed: bool,
}

impl Turn {
    fn speech_active(&self) -> bool {
        self.speech_in_flight || !self.speech_queue.is_empty()
    }

    fn in_flight(&self) -> bool {
        self.pending_reply.is_some() || self.speech_active() || self.one_shot
    }
}

/// The controller task
pub struct VoiceSession {
    engine: Arc<dyn SpeechEngine>,
    responder: Arc<dyn ResponseGenerator>,
    settings: SessionSettings,
    store: ConversationStore,
    state: SessionState,
    turn: Turn,
    mic_op: Option<MicOp>,
    commands: mpsc::UnboundedReceiver<Envelope>,
    events: Option<EngineEvents>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions: mpsc::UnboundedReceiver<Completion>,
    view: watch::Sender<SessionView>,
    transitions: broadcast::Sender<SessionState>,
}

impl VoiceSession {
    /// Spawn the controller on the current tokio runtime
    ///
    /// `events` must be the stream created together with `engine`. The
    /// controller stops on [`SessionHandle::shutdown`] or once every handle
    /// is dropped, releasing the engine either way.
    #[must_use]
    pub fn spawn(
        engine: Arc<dyn SpeechEngine>,
        events: EngineEvents,
        responder: Arc<dyn ResponseGenerator>,
        settings: SessionSettings,
    ) -> SessionHandle {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (completions_tx, completions) = mpsc::unbounded_channel();
        let store = ConversationStore::with_greeting(&settings.greeting);
        let (view, view_rx) = watch::channel(SessionView {
            messages: store.snapshot(),
            ..SessionView::default()
        });
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);

        tracing::info!(
            engine = engine.name(),
            listen_mode = ?settings.listen_mode,
            voice_input = settings.voice_input,
            speak_replies = settings.speak_replies,
            "voice session starting"
        );

        let handle = SessionHandle {
            commands: commands_tx,
            view: view_rx,
            transitions: transitions.clone(),
        };

        let session = Self {
            engine,
            responder,
            settings,
            store,
            state: SessionState::default(),
            turn: Turn::default(),
            mic_op: None,
            commands,
            events: Some(events),
            completions_tx,
            completions,
            view,
            transitions,
        };
        tokio::spawn(session.run());

        handle
    }

    async fn run(mut self) {
        loop {
            // Engine events go first so a recognizer session's own events are
            // seen before the completion of the call that produced them
            tokio::select! {
                biased;

                event = next_event(&mut self.events) => match event {
                    Some(event) => self.on_event(event),
                    None => {
                        tracing::debug!("engine event stream closed");
                        self.events = None;
                    }
                },
                result = mic_op_done(&mut self.mic_op) => {
                    self.mic_op = None;
                    self.settle_mic(result);
                    self.after_mic_settled();
                }
                Some(completion) = self.completions.recv() => self.on_completion(completion),
                envelope = self.commands.recv() => {
                    let Some(Envelope { command, done }) = envelope else {
                        tracing::debug!("all session handles dropped");
                        self.shutdown().await;
                        break;
                    };

                    let stop = matches!(command, Command::Shutdown);
                    self.on_command(command).await;
                    let _ = done.send(());
                    if stop {
                        break;
                    }
                }
            }
        }

        tracing::info!("voice session stopped");
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::EnterVoiceMode => self.enter_voice_mode(),
            Command::EndVoiceMode => self.end_voice_mode().await,
            Command::InputChanged(text) => {
                self.state.input = text;
                self.publish();
            }
            Command::SendText => self.send_text(),
            Command::StartMic => {
                self.start_mic();
            }
            Command::StopMic => {
                self.stop_mic();
            }
            Command::CancelTts => self.cancel_tts().await,
            Command::MicOrInterrupt => self.mic_or_interrupt().await,
            Command::TapMic => self.tap_mic(),
            Command::Shutdown => self.shutdown().await,
        }
    }

    fn on_completion(&mut self, completion: Completion) {
        match completion {
            Completion::ReplyReady { id, reply } => self.on_reply(id, reply),
            Completion::SpeechFinished {
                generation,
                outcome,
            } => self.on_speech_finished(generation, outcome),
            Completion::RearmDue { epoch } => self.on_rearm(epoch),
            Completion::Heard(result) => self.on_heard(result),
        }
    }

    fn on_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::SessionStarted => tracing::debug!("recognizer session started"),
            EngineEvent::SessionStopped => {
                if self.state.mic == MicState::Listening {
                    tracing::warn!("recognizer stopped unexpectedly");
                    self.state.mic = MicState::Idle;
                    self.publish();
                } else {
                    tracing::debug!("recognizer session stopped");
                }
            }
            EngineEvent::Partial(text) => {
                // Suppressed while speaking so playback never bleeds into the input
                if self.state.mode == Mode::VoiceMode
                    && !self.state.speaking
                    && !self.turn.speech_in_flight
                {
                    self.state.input = text;
                    self.publish();
                }
            }
            EngineEvent::Final(text) => self.on_final(&text),
            EngineEvent::SynthesisStarted => {
                if self.turn.speech_in_flight && self.state.mic == MicState::Idle {
                    self.state.speaking = true;
                    self.publish();
                } else {
                    tracing::debug!(mic = ?self.state.mic, "ignoring synthesis start");
                }
            }
            EngineEvent::SynthesisCompleted | EngineEvent::SynthesisCanceled => {
                if self.state.speaking {
                    self.state.speaking = false;
                    self.publish();
                }
            }
        }
    }

    fn enter_voice_mode(&mut self) {
        if self.state.mode == Mode::VoiceMode {
            tracing::debug!("already in voice mode");
            return;
        }

        self.state.mode = Mode::VoiceMode;
        self.turn.interrupted = false;
        tracing::info!("voice mode entered");
        self.publish();
        self.start_mic();
    }

    /// Leave voice mode with the mic closed and playback stopped
    async fn end_voice_mode(&mut self) {
        if self.state.mode != Mode::VoiceMode {
            tracing::debug!("not in voice mode");
            return;
        }

        self.turn.voice_epoch += 1;
        self.turn.rearm_owed = false;

        if let Some(op) = self.mic_op.take() {
            let result = await_mic_op(op).await;
            self.settle_mic(result);
        }

        if self.state.mic == MicState::Listening {
            self.state.mic = MicState::Stopping;
            self.publish();
            let result = self.engine.stop_continuous_recognition().await;
            self.settle_mic(result);
        }

        if self.state.speaking || self.turn.speech_active() {
            self.interrupt_speech().await;
        }

        self.turn.interrupted = false;
        self.state.mode = Mode::TextMode;
        tracing::info!("voice mode ended");
        self.publish();
    }

    fn start_mic(&mut self) -> bool {
        if !self.settings.voice_input || self.settings.listen_mode != ListenMode::Continuous {
            tracing::debug!("mic start ignored, continuous listening unavailable");
            return false;
        }
        if self.state.mode != Mode::VoiceMode {
            tracing::debug!("mic start ignored outside voice mode");
            return false;
        }
        if self.state.mic != MicState::Idle {
            tracing::debug!(mic = ?self.state.mic, "mic start rejected");
            return false;
        }
        if self.turn.in_flight() {
            tracing::debug!("mic start rejected, turn in flight");
            return false;
        }

        self.state.mic = MicState::Starting;
        self.turn.rearm_owed = false;
        self.publish();

        let engine = Arc::clone(&self.engine);
        self.mic_op = Some(spawn_mic_op(async move {
            engine.start_continuous_recognition().await
        }));
        true
    }

    fn stop_mic(&mut self) -> bool {
        if self.state.mic != MicState::Listening {
            tracing::debug!(mic = ?self.state.mic, "mic stop ignored");
            return false;
        }

        self.state.mic = MicState::Stopping;
        self.publish();

        let engine = Arc::clone(&self.engine);
        self.mic_op = Some(spawn_mic_op(async move {
            engine.stop_continuous_recognition().await
        }));
        true
    }

    /// Resolve an in-flight start/stop; failures fall back to `Idle`
    fn settle_mic(&mut self, result: Result<()>) {
        let next = match (self.state.mic, result) {
            (MicState::Starting, Ok(())) => {
                tracing::info!("listening");
                MicState::Listening
            }
            (MicState::Starting, Err(e)) => {
                tracing::warn!(error = %e, "mic start failed");
                MicState::Idle
            }
            (MicState::Stopping, Ok(())) => {
                tracing::debug!("mic stopped");
                MicState::Idle
            }
            (MicState::Stopping, Err(e)) => {
                tracing::warn!(error = %e, "mic stop failed");
                MicState::Idle
            }
            (mic, _) => {
                tracing::warn!(?mic, "mic completion without a transition in flight");
                return;
            }
        };

        self.state.mic = next;
        if next == MicState::Listening {
            self.turn.interrupted = false;
        }
        self.publish();
    }

    fn after_mic_settled(&mut self) {
        match self.state.mic {
            MicState::Listening
                if self.state.mode != Mode::VoiceMode
                    || self.turn.pending_reply.is_some()
                    || self.turn.speech_active() =>
            {
                self.stop_mic();
            }
            MicState::Idle => {
                self.advance_speech();
                if self.turn.rearm_owed {
                    self.turn.rearm_owed = false;
                    if self.turn.interrupted {
                        self.start_mic();
                    } else {
                        self.schedule_rearm();
                    }
                }
            }
            _ => {}
        }
    }

    fn send_text(&mut self) {
        let text = self.state.input.trim().to_string();
        if text.is_empty() {
            tracing::debug!("nothing to send");
            return;
        }

        self.submit(text);
    }

    fn on_final(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if self.settings.listen_mode != ListenMode::Continuous
            || self.state.mode != Mode::VoiceMode
        {
            tracing::debug!("final transcript ignored outside continuous voice mode");
            return;
        }
        if self.turn.pending_reply.is_some() || self.turn.speech_active() {
            tracing::debug!("final transcript ignored, turn in flight");
            return;
        }

        tracing::info!(transcript = text, "final transcript");
        self.stop_mic();
        self.submit(text.to_string());
    }

    /// Append the user's turn and request a reply
    fn submit(&mut self, text: String) -> bool {
        if self.turn.pending_reply.is_some() {
            tracing::debug!("submission rejected, reply pending");
            return false;
        }

        self.state.input.clear();
        self.store.append(ChatMessage::user(text.clone()));

        let placeholder = ChatMessage::thinking();
        let id = placeholder.id;
        self.store.append(placeholder);
        self.turn.pending_reply = Some(id);
        tracing::info!(%id, "reply requested");

        let responder = Arc::clone(&self.responder);
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let reply = responder.reply(&text).await;
            let _ = completions.send(Completion::ReplyReady { id, reply });
        });

        self.publish();
        true
    }

    fn on_reply(&mut self, id: MessageId, reply: Result<String>) {
        if self.turn.pending_reply == Some(id) {
            self.turn.pending_reply = None;
        }

        match reply {
            Ok(text) => {
                tracing::info!(%id, "reply ready");
                self.store.replace(id, ChatMessage::bot(text.clone()));
                if self.settings.speak_replies {
                    self.turn.speech_queue.push_back(text);
                    self.publish();
                    self.advance_speech();
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(%id, error = %e, "reply generation failed");
                self.store
                    .replace(id, ChatMessage::bot(format!("Sorry, I couldn't answer that ({e})")));
            }
        }

        self.publish();
        self.schedule_rearm();
    }

    /// Speak the next queued reply once the mic is closed
    fn advance_speech(&mut self) {
        if self.turn.speech_in_flight || self.turn.speech_queue.is_empty() {
            return;
        }

        match self.state.mic {
            MicState::Idle => {
                if let Some(text) = self.turn.speech_queue.pop_front() {
                    self.start_speech(text);
                }
            }
            MicState::Listening => {
                self.stop_mic();
            }
            MicState::Starting | MicState::Stopping => {}
        }
    }

    fn start_speech(&mut self, text: String) {
        self.turn.speech_generation += 1;
        self.turn.speech_in_flight = true;
        self.turn.interrupted = false;

        let generation = self.turn.speech_generation;
        tracing::debug!(generation, "speaking reply");

        let cancel = CancellationToken::new();
        self.turn.speech_cancel = Some(cancel.clone());

        let engine = Arc::clone(&self.engine);
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;

                () = cancel.cancelled() => Ok(SynthesisOutcome::Canceled {
                    reason: "interrupted".to_string(),
                }),
                outcome = engine.speak(&text) => outcome,
            };
            let _ = completions.send(Completion::SpeechFinished {
                generation,
                outcome,
            });
        });

        self.publish();
    }

    fn on_speech_finished(&mut self, generation: u64, outcome: Result<SynthesisOutcome>) {
        if !self.turn.speech_in_flight || generation != self.turn.speech_generation {
            tracing::debug!(generation, "dropping outcome of interrupted speech");
            return;
        }

        self.turn.speech_in_flight = false;
        self.turn.speech_cancel = None;
        self.state.speaking = false;

        let canceled = match outcome {
            Ok(SynthesisOutcome::Completed) => None,
            Ok(SynthesisOutcome::Canceled { reason }) => Some(reason),
            Err(e) => Some(e.to_string()),
        };
        if let Some(reason) = canceled {
            tracing::warn!(%reason, "speech canceled by engine");
            self.store
                .append(ChatMessage::bot(Error::SynthesisCanceled { reason }.to_string()));
        }

        self.publish();

        if self.turn.speech_queue.is_empty() {
            self.schedule_rearm();
        } else {
            self.advance_speech();
        }
    }

    /// Stop playback and forget queued speech
    async fn interrupt_speech(&mut self) {
        self.turn.speech_generation += 1;
        self.turn.speech_in_flight = false;
        self.turn.speech_queue.clear();
        if let Some(cancel) = self.turn.speech_cancel.take() {
            cancel.cancel();
        }

        if let Err(e) = self.engine.cancel_speech().await {
            tracing::warn!(error = %e, "speech cancel failed");
        }
        self.state.speaking = false;
    }

    async fn cancel_tts(&mut self) {
        if !self.state.speaking && !self.turn.speech_active() {
            tracing::debug!("nothing to cancel");
            return;
        }

        self.interrupt_speech().await;
        self.turn.interrupted = true;
        tracing::info!("speech interrupted");
        self.publish();

        if self.state.mode == Mode::VoiceMode {
            match self.state.mic {
                MicState::Idle => {
                    self.start_mic();
                }
                MicState::Stopping => self.turn.rearm_owed = true,
                MicState::Starting | MicState::Listening => {}
            }
        }
    }

    async fn mic_or_interrupt(&mut self) {
        if self.state.speaking || self.turn.speech_active() {
            self.cancel_tts().await;
            return;
        }

        match self.state.mic {
            MicState::Listening => {
                self.stop_mic();
            }
            MicState::Idle => {
                self.start_mic();
            }
            mic => tracing::debug!(?mic, "mic transition in flight"),
        }
    }

    fn schedule_rearm(&mut self) {
        if self.state.mode != Mode::VoiceMode
            || self.settings.listen_mode != ListenMode::Continuous
            || !self.settings.voice_input
            || self.turn.in_flight()
        {
            return;
        }
        match self.state.mic {
            MicState::Idle => {}
            MicState::Stopping => {
                tracing::debug!("mic re-arm deferred until the mic is idle");
                self.turn.rearm_owed = true;
                return;
            }
            MicState::Starting | MicState::Listening => return,
        }

        let epoch = self.turn.voice_epoch;
        let delay = self.settings.rearm_delay;
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = completions.send(Completion::RearmDue { epoch });
        });
        tracing::debug!(delay_ms = delay.as_millis(), "mic re-arm scheduled");
    }

    fn on_rearm(&mut self, epoch: u64) {
        if epoch != self.turn.voice_epoch || self.state.mode != Mode::VoiceMode {
            tracing::debug!("stale re-arm dropped");
            return;
        }

        self.start_mic();
    }

    fn tap_mic(&mut self) {
        if !self.settings.voice_input || self.settings.listen_mode != ListenMode::PushToTalk {
            tracing::debug!("push-to-talk unavailable");
            return;
        }
        if self.state.mic != MicState::Idle || self.turn.in_flight() {
            tracing::debug!("push-to-talk rejected, busy");
            return;
        }

        self.state.input.clear();
        self.turn.one_shot = true;
        tracing::info!("push-to-talk capture started");

        let engine = Arc::clone(&self.engine);
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = engine.recognize_once().await;
            let _ = completions.send(Completion::Heard(result));
        });

        self.publish();
    }

    fn on_heard(&mut self, result: Result<Option<String>>) {
        self.turn.one_shot = false;

        match result {
            Ok(Some(text)) if !text.trim().is_empty() => {
                self.submit(text.trim().to_string());
            }
            Ok(_) => tracing::debug!("nothing recognized"),
            Err(e) => tracing::warn!(error = %e, "push-to-talk recognition failed"),
        }

        self.publish();
    }

    async fn shutdown(&mut self) {
        self.end_voice_mode().await;
        if self.state.speaking || self.turn.speech_active() {
            self.interrupt_speech().await;
            self.publish();
        }

        if let Err(e) = self.engine.shutdown().await {
            tracing::warn!(error = %e, "engine shutdown failed");
        }
        tracing::info!(engine = self.engine.name(), "speech engine released");
    }

    fn phase(&self) -> Phase {
        if self.turn.one_shot {
            return Phase::Listening;
        }
        if self.state.mode == Mode::TextMode {
            return Phase::Idle;
        }

        if self.state.speaking {
            Phase::Speaking
        } else if self.turn.pending_reply.is_some() || self.turn.speech_active() {
            Phase::Thinking
        } else if self.turn.interrupted {
            Phase::Interrupted
        } else if self.state.mic == MicState::Idle {
            Phase::Idle
        } else {
            Phase::Listening
        }
    }

    /// Publish the current state if anything observable changed
    fn publish(&self) {
        debug_assert!(
            !(self.state.is_listening() && self.state.speaking),
            "listening while speaking"
        );

        let phase = self.phase();
        let messages = self.store.snapshot();
        let mut state_changed = false;

        self.view.send_if_modified(|view| {
            state_changed = view.state != self.state;
            let modified = state_changed
                || view.phase != phase
                || !Arc::ptr_eq(&view.messages, &messages);
            if modified {
                *view = SessionView {
                    state: self.state.clone(),
                    messages,
                    phase,
                };
            }
            modified
        });

        if state_changed {
            tracing::debug!(
                mode = ?self.state.mode,
                mic = ?self.state.mic,
                speaking = self.state.speaking,
                %phase,
                "session state"
            );
            let _ = self.transitions.send(self.state.clone());
        }
    }
}

fn spawn_mic_op<F>(op: F) -> MicOp
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let _ = tx.send(op.await);
    });
    rx
}

async fn await_mic_op(op: MicOp) -> Result<()> {
    op.await
        .unwrap_or_else(|_| Err(Error::EngineStop("mic task ended without a result".to_string())))
}

async fn mic_op_done(op: &mut Option<MicOp>) -> Result<()> {
    match op {
        Some(rx) => rx.await.unwrap_or_else(|_| {
            Err(Error::EngineStop("mic task ended without a result".to_string()))
        }),
        None => std::future::pending().await,
    }
}

async fn next_event(events: &mut Option<EngineEvents>) -> Option<EngineEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Cloneable handle for issuing commands and observing a [`VoiceSession`]
///
/// Command methods resolve once the controller has processed the command;
/// background work it started (mic transitions, replies, speech) completes
/// later and is observable through [`Self::subscribe`] and
/// [`Self::transitions`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Envelope>,
    view: watch::Receiver<SessionView>,
    transitions: broadcast::Sender<SessionState>,
}

impl SessionHandle {
    async fn call(&self, command: Command) -> Result<()> {
        let (done, ack) = oneshot::channel();
        self.commands
            .send(Envelope { command, done })
            .map_err(|_| Error::SessionClosed)?;
        ack.await.map_err(|_| Error::SessionClosed)
    }

    /// Switch to voice mode and open the mic
    ///
    /// # Errors
    ///
    /// Returns error if the session has stopped
    pub async fn enter_voice_mode(&self) -> Result<()> {
        self.call(Command::EnterVoiceMode).await
    }

    /// Close the mic, stop playback and return to text mode
    ///
    /// Resolves once the mic is idle and nothing is playing.
    ///
    /// # Errors
    ///
    /// Returns error if the session has stopped
    pub async fn end_voice_mode(&self) -> Result<()> {
        self.call(Command::EndVoiceMode).await
    }

    /// Replace the composed input
    ///
    /// # Errors
    ///
    /// Returns error if the session has stopped
    pub async fn on_input_change(&self, text: impl Into<String>) -> Result<()> {
        self.call(Command::InputChanged(text.into())).await
    }

    /// Send the composed input as a user message
    ///
    /// # Errors
    ///
    /// Returns error if the session has stopped
    pub async fn send_text(&self) -> Result<()> {
        self.call(Command::SendText).await
    }

    /// Open the mic for continuous recognition
    ///
    /// # Errors
    ///
    /// Returns error if the session has stopped
    pub async fn start_mic(&self) -> Result<()> {
        self.call(Command::StartMic).await
    }

    /// Close the mic
    ///
    /// # Errors
    ///
    /// Returns error if the session has stopped
    pub async fn stop_mic(&self) -> Result<()> {
        self.call(Command::StopMic).await
    }

    /// Interrupt playback (barge-in)
    ///
    /// # Errors
    ///
    /// Returns error if the session has stopped
    pub async fn cancel_tts(&self) -> Result<()> {
        self.call(Command::CancelTts).await
    }

    /// Interrupt playback if speaking, otherwise toggle the mic
    ///
    /// # Errors
    ///
    /// Returns error if the session has stopped
    pub async fn mic_or_interrupt(&self) -> Result<()> {
        self.call(Command::MicOrInterrupt).await
    }

    /// Capture a single utterance in push-to-talk mode
    ///
    /// # Errors
    ///
    /// Returns error if the session has stopped
    pub async fn tap_mic(&self) -> Result<()> {
        self.call(Command::TapMic).await
    }

    /// End voice mode, release the engine and stop the controller
    ///
    /// # Errors
    ///
    /// Returns error if the session had already stopped
    pub async fn shutdown(&self) -> Result<()> {
        self.call(Command::Shutdown).await
    }

    /// Latest published view
    #[must_use]
    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    /// Latest session flags
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.view.borrow().state.clone()
    }

    /// Conversation snapshot
    #[must_use]
    pub fn messages(&self) -> MessageSnapshot {
        Arc::clone(&self.view.borrow().messages)
    }

    /// Composed input or live partial transcript
    #[must_use]
    pub fn input(&self) -> String {
        self.view.borrow().state.input.clone()
    }

    /// Voice mode is active
    #[must_use]
    pub fn voice_session(&self) -> bool {
        self.view.borrow().state.voice_session()
    }

    /// Mic is listening
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.view.borrow().state.is_listening()
    }

    /// Reply audio is playing
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.view.borrow().state.is_speaking()
    }

    /// Display phase
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.view.borrow().phase
    }

    /// Watch the latest view
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    /// Stream of every published state, in order
    #[must_use]
    pub fn transitions(&self) -> broadcast::Receiver<SessionState> {
        self.transitions.subscribe()
    }

    /// Wait until the published view satisfies `predicate`
    ///
    /// # Errors
    ///
    /// Returns error if the session stops first
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&SessionView) -> bool,
    ) -> Result<SessionView> {
        let mut view = self.view.clone();
        let matched = view
            .wait_for(predicate)
            .await
            .map_err(|_| Error::SessionClosed)?;
        Ok(matched.clone())
    }
}
