//! Speech engine backed by local audio devices and HTTP speech services
//!
//! Recognition runs on a dedicated thread that owns the `cpal` input stream
//! and segments the microphone signal into utterances. Utterances (and interim
//! snapshots of the one in progress) are transcribed by a single async worker,
//! so transcripts are emitted in capture order.
//!
//! Playback cannot be interrupted cooperatively by the services, so each
//! utterance plays under the synthesizer's current cancellation token and
//! cancelling swaps in a fresh token.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError};
use std::sync::{Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::{
    AudioCapture, AudioPlayback, EngineEvent, EngineEvents, EventSink, PlaybackEnd, SAMPLE_RATE,
    SpeechEngine, SpeechToText, SynthesisOutcome, TextToSpeech, UtteranceSegmenter,
    decode_audio, samples_to_wav,
};
use crate::config::{Config, VoiceConfig};
use crate::{Error, Result};

/// How often the recognizer drains the capture buffer (100ms)
const CHUNK_INTERVAL: Duration = Duration::from_millis(100);

/// Longest push-to-talk capture
const MAX_ONE_SHOT: Duration = Duration::from_secs(15);

/// Audio handed to the transcription worker
enum Job {
    Partial(Vec<f32>),
    Final(Vec<f32>),
}

/// Running continuous recognition session
struct Recognizer {
    stop_tx: std_mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

/// Cloud STT/TTS engine with local capture and playback
pub struct CloudSpeechEngine {
    stt: SpeechToText,
    tts: TextToSpeech,
    end_silence: Duration,
    partial_interval: Option<Duration>,
    sink: EventSink,
    recognizer: tokio::sync::Mutex<Option<Recognizer>>,
    synthesizer: Mutex<CancellationToken>,
    closed: AtomicBool,
}

impl CloudSpeechEngine {
    /// Create the engine and its event stream
    ///
    /// No audio device is opened until recognition or playback starts.
    ///
    /// # Errors
    ///
    /// Returns error if the configured providers lack API keys
    pub fn new(config: &Config) -> Result<(Self, EngineEvents)> {
        Self::from_voice_config(&config.voice, &config.api_keys)
    }

    /// Create the engine from voice settings and keys
    ///
    /// # Errors
    ///
    /// Returns error if the configured providers lack API keys
    pub fn from_voice_config(
        voice: &VoiceConfig,
        keys: &crate::config::ApiKeys,
    ) -> Result<(Self, EngineEvents)> {
        let stt = SpeechToText::from_config(voice, keys)?;
        let tts = TextToSpeech::from_config(voice, keys)?;
        let (sink, events) = EventSink::channel();

        tracing::info!(
            locale = %voice.locale,
            stt = ?voice.stt_provider,
            tts = ?voice.tts_provider,
            tts_voice = %voice.tts_voice,
            output_format = ?voice.output_format,
            end_silence_ms = voice.end_silence_timeout.as_millis(),
            "cloud speech engine configured"
        );

        Ok((
            Self {
                stt,
                tts,
                end_silence: voice.end_silence_timeout,
                partial_interval: voice.partial_interval,
                sink,
                recognizer: tokio::sync::Mutex::new(None),
                synthesizer: Mutex::new(CancellationToken::new()),
                closed: AtomicBool::new(false),
            },
            events,
        ))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::EngineUnavailable("engine shut down".to_string()));
        }
        Ok(())
    }

    /// Cancellation token of the current synthesizer
    fn synthesizer_token(&self) -> CancellationToken {
        self.synthesizer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Cancel in-flight playback and install a fresh synthesizer token
    fn replace_synthesizer(&self) {
        let mut token = self
            .synthesizer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        token.cancel();
        *token = CancellationToken::new();
    }
}

#[async_trait]
impl SpeechEngine for CloudSpeechEngine {
    fn name(&self) -> &'static str {
        "cloud"
    }

    async fn start_continuous_recognition(&self) -> Result<()> {
        self.ensure_open()?;

        let mut slot = self.recognizer.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel();
        let segmenter = UtteranceSegmenter::new(self.end_silence, self.partial_interval);

        let thread = std::thread::Builder::new()
            .name("recognizer".to_string())
            .spawn(move || recognizer_loop(segmenter, &jobs_tx, &stop_rx, ready_tx))
            .map_err(|e| Error::EngineStart(e.to_string()))?;

        match ready_rx.await {
            Ok(Ok(())) => {
                tokio::spawn(run_transcriber(self.stt.clone(), jobs_rx, self.sink.clone()));
                *slot = Some(Recognizer { stop_tx, thread });
                self.sink.emit(EngineEvent::SessionStarted);
                tracing::info!("continuous recognition started");
                Ok(())
            }
            Ok(Err(e)) => {
                join_thread(thread).await.ok();
                Err(Error::EngineStart(e.to_string()))
            }
            Err(_) => Err(Error::EngineStart(
                "recognizer thread exited before starting".to_string(),
            )),
        }
    }

    async fn stop_continuous_recognition(&self) -> Result<()> {
        let Some(recognizer) = self.recognizer.lock().await.take() else {
            return Ok(());
        };

        // The thread also exits if the sender is dropped, so a failed send is fine
        let _ = recognizer.stop_tx.send(());
        join_thread(recognizer.thread)
            .await
            .map_err(|e| Error::EngineStop(e.to_string()))?;

        self.sink.emit(EngineEvent::SessionStopped);
        tracing::info!("continuous recognition stopped");
        Ok(())
    }

    async fn recognize_once(&self) -> Result<Option<String>> {
        self.ensure_open()?;

        // Holding the slot keeps continuous recognition from opening the mic meanwhile
        let slot = self.recognizer.lock().await;
        if slot.is_some() {
            return Err(Error::EngineStart(
                "continuous recognition is active".to_string(),
            ));
        }

        let end_silence = self.end_silence;
        let utterance = tokio::task::spawn_blocking(move || capture_once(end_silence))
            .await
            .map_err(|e| Error::EngineStart(e.to_string()))??;
        drop(slot);

        let Some(samples) = utterance else {
            tracing::debug!("no speech captured");
            return Ok(None);
        };

        let wav = samples_to_wav(&samples, SAMPLE_RATE)?;
        let text = self.stt.transcribe(wav).await?;
        let text = text.trim();
        Ok((!text.is_empty()).then(|| text.to_string()))
    }

    async fn speak(&self, text: &str) -> Result<SynthesisOutcome> {
        self.ensure_open()?;

        let cancel = self.synthesizer_token();
        tracing::debug!(text, "speaking");

        let audio = tokio::select! {
            () = cancel.cancelled() => {
                return Ok(SynthesisOutcome::Canceled {
                    reason: "canceled before playback".to_string(),
                });
            }
            result = self.tts.synthesize(text) => match result {
                Ok(audio) => audio,
                Err(e) => {
                    tracing::warn!(error = %e, "synthesis failed");
                    return Ok(SynthesisOutcome::Canceled { reason: e.to_string() });
                }
            },
        };

        let format = self.tts.format();
        let sink = self.sink.clone();
        let end = tokio::task::spawn_blocking(move || -> Result<PlaybackEnd> {
            let samples = decode_audio(&audio, format)?;
            let playback = AudioPlayback::new()?;
            if cancel.is_cancelled() {
                return Ok(PlaybackEnd::Canceled);
            }

            sink.emit(EngineEvent::SynthesisStarted);
            let end = playback.play_blocking(samples, &cancel);
            sink.emit(match end {
                Ok(PlaybackEnd::Finished) => EngineEvent::SynthesisCompleted,
                _ => EngineEvent::SynthesisCanceled,
            });
            end
        })
        .await
        .map_err(|e| Error::Tts(e.to_string()))??;

        Ok(match end {
            PlaybackEnd::Finished => SynthesisOutcome::Completed,
            PlaybackEnd::Canceled => SynthesisOutcome::Canceled {
                reason: "playback interrupted".to_string(),
            },
        })
    }

    async fn cancel_speech(&self) -> Result<()> {
        self.replace_synthesizer();
        tracing::debug!("synthesizer replaced");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.replace_synthesizer();
        self.stop_continuous_recognition().await?;
        tracing::info!("cloud speech engine shut down");
        Ok(())
    }
}

impl Drop for CloudSpeechEngine {
    fn drop(&mut self) {
        self.synthesizer
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
        if let Some(recognizer) = self.recognizer.get_mut().take() {
            let _ = recognizer.stop_tx.send(());
        }
    }
}

/// Join a recognizer thread without blocking the runtime
async fn join_thread(thread: JoinHandle<()>) -> Result<()> {
    tokio::task::spawn_blocking(move || thread.join())
        .await
        .map_err(|e| Error::Audio(e.to_string()))?
        .map_err(|_| Error::Audio("recognizer thread panicked".to_string()))
}

/// Owns the input stream for the lifetime of a recognition session
fn recognizer_loop(
    mut segmenter: UtteranceSegmenter,
    jobs: &mpsc::UnboundedSender<Job>,
    stop_rx: &std_mpsc::Receiver<()>,
    ready: oneshot::Sender<Result<()>>,
) {
    let capture = match open_capture() {
        Ok(capture) => capture,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    if ready.send(Ok(())).is_err() {
        return;
    }

    loop {
        match stop_rx.recv_timeout(CHUNK_INTERVAL) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let samples = capture.take_buffer();
        if samples.is_empty() {
            continue;
        }

        let job = segmenter
            .process(&samples)
            .map(Job::Final)
            .or_else(|| segmenter.interim().map(Job::Partial));

        if let Some(job) = job {
            if jobs.send(job).is_err() {
                break;
            }
        }
    }
}

fn open_capture() -> Result<AudioCapture> {
    let mut capture = AudioCapture::new()?;
    capture.start()?;
    Ok(capture)
}

/// Capture a single utterance for push-to-talk
fn capture_once(end_silence: Duration) -> Result<Option<Vec<f32>>> {
    let capture = open_capture()?;
    let mut segmenter = UtteranceSegmenter::new(end_silence, None);
    let deadline = Instant::now() + MAX_ONE_SHOT;

    while Instant::now() < deadline {
        std::thread::sleep(CHUNK_INTERVAL);
        if let Some(utterance) = segmenter.process(&capture.take_buffer()) {
            return Ok(Some(utterance));
        }
    }

    Ok(segmenter.flush())
}

/// Transcribe jobs in order, emitting partial and final transcripts
///
/// A partial snapshot that is already followed by newer audio is skipped.
async fn run_transcriber(
    stt: SpeechToText,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    sink: EventSink,
) {
    let mut backlog = VecDeque::new();

    loop {
        if backlog.is_empty() {
            match jobs.recv().await {
                Some(job) => backlog.push_back(job),
                None => break,
            }
        }
        while let Ok(job) = jobs.try_recv() {
            backlog.push_back(job);
        }

        let Some(job) = backlog.pop_front() else {
            continue;
        };
        if matches!(job, Job::Partial(_)) && !backlog.is_empty() {
            continue;
        }

        let (samples, is_final) = match job {
            Job::Partial(samples) => (samples, false),
            Job::Final(samples) => (samples, true),
        };

        let transcript = match samples_to_wav(&samples, SAMPLE_RATE) {
            Ok(wav) => stt.transcribe(wav).await,
            Err(e) => Err(e),
        };

        match transcript {
            Ok(text) => {
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                sink.emit(if is_final {
                    EngineEvent::Final(text.to_string())
                } else {
                    EngineEvent::Partial(text.to_string())
                });
            }
            Err(e) => tracing::warn!(error = %e, is_final, "transcription failed"),
        }
    }

    tracing::debug!("transcriber finished");
}
