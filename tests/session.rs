//! Voice session controller integration tests
//!
//! Drives the controller against a scripted engine with paused time

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use voice_chat::config::ListenMode;
use voice_chat::responder::ROAMING_REPLY;
use voice_chat::{
    EngineEvent, Error, MicState, Mode, Phase, ResponseGenerator, Result, Sender,
    SessionSettings, SessionState, VoiceSession,
};

mod common;
use common::{
    Call, MockEngine, MockScript, drain, first_reply_resolved, last_text, spawn_session,
    voice_settings, wait_until,
};

/// Mic moves only along the edges of its state machine
fn assert_valid_mic_sequence(states: &[SessionState]) {
    let mut mics: Vec<MicState> = states.iter().map(|s| s.mic).collect();
    mics.dedup();

    for pair in mics.windows(2) {
        let allowed = matches!(
            (pair[0], pair[1]),
            (MicState::Idle, MicState::Starting)
                | (MicState::Starting, MicState::Listening | MicState::Idle)
                | (MicState::Listening, MicState::Stopping | MicState::Idle)
                | (MicState::Stopping, MicState::Idle)
        );
        assert!(allowed, "illegal mic transition {:?} -> {:?}", pair[0], pair[1]);
    }
}

fn assert_never_listening_while_speaking(states: &[SessionState]) {
    assert!(
        states.iter().all(|s| !(s.mic == MicState::Listening && s.speaking)),
        "listening and speaking at once"
    );
}

#[tokio::test(start_paused = true)]
async fn test_send_text_resolves_placeholder_in_place() {
    let (engine, events) = MockEngine::new();
    let session = spawn_session(&engine, events, voice_settings());

    session.on_input_change("hello").await.unwrap();
    assert_eq!(session.input(), "hello");
    session.send_text().await.unwrap();

    let view = session.view();
    assert_eq!(view.state.input, "");
    assert_eq!(view.messages.len(), 3);
    assert_eq!(view.messages[1].sender, Sender::User);
    assert_eq!(view.messages[1].text, "hello");
    assert!(view.messages[2].thinking);
    let placeholder_id = view.messages[2].id;

    tokio::time::sleep(Duration::from_millis(1900)).await;
    assert!(session.messages()[2].thinking);

    let view = wait_until(&session, first_reply_resolved).await;
    assert_eq!(view.messages.len(), 3);
    assert_eq!(view.messages[2].id, placeholder_id);
    assert_eq!(view.messages[2].sender, Sender::Bot);
    assert_eq!(view.messages[2].text, "You said: hello");

    // Text mode never opens the mic
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(engine.count(&Call::Start), 0);
    assert_eq!(engine.count(&Call::Speak("You said: hello".to_string())), 1);
    assert_eq!(session.state().mode, Mode::TextMode);
}

#[tokio::test(start_paused = true)]
async fn test_blank_input_is_not_sent() {
    let (engine, events) = MockEngine::new();
    let session = spawn_session(&engine, events, voice_settings());

    session.on_input_change("   ").await.unwrap();
    session.send_text().await.unwrap();

    assert_eq!(session.messages().len(), 1);
    assert_eq!(session.input(), "   ");
}

#[tokio::test(start_paused = true)]
async fn test_send_rejected_while_reply_pending() {
    let (engine, events) = MockEngine::new();
    let session = spawn_session(&engine, events, voice_settings());

    session.on_input_change("first").await.unwrap();
    session.send_text().await.unwrap();
    session.on_input_change("second").await.unwrap();
    session.send_text().await.unwrap();

    let messages = session.messages();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages.iter().filter(|m| m.thinking).count(), 1);
    assert_eq!(session.input(), "second");

    wait_until(&session, |v| v.messages.iter().all(|m| !m.thinking)).await;
    session.send_text().await.unwrap();
    assert_eq!(session.messages()[3].text, "second");
}

#[tokio::test(start_paused = true)]
async fn test_roaming_turn_stops_mic_speaks_and_rearms() {
    let (engine, events) = MockEngine::new();
    let session = spawn_session(&engine, events, voice_settings());
    let mut transitions = session.transitions();

    session.enter_voice_mode().await.unwrap();
    assert!(session.voice_session());
    wait_until(&session, |v| v.state.mic == MicState::Listening).await;
    assert_eq!(session.phase(), Phase::Listening);

    engine.emit(EngineEvent::Partial("I want to roam".to_string()));
    wait_until(&session, |v| v.state.input == "I want to roam").await;

    engine.emit(EngineEvent::Final("I want to roam in the usa".to_string()));
    let view = wait_until(&session, |v| v.messages.len() == 3).await;
    assert_eq!(view.state.input, "");
    assert_ne!(view.state.mic, MicState::Listening);
    assert_eq!(view.messages[1].text, "I want to roam in the usa");
    assert!(view.messages[2].thinking);

    let view = wait_until(&session, |v| v.state.speaking).await;
    assert_eq!(view.state.mic, MicState::Idle);
    assert_eq!(view.messages[2].text, ROAMING_REPLY);
    assert_eq!(view.phase, Phase::Speaking);

    wait_until(&session, |v| !v.state.speaking).await;
    wait_until(&session, |v| v.state.mic == MicState::Listening).await;

    assert_eq!(
        engine.calls(),
        vec![
            Call::Start,
            Call::Stop,
            Call::Speak(ROAMING_REPLY.to_string()),
            Call::Start,
        ]
    );
    assert_eq!(engine.duplex_violations(), 0);

    let states = drain(&mut transitions);
    assert_valid_mic_sequence(&states);
    assert_never_listening_while_speaking(&states);
}

#[tokio::test(start_paused = true)]
async fn test_no_mic_start_between_final_and_speech_end() {
    let (engine, events) = MockEngine::with_script(MockScript {
        speech_duration: Duration::from_secs(3),
        ..MockScript::default()
    });
    let session = spawn_session(&engine, events, voice_settings());

    session.enter_voice_mode().await.unwrap();
    wait_until(&session, |v| v.state.mic == MicState::Listening).await;

    engine.emit(EngineEvent::Final("hello".to_string()));
    wait_until(&session, |v| v.state.mic == MicState::Idle).await;

    // Thinking: manual starts are rejected
    session.start_mic().await.unwrap();
    assert_eq!(session.state().mic, MicState::Idle);

    wait_until(&session, |v| v.state.speaking).await;
    session.start_mic().await.unwrap();
    let state = session.state();
    assert_eq!(state.mic, MicState::Idle);
    assert!(state.speaking);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.count(&Call::Start), 1);
    assert_eq!(engine.duplex_violations(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_rapid_start_stop_never_skips_states() {
    let (engine, events) = MockEngine::with_script(MockScript {
        start_delay: Duration::from_millis(50),
        stop_delay: Duration::from_millis(50),
        ..MockScript::default()
    });
    let session = spawn_session(&engine, events, voice_settings());
    let mut transitions = session.transitions();

    session.enter_voice_mode().await.unwrap();
    for _ in 0..5 {
        session.start_mic().await.unwrap();
        session.stop_mic().await.unwrap();
        session.mic_or_interrupt().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    wait_until(&session, |v| !v.state.mic.is_transitioning()).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    let states = drain(&mut transitions);
    assert!(!states.is_empty());
    assert_valid_mic_sequence(&states);

    // Engine calls strictly alternate
    let mic_calls: Vec<Call> = engine
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::Start | Call::Stop))
        .collect();
    for pair in mic_calls.windows(2) {
        assert_ne!(pair[0], pair[1], "overlapping mic calls: {mic_calls:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_start_while_stopping_is_rejected() {
    let (engine, events) = MockEngine::with_script(MockScript {
        stop_delay: Duration::from_millis(200),
        ..MockScript::default()
    });
    let session = spawn_session(&engine, events, voice_settings());

    session.enter_voice_mode().await.unwrap();
    wait_until(&session, |v| v.state.mic == MicState::Listening).await;

    session.stop_mic().await.unwrap();
    assert_eq!(session.state().mic, MicState::Stopping);
    session.start_mic().await.unwrap();
    assert_eq!(session.state().mic, MicState::Stopping);

    wait_until(&session, |v| v.state.mic == MicState::Idle).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(engine.calls(), vec![Call::Start, Call::Stop]);
    assert_eq!(session.state().mic, MicState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_failed_start_reverts_to_idle() {
    let (engine, events) = MockEngine::with_script(MockScript {
        fail_start: true,
        ..MockScript::default()
    });
    let session = spawn_session(&engine, events, voice_settings());

    session.enter_voice_mode().await.unwrap();
    assert_eq!(session.state().mic, MicState::Starting);

    let view = wait_until(&session, |v| v.state.mic == MicState::Idle).await;
    assert_eq!(view.state.mode, Mode::VoiceMode);
    assert!(!view.state.speaking);

    // Retrying is allowed once settled
    session.start_mic().await.unwrap();
    assert_eq!(session.state().mic, MicState::Starting);
}

#[tokio::test(start_paused = true)]
async fn test_barge_in_cancels_speech_and_reopens_mic() {
    let (engine, events) = MockEngine::with_script(MockScript {
        speech_duration: Duration::from_secs(10),
        ..MockScript::default()
    });
    let session = spawn_session(&engine, events, voice_settings());
    let mut transitions = session.transitions();

    session.enter_voice_mode().await.unwrap();
    wait_until(&session, |v| v.state.mic == MicState::Listening).await;
    engine.emit(EngineEvent::Final("tell me a long story".to_string()));
    wait_until(&session, |v| v.state.speaking).await;

    session.mic_or_interrupt().await.unwrap();
    let state = session.state();
    assert!(!state.speaking);
    assert_eq!(state.mic, MicState::Starting);
    assert_eq!(session.phase(), Phase::Interrupted);

    wait_until(&session, |v| v.state.mic == MicState::Listening).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    // A requested interruption is not reported as a failure
    assert!(
        session
            .messages()
            .iter()
            .all(|m| !m.text.starts_with("TTS canceled"))
    );
    assert_eq!(engine.count(&Call::CancelSpeech), 1);
    assert_eq!(session.state().mic, MicState::Listening);

    let states = drain(&mut transitions);
    assert_valid_mic_sequence(&states);
    assert_never_listening_while_speaking(&states);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_tts_when_silent_is_noop() {
    let (engine, events) = MockEngine::new();
    let session = spawn_session(&engine, events, voice_settings());

    session.cancel_tts().await.unwrap();
    session.cancel_tts().await.unwrap();

    assert!(engine.calls().is_empty());
    assert_eq!(session.phase(), Phase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_engine_cancellation_becomes_bot_message() {
    let (engine, events) = MockEngine::with_script(MockScript {
        cancel_reason: Some("network error".to_string()),
        ..MockScript::default()
    });
    let session = spawn_session(&engine, events, voice_settings());

    session.on_input_change("hello").await.unwrap();
    session.send_text().await.unwrap();

    let view = wait_until(&session, |v| v.messages.len() == 4).await;
    assert_eq!(view.messages[2].text, "You said: hello");
    assert_eq!(last_text(&view), "TTS canceled: network error");
    assert_eq!(view.messages[3].sender, Sender::Bot);
    assert!(!view.state.speaking);
}

#[tokio::test(start_paused = true)]
async fn test_end_voice_mode_while_speaking() {
    let (engine, events) = MockEngine::with_script(MockScript {
        speech_duration: Duration::from_secs(10),
        ..MockScript::default()
    });
    let session = spawn_session(&engine, events, voice_settings());

    session.enter_voice_mode().await.unwrap();
    wait_until(&session, |v| v.state.mic == MicState::Listening).await;
    engine.emit(EngineEvent::Final("hello".to_string()));
    wait_until(&session, |v| v.state.speaking).await;

    session.end_voice_mode().await.unwrap();
    let state = session.state();
    assert_eq!(state.mode, Mode::TextMode);
    assert_eq!(state.mic, MicState::Idle);
    assert!(!state.speaking);

    // No re-arm and no failure report afterwards
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(engine.count(&Call::Start), 1);
    assert_eq!(session.state().mic, MicState::Idle);
    assert!(
        session
            .messages()
            .iter()
            .all(|m| !m.text.starts_with("TTS canceled"))
    );

    // Idempotent
    session.end_voice_mode().await.unwrap();
    assert_eq!(engine.count(&Call::CancelSpeech), 1);
}

#[tokio::test(start_paused = true)]
async fn test_end_voice_mode_while_listening_stops_mic_first() {
    let (engine, events) = MockEngine::new();
    let session = spawn_session(&engine, events, voice_settings());
    let mut transitions = session.transitions();

    session.enter_voice_mode().await.unwrap();
    wait_until(&session, |v| v.state.mic == MicState::Listening).await;
    session.end_voice_mode().await.unwrap();

    assert_eq!(engine.calls(), vec![Call::Start, Call::Stop]);
    let states = drain(&mut transitions);
    let last = states.last().unwrap();
    assert_eq!(last.mode, Mode::TextMode);
    assert_eq!(last.mic, MicState::Idle);

    // The mode only flips once the mic is idle
    assert!(
        states
            .iter()
            .all(|s| s.mode == Mode::VoiceMode || s.mic == MicState::Idle)
    );
}

#[tokio::test(start_paused = true)]
async fn test_end_voice_mode_while_starting() {
    let (engine, events) = MockEngine::with_script(MockScript {
        start_delay: Duration::from_millis(300),
        ..MockScript::default()
    });
    let session = spawn_session(&engine, events, voice_settings());

    session.enter_voice_mode().await.unwrap();
    assert_eq!(session.state().mic, MicState::Starting);
    session.end_voice_mode().await.unwrap();

    let state = session.state();
    assert_eq!(state.mode, Mode::TextMode);
    assert_eq!(state.mic, MicState::Idle);
    assert_eq!(engine.calls(), vec![Call::Start, Call::Stop]);
}

#[tokio::test(start_paused = true)]
async fn test_no_rearm_after_voice_mode_ends_mid_turn() {
    let (engine, events) = MockEngine::new();
    let session = spawn_session(&engine, events, voice_settings());

    session.enter_voice_mode().await.unwrap();
    wait_until(&session, |v| v.state.mic == MicState::Listening).await;
    engine.emit(EngineEvent::Final("hello".to_string()));
    wait_until(&session, |v| v.messages.len() == 3).await;

    session.end_voice_mode().await.unwrap();
    wait_until(&session, first_reply_resolved).await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(
        engine.calls(),
        vec![
            Call::Start,
            Call::Stop,
            Call::Speak("You said: hello".to_string()),
        ]
    );
    assert_eq!(session.state().mic, MicState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_typed_reply_waits_for_mic_to_close() {
    let (engine, events) = MockEngine::new();
    let session = spawn_session(&engine, events, voice_settings());

    session.enter_voice_mode().await.unwrap();
    wait_until(&session, |v| v.state.mic == MicState::Listening).await;

    session.on_input_change("typed while listening").await.unwrap();
    session.send_text().await.unwrap();
    assert_eq!(session.state().mic, MicState::Listening);

    wait_until(&session, |v| v.state.speaking).await;
    wait_until(&session, |v| v.state.mic == MicState::Listening && !v.state.speaking).await;

    assert_eq!(
        engine.calls(),
        vec![
            Call::Start,
            Call::Stop,
            Call::Speak("You said: typed while listening".to_string()),
            Call::Start,
        ]
    );
    assert_eq!(engine.duplex_violations(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_partials_ignored_while_speaking() {
    let (engine, events) = MockEngine::with_script(MockScript {
        speech_duration: Duration::from_secs(5),
        ..MockScript::default()
    });
    let session = spawn_session(&engine, events, voice_settings());

    session.enter_voice_mode().await.unwrap();
    wait_until(&session, |v| v.state.mic == MicState::Listening).await;
    engine.emit(EngineEvent::Final("hello".to_string()));
    wait_until(&session, |v| v.state.speaking).await;

    engine.emit(EngineEvent::Partial("you said hello".to_string()));
    engine.emit(EngineEvent::Final("you said hello".to_string()));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let view = session.view();
    assert_eq!(view.state.input, "");
    assert_eq!(view.messages.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_blank_final_is_ignored() {
    let (engine, events) = MockEngine::new();
    let session = spawn_session(&engine, events, voice_settings());

    session.enter_voice_mode().await.unwrap();
    wait_until(&session, |v| v.state.mic == MicState::Listening).await;
    engine.emit(EngineEvent::Final("   ".to_string()));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(session.state().mic, MicState::Listening);
    assert_eq!(session.messages().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unexpected_session_stop_resets_mic() {
    let (engine, events) = MockEngine::new();
    let session = spawn_session(&engine, events, voice_settings());

    session.enter_voice_mode().await.unwrap();
    wait_until(&session, |v| v.state.mic == MicState::Listening).await;

    engine.emit(EngineEvent::SessionStopped);
    let view = wait_until(&session, |v| v.state.mic == MicState::Idle).await;
    assert_eq!(view.state.mode, Mode::VoiceMode);
}

#[tokio::test(start_paused = true)]
async fn test_push_to_talk_submits_one_utterance() {
    let (engine, events) = MockEngine::with_script(MockScript {
        heard: Some("  what about roaming in the USA  ".to_string()),
        ..MockScript::default()
    });
    let settings = SessionSettings {
        listen_mode: ListenMode::PushToTalk,
        ..voice_settings()
    };
    let session = spawn_session(&engine, events, settings);

    // Continuous start is unavailable in push-to-talk mode
    session.enter_voice_mode().await.unwrap();
    assert_eq!(session.state().mic, MicState::Idle);

    session.tap_mic().await.unwrap();
    assert_eq!(session.phase(), Phase::Listening);
    session.tap_mic().await.unwrap();

    let view = wait_until(&session, |v| v.messages.len() == 3).await;
    assert_eq!(view.messages[1].text, "what about roaming in the USA");

    let view = wait_until(&session, first_reply_resolved).await;
    assert_eq!(view.messages[2].text, ROAMING_REPLY);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(engine.count(&Call::RecognizeOnce), 1);
    assert_eq!(engine.count(&Call::Start), 0);
}

#[tokio::test(start_paused = true)]
async fn test_silent_replies_rearm_without_speaking() {
    let (engine, events) = MockEngine::new();
    let settings = SessionSettings {
        speak_replies: false,
        ..voice_settings()
    };
    let session = spawn_session(&engine, events, settings);

    session.enter_voice_mode().await.unwrap();
    wait_until(&session, |v| v.state.mic == MicState::Listening).await;
    engine.emit(EngineEvent::Final("hello".to_string()));

    wait_until(&session, first_reply_resolved).await;
    wait_until(&session, |v| v.state.mic == MicState::Listening).await;

    assert_eq!(engine.calls(), vec![Call::Start, Call::Stop, Call::Start]);
}

struct FailingResponder;

#[async_trait]
impl ResponseGenerator for FailingResponder {
    async fn reply(&self, _text: &str) -> Result<String> {
        Err(Error::ResponseGeneration("backend offline".to_string()))
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_reply_replaces_placeholder_with_diagnostic() {
    let (engine, events) = MockEngine::new();
    let session = VoiceSession::spawn(
        Arc::clone(&engine) as Arc<dyn voice_chat::SpeechEngine>,
        events,
        Arc::new(FailingResponder),
        voice_settings(),
    );

    session.enter_voice_mode().await.unwrap();
    wait_until(&session, |v| v.state.mic == MicState::Listening).await;
    engine.emit(EngineEvent::Final("hello".to_string()));

    let view = wait_until(&session, first_reply_resolved).await;
    assert!(view.messages[2].text.contains("backend offline"));

    // Nothing is spoken and the mic comes back
    wait_until(&session, |v| v.state.mic == MicState::Listening).await;
    assert!(!engine.calls().iter().any(|c| matches!(c, Call::Speak(_))));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_releases_engine() {
    let (engine, events) = MockEngine::new();
    let session = spawn_session(&engine, events, voice_settings());

    session.enter_voice_mode().await.unwrap();
    wait_until(&session, |v| v.state.mic == MicState::Listening).await;

    session.shutdown().await.unwrap();
    assert_eq!(engine.calls(), vec![Call::Start, Call::Stop, Call::Shutdown]);
    assert!(matches!(
        session.enter_voice_mode().await,
        Err(Error::SessionClosed)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_dropping_handles_releases_engine() {
    let (engine, events) = MockEngine::new();
    let session = spawn_session(&engine, events, voice_settings());
    let observer = session.subscribe();

    drop(session);
    for _ in 0..10 {
        if engine.count(&Call::Shutdown) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(engine.count(&Call::Shutdown), 1);
    drop(observer);
}

#[tokio::test(start_paused = true)]
async fn test_interrupting_parked_reply_reopens_mic_after_stop() {
    let (engine, events) = MockEngine::with_script(MockScript {
        stop_delay: Duration::from_millis(300),
        ..MockScript::default()
    });
    let session = spawn_session(&engine, events, voice_settings());

    session.enter_voice_mode().await.unwrap();
    wait_until(&session, |v| v.state.mic == MicState::Listening).await;

    session.on_input_change("typed").await.unwrap();
    session.send_text().await.unwrap();

    // The reply is parked while the mic closes
    wait_until(&session, |v| v.state.mic == MicState::Stopping).await;
    session.mic_or_interrupt().await.unwrap();
    assert_eq!(session.phase(), Phase::Interrupted);

    tokio::time::sleep(Duration::from_secs(10)).await;

    let view = session.view();
    assert_eq!(view.state.mode, Mode::VoiceMode);
    assert_eq!(view.state.mic, MicState::Listening);
    assert_eq!(view.phase, Phase::Listening);
    assert_eq!(
        engine.calls(),
        vec![Call::Start, Call::Stop, Call::CancelSpeech, Call::Start]
    );
}

#[tokio::test(start_paused = true)]
async fn test_instant_silent_reply_rearms_after_stop() {
    let (engine, events) = MockEngine::with_script(MockScript {
        stop_delay: Duration::from_millis(300),
        ..MockScript::default()
    });
    let session = VoiceSession::spawn(
        Arc::clone(&engine) as Arc<dyn voice_chat::SpeechEngine>,
        events,
        Arc::new(voice_chat::CannedResponder::new()),
        SessionSettings {
            speak_replies: false,
            ..voice_settings()
        },
    );

    session.enter_voice_mode().await.unwrap();
    wait_until(&session, |v| v.state.mic == MicState::Listening).await;
    engine.emit(EngineEvent::Final("hello".to_string()));

    // Resolved before the mic finished closing
    let view = wait_until(&session, first_reply_resolved).await;
    assert_eq!(view.state.mic, MicState::Stopping);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(session.state().mic, MicState::Listening);
    assert_eq!(engine.calls(), vec![Call::Start, Call::Stop, Call::Start]);
}

#[tokio::test(start_paused = true)]
async fn test_final_while_starting_closes_mic_for_the_turn() {
    let (engine, events) = MockEngine::with_script(MockScript {
        start_delay: Duration::from_millis(300),
        ..MockScript::default()
    });
    let session = spawn_session(&engine, events, voice_settings());

    session.enter_voice_mode().await.unwrap();
    assert_eq!(session.state().mic, MicState::Starting);
    engine.emit(EngineEvent::Final("hello".to_string()));

    let view = wait_until(&session, |v| {
        v.messages.len() == 3 && v.state.mic == MicState::Idle
    })
    .await;
    assert!(view.messages[2].thinking);
    assert_eq!(view.phase, Phase::Thinking);
    assert_eq!(engine.calls(), vec![Call::Start, Call::Stop]);

    wait_until(&session, |v| v.state.speaking).await;
    wait_until(&session, |v| v.state.mic == MicState::Listening).await;
    assert_eq!(engine.duplex_violations(), 0);
    assert_eq!(
        engine.calls(),
        vec![
            Call::Start,
            Call::Stop,
            Call::Speak("You said: hello".to_string()),
            Call::Start,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_right_after_reply_never_starts_playback() {
    let (engine, events) = MockEngine::new();
    let session = VoiceSession::spawn(
        Arc::clone(&engine) as Arc<dyn voice_chat::SpeechEngine>,
        events,
        Arc::new(voice_chat::CannedResponder::new()),
        voice_settings(),
    );

    session.on_input_change("hello").await.unwrap();
    session.send_text().await.unwrap();
    session.cancel_tts().await.unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;

    // Whatever the interleaving, nothing is spoken after the cancel
    let calls = engine.calls();
    if let Some(cancel_at) = calls.iter().position(|c| *c == Call::CancelSpeech) {
        assert!(
            !calls[cancel_at..].iter().any(|c| matches!(c, Call::Speak(_))),
            "speech started after cancel: {calls:?}"
        );
    }
    let view = session.view();
    assert!(!view.state.speaking);
    assert!(view.messages.iter().all(|m| !m.text.starts_with("TTS canceled")));
}
