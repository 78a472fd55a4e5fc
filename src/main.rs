use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use voice_chat::voice::{
    AudioCapture, AudioPlayback, PLAYBACK_SAMPLE_RATE, TextToSpeech, calculate_energy,
    decode_audio,
};
use voice_chat::{
    CannedResponder, ChatMessage, CloudSpeechEngine, Config, EngineEvents, MessageId, Phase,
    Sender, SessionHandle, SessionSettings, SessionView, SpeechEngine, UnavailableEngine,
    VoiceSession,
};

/// Voice Chat - talk or type to a canned responder
#[derive(Parser)]
#[command(name = "voice-chat", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Disable voice features (text chat only)
    #[arg(long, env = "VOICE_CHAT_DISABLE_VOICE")]
    disable_voice: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Chat in the terminal (default)
    Chat,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// Interactive first-run setup
    Setup,
}

const HELP: &str = "\
Type a message and press enter to send it.
  /voice      enter voice mode (mic opens)
  /end        end voice mode
  /mic        interrupt speech, or toggle the mic
  /interrupt  stop the reply being spoken
  /ptt        push-to-talk: capture one utterance
  /help       show this help
  /quit       exit";

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity; logs go to stderr, chat to stdout
    let filter = match cli.verbose {
        0 => "warn,voice_chat=warn",
        1 => "warn,voice_chat=info",
        2 => "info,voice_chat=debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => chat(cli.disable_voice).await,
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestSpeaker => test_speaker().await,
        Command::TestTts { text } => test_tts(&text).await,
        Command::Setup => voice_chat::setup::run_setup(),
    }
}

/// Build the speech engine, falling back to text-only when voice is unusable
fn build_engine(config: &Config) -> (Arc<dyn SpeechEngine>, EngineEvents, bool) {
    if !config.voice.enabled {
        let (engine, events) = UnavailableEngine::new("voice disabled");
        return (Arc::new(engine), events, false);
    }

    match CloudSpeechEngine::new(config) {
        Ok((engine, events)) => (Arc::new(engine), events, true),
        Err(e) => {
            tracing::warn!(error = %e, "voice unavailable, continuing with text only");
            let (engine, events) = UnavailableEngine::new(e.to_string());
            (Arc::new(engine), events, false)
        }
    }
}

/// Terminal chat front-end
async fn chat(disable_voice: bool) -> anyhow::Result<()> {
    let config = Config::load_with_options(disable_voice)?;
    tracing::debug!(
        voice_enabled = config.voice.enabled,
        listen_mode = ?config.voice.listen_mode,
        session = ?config.session,
        "loaded configuration"
    );

    let (engine, events, voice_available) = build_engine(&config);
    let mut settings = SessionSettings::from_config(&config);
    if !voice_available {
        settings.voice_input = false;
        settings.speak_replies = false;
    }

    let responder = Arc::new(CannedResponder::with_latency(config.session.response_delay));
    let session = VoiceSession::spawn(engine, events, responder, settings);

    println!("{HELP}\n");
    if !voice_available {
        println!("(voice unavailable, run `voice-chat setup` to configure it)\n");
    }

    let renderer = tokio::spawn(render(session.subscribe()));
    let result = read_commands(&session).await;

    session.shutdown().await.ok();
    renderer.abort();
    result
}

async fn read_commands(session: &SessionHandle) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            return Ok(());
        };

        match line.trim() {
            "" => {}
            "/quit" | "/exit" => return Ok(()),
            "/help" => println!("{HELP}"),
            "/voice" => session.enter_voice_mode().await?,
            "/end" => session.end_voice_mode().await?,
            "/mic" => session.mic_or_interrupt().await?,
            "/interrupt" => session.cancel_tts().await?,
            "/ptt" => session.tap_mic().await?,
            text if text.starts_with('/') => println!("unknown command {text}, try /help"),
            text => {
                session.on_input_change(text).await?;
                session.send_text().await?;
            }
        }
    }
}

/// Print new and resolved messages, phase changes and live transcripts
async fn render(mut view: watch::Receiver<SessionView>) {
    let mut shown: HashMap<MessageId, bool> = HashMap::new();
    let mut phase = Phase::Idle;
    let mut partial = String::new();

    loop {
        {
            let current = view.borrow_and_update();

            for message in current.messages.iter() {
                match shown.insert(message.id, message.thinking) {
                    None => print_message(message),
                    Some(true) if !message.thinking => print_message(message),
                    _ => {}
                }
            }

            if current.phase != phase {
                phase = current.phase;
                println!("  [{phase}]");
            }

            let input = &current.state.input;
            if phase == Phase::Listening && !input.is_empty() && *input != partial {
                println!("  ... {input}");
            }
            partial.clone_from(input);
        }

        if view.changed().await.is_err() {
            break;
        }
    }
}

fn print_message(message: &ChatMessage) {
    let time = message
        .created_at
        .with_timezone(&chrono::Local)
        .format("%H:%M:%S");
    let who = match message.sender {
        Sender::User => "you",
        Sender::Bot => "bot",
    };

    if message.thinking {
        println!("{time} {who}: ...");
    } else {
        println!("{time} {who}: {}", message.text);
    }
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new()?;
    capture.start()?;
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.take_buffer();
        let energy = calculate_energy(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Play samples on a blocking thread
async fn play(samples: Vec<f32>) -> anyhow::Result<()> {
    tokio::task::spawn_blocking(move || -> voice_chat::Result<()> {
        let playback = AudioPlayback::new()?;
        playback.play_blocking(samples, &CancellationToken::new())?;
        Ok(())
    })
    .await??;
    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let frequency = 440.0_f32;
    let num_samples = PLAYBACK_SAMPLE_RATE as usize * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / PLAYBACK_SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {PLAYBACK_SAMPLE_RATE} Hz...", samples.len());
    play(samples).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

/// Test TTS output with the configured provider
async fn test_tts(text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let config = Config::load()?;
    let tts = TextToSpeech::from_config(&config.voice, &config.api_keys)?;

    println!("Synthesizing speech with {tts:?}...");
    let audio = tts.synthesize(text).await?;
    println!("Got {} bytes of audio data", audio.len());

    let samples = decode_audio(&audio, tts.format())?;
    println!("Playing {} samples...", samples.len());
    play(samples).await?;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}
