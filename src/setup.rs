//! Interactive first-run setup wizard (`voice-chat setup`)

use std::path::PathBuf;

use dialoguer::{Confirm, Input, Select};

use crate::config::file::{
    ConfigFile, SessionFileConfig, VoiceFileConfig, config_file_path,
    load_config_file, write_config_file,
};
use crate::config::{ListenMode, OutputFormat, SttProvider, TtsProvider};

/// Run the interactive setup wizard
///
/// # Errors
///
/// Returns error if user input fails or config cannot be written
pub fn run_setup() -> anyhow::Result<()> {
    println!("Voice Chat Setup\n");

    let existing = load_config_file();
    let config_path = config_file_path()
        .unwrap_or_else(|| PathBuf::from("~/.config/voice-chat/config.toml"));

    if config_path.exists() {
        println!("Existing config found at {}\n", config_path.display());
    }

    // 1. Voice on/off
    let enable_voice = Confirm::new()
        .with_prompt("Enable voice (microphone and spoken replies)?")
        .default(existing.voice.enabled.unwrap_or(true))
        .interact()?;

    if !enable_voice {
        let config_file = ConfigFile {
            voice: VoiceFileConfig {
                enabled: Some(false),
                ..existing.voice
            },
            session: existing.session,
            api_keys: existing.api_keys,
        };
        write_config_file(&config_path, &config_file)?;
        println!("\nConfig written to {}", config_path.display());
        println!("\nSetup complete! Run `voice-chat` to start typing.");
        return Ok(());
    }

    let mut api_keys = existing.api_keys;

    // 2. Speech-to-text provider
    let stt_labels = ["OpenAI Whisper", "Deepgram"];
    let stt_default = match existing.voice.stt_provider {
        Some(SttProvider::Deepgram) => 1,
        _ => 0,
    };
    let stt_provider = match Select::new()
        .with_prompt("Speech-to-text provider")
        .items(&stt_labels)
        .default(stt_default)
        .interact()?
    {
        1 => SttProvider::Deepgram,
        _ => SttProvider::Whisper,
    };

    // 3. Text-to-speech provider
    let tts_labels = ["OpenAI", "ElevenLabs"];
    let tts_default = match existing.voice.tts_provider {
        Some(TtsProvider::ElevenLabs) => 1,
        _ => 0,
    };
    let tts_provider = match Select::new()
        .with_prompt("Text-to-speech provider")
        .items(&tts_labels)
        .default(tts_default)
        .interact()?
    {
        1 => TtsProvider::ElevenLabs,
        _ => TtsProvider::OpenAi,
    };

    // 4. API keys for the chosen providers
    let needs_openai =
        stt_provider == SttProvider::Whisper || tts_provider == TtsProvider::OpenAi;
    if needs_openai {
        api_keys.openai = prompt_key("OpenAI", "OPENAI_API_KEY", api_keys.openai.take())?;
    }
    if stt_provider == SttProvider::Deepgram {
        api_keys.deepgram = prompt_key("Deepgram", "DEEPGRAM_API_KEY", api_keys.deepgram.take())?;
    }
    if tts_provider == TtsProvider::ElevenLabs {
        api_keys.elevenlabs =
            prompt_key("ElevenLabs", "ELEVENLABS_API_KEY", api_keys.elevenlabs.take())?;
    }

    // 5. Locale and voice
    let locale: String = Input::new()
        .with_prompt("Recognition locale")
        .default(existing.voice.locale.unwrap_or_else(|| "en-US".to_string()))
        .interact_text()?;

    let default_voice = existing.voice.tts_voice.unwrap_or_else(|| match tts_provider {
        TtsProvider::OpenAi => "alloy".to_string(),
        TtsProvider::ElevenLabs => "21m00Tcm4TlvDq8ikWAM".to_string(),
    });
    let tts_voice: String = Input::new()
        .with_prompt("Synthesis voice")
        .default(default_voice)
        .interact_text()?;

    // 6. Listen mode
    let listen_labels = ["Continuous (hands-free)", "Push-to-talk"];
    let listen_default = match existing.voice.listen_mode {
        Some(ListenMode::PushToTalk) => 1,
        _ => 0,
    };
    let listen_mode = match Select::new()
        .with_prompt("Listen mode")
        .items(&listen_labels)
        .default(listen_default)
        .interact()?
    {
        1 => ListenMode::PushToTalk,
        _ => ListenMode::Continuous,
    };

    let speak_replies = Confirm::new()
        .with_prompt("Speak replies aloud?")
        .default(existing.session.speak_replies.unwrap_or(true))
        .interact()?;

    // 7. Build and write config
    let tts_model = existing.voice.tts_model.unwrap_or_else(|| match tts_provider {
        TtsProvider::OpenAi => "tts-1".to_string(),
        TtsProvider::ElevenLabs => "eleven_turbo_v2_5".to_string(),
    });
    let stt_model = existing.voice.stt_model.unwrap_or_else(|| match stt_provider {
        SttProvider::Whisper => "whisper-1".to_string(),
        SttProvider::Deepgram => "nova-2".to_string(),
    });

    let config_file = ConfigFile {
        voice: VoiceFileConfig {
            enabled: Some(true),
            listen_mode: Some(listen_mode),
            locale: Some(locale),
            stt_provider: Some(stt_provider),
            stt_model: Some(stt_model),
            tts_provider: Some(tts_provider),
            tts_model: Some(tts_model),
            tts_voice: Some(tts_voice),
            tts_speed: existing.voice.tts_speed.or(Some(1.0)),
            output_format: existing.voice.output_format.or(Some(OutputFormat::Mp3)),
            end_silence_timeout_ms: existing.voice.end_silence_timeout_ms,
            partial_interval_ms: existing.voice.partial_interval_ms,
        },
        session: SessionFileConfig {
            speak_replies: Some(speak_replies),
            ..existing.session
        },
        api_keys,
    };

    write_config_file(&config_path, &config_file)?;
    println!("\nConfig written to {}", config_path.display());
    println!("\nSetup complete! Run `voice-chat`, then type /voice to start talking.");

    Ok(())
}

/// Ask for an API key, keeping the current one on blank input
fn prompt_key(
    provider: &str,
    env_hint: &str,
    current: Option<String>,
) -> anyhow::Result<Option<String>> {
    let prompt = match current.as_deref() {
        Some(key) => format!("{provider} API key (current: {}, leave blank to keep)", mask(key)),
        None => format!("{provider} API key ({env_hint})"),
    };

    let input: String = Input::new()
        .with_prompt(&prompt)
        .allow_empty(true)
        .interact_text()?;

    Ok(if input.trim().is_empty() {
        current
    } else {
        Some(input.trim().to_string())
    })
}

fn mask(key: &str) -> String {
    if key.len() > 8 && key.is_ascii() {
        format!("{}...{}", &key[..4], &key[key.len() - 4..])
    } else {
        "****".to_string()
    }
}
