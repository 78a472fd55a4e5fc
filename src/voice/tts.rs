//! Text-to-speech (TTS) over HTTP

use crate::config::{ApiKeys, OutputFormat, TtsProvider, VoiceConfig};
use crate::{Error, Result};

/// Synthesizes speech from text
#[derive(Clone)]
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: String,
    voice: String,
    speed: f64,
    model: String,
    format: OutputFormat,
    provider: TtsProvider,
}

impl std::fmt::Debug for TextToSpeech {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextToSpeech")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl TextToSpeech {
    /// Create a TTS client for the configured provider
    ///
    /// # Errors
    ///
    /// Returns error if the provider's API key is missing
    pub fn from_config(voice: &VoiceConfig, keys: &ApiKeys) -> Result<Self> {
        let (api_key, name) = match voice.tts_provider {
            TtsProvider::OpenAi => (keys.openai.clone(), "OpenAI"),
            TtsProvider::ElevenLabs => (keys.elevenlabs.clone(), "ElevenLabs"),
        };

        let api_key = api_key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::Config(format!("{name} API key required for TTS")))?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice: voice.tts_voice.clone(),
            speed: voice.tts_speed,
            model: voice.tts_model.clone(),
            format: voice.output_format,
            provider: voice.tts_provider,
        })
    }

    /// Audio format returned by [`Self::synthesize`]
    #[must_use]
    pub const fn format(&self) -> OutputFormat {
        self.format
    }

    /// Synthesize text to speech
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        match self.provider {
            TtsProvider::OpenAi => self.synthesize_openai(text).await,
            TtsProvider::ElevenLabs => self.synthesize_elevenlabs(text).await,
        }
    }

    /// Synthesize using `OpenAI` TTS
    async fn synthesize_openai(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f64,
            response_format: &'a str,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
            response_format: match self.format {
                OutputFormat::Mp3 => "mp3",
                OutputFormat::Pcm24Khz16BitMono => "pcm",
            },
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        Ok(response.bytes().await?.to_vec())
    }

    /// Synthesize using ElevenLabs TTS
    async fn synthesize_elevenlabs(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
        }

        let output_format = match self.format {
            OutputFormat::Mp3 => "mp3_44100_128",
            OutputFormat::Pcm24Khz16BitMono => "pcm_24000",
        };
        let url = format!(
            "https://api.elevenlabs.io/v1/text-to-speech/{}?output_format={output_format}",
            self.voice
        );

        let request = ElevenLabsRequest {
            text,
            model_id: &self.model,
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("ElevenLabs TTS error {status}: {body}")));
        }

        Ok(response.bytes().await?.to_vec())
    }
}
