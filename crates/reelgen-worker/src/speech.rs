//! Speech synthesis adapter.
//!
//! Providers only turn text into audio bytes. [`SpeechSynthesizer`] owns the
//! rest: voice resolution, retries with linear backoff, the primary to
//! fallback chain, and writing a validated file atomically into place.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use reelgen_media::fs_utils::sibling_temp_path;
use reelgen_media::validate_audio_file;
use reelgen_models::{PlanTier, VoiceGender, VoiceSelector};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::SpeechConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::http::{build_client, check_status, map_send_error};
use crate::metrics::record_provider_call;
use crate::retry::{retry_async, RetryPolicy};

/// Voice ids a provider uses for each selection route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceBook {
    pub default: String,
    /// Default for paid tiers.
    pub premium_default: String,
    pub male: String,
    pub female: String,
    /// Whether explicit voice ids are meaningful to this provider.
    pub accepts_explicit: bool,
}

impl VoiceBook {
    /// Explicit id, then gendered preset, then the tier default.
    pub fn resolve(&self, selector: &VoiceSelector, tier: PlanTier) -> String {
        if self.accepts_explicit {
            if let Some(id) = selector.voice_id.as_deref().filter(|id| !id.trim().is_empty()) {
                return id.to_string();
            }
        }
        match selector.gender {
            Some(VoiceGender::Male) => self.male.clone(),
            Some(VoiceGender::Female) => self.female.clone(),
            None if tier.is_paid() => self.premium_default.clone(),
            None => self.default.clone(),
        }
    }
}

/// A text-to-speech backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn voices(&self) -> &VoiceBook;

    /// Synthesize `text` with `voice`, returning encoded audio.
    async fn synthesize(&self, text: &str, voice: &str) -> WorkerResult<Vec<u8>>;
}

/// Narration step used by the session pipeline.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Narrator: Send + Sync {
    /// Write narration for `text` to `output`.
    async fn narrate(
        &self,
        text: &str,
        voice: &VoiceSelector,
        tier: PlanTier,
        output: &Path,
    ) -> WorkerResult<()>;
}

// ============================================================================
// ElevenLabs
// ============================================================================

#[derive(Debug, Serialize)]
struct ElevenLabsRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Debug, Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

/// ElevenLabs-compatible text-to-speech client.
pub struct ElevenLabsProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    voices: VoiceBook,
}

impl ElevenLabsProvider {
    pub fn new(config: &SpeechConfig, client: Client) -> Self {
        Self {
            client,
            api_key: config.elevenlabs_api_key.clone(),
            base_url: config.elevenlabs_base_url.clone(),
            model: config.elevenlabs_model.clone(),
            voices: config.elevenlabs_voices.clone(),
        }
    }
}

#[async_trait]
impl SpeechProvider for ElevenLabsProvider {
    fn name(&self) -> &'static str {
        "elevenlabs"
    }

    fn voices(&self) -> &VoiceBook {
        &self.voices
    }

    async fn synthesize(&self, text: &str, voice: &str) -> WorkerResult<Vec<u8>> {
        let url = format!("{}/text-to-speech/{}", self.base_url, voice);
        let body = ElevenLabsRequest {
            text,
            model_id: &self.model,
            voice_settings: VoiceSettings {
                stability: 0.5,
                similarity_boost: 0.5,
            },
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .header("Accept", "audio/mpeg")
            .json(&body)
            .send()
            .await
            .map_err(|e| map_send_error("elevenlabs", e))?;
        let response = check_status("elevenlabs", response).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

// ============================================================================
// OpenAI speech
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAiSpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'static str,
}

/// OpenAI-compatible `audio/speech` client, used as the fallback.
pub struct OpenAiSpeechProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    voices: VoiceBook,
}

impl OpenAiSpeechProvider {
    pub fn new(config: &SpeechConfig, api_key: String, client: Client) -> Self {
        Self {
            client,
            api_key,
            base_url: config.openai_base_url.clone(),
            model: config.openai_model.clone(),
            voices: config.openai_voices.clone(),
        }
    }
}

#[async_trait]
impl SpeechProvider for OpenAiSpeechProvider {
    fn name(&self) -> &'static str {
        "openai_tts"
    }

    fn voices(&self) -> &VoiceBook {
        &self.voices
    }

    async fn synthesize(&self, text: &str, voice: &str) -> WorkerResult<Vec<u8>> {
        let url = format!("{}/audio/speech", self.base_url);
        let body = OpenAiSpeechRequest {
            model: &self.model,
            input: text,
            voice,
            response_format: "mp3",
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_send_error("openai_tts", e))?;
        let response = check_status("openai_tts", response).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

// ============================================================================
// Synthesizer
// ============================================================================

/// Provider chain with retries and file integrity checks.
pub struct SpeechSynthesizer {
    providers: Vec<Arc<dyn SpeechProvider>>,
    policy: RetryPolicy,
}

impl SpeechSynthesizer {
    pub fn new(primary: Arc<dyn SpeechProvider>, policy: RetryPolicy) -> Self {
        Self {
            providers: vec![primary],
            policy,
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn SpeechProvider>) -> Self {
        self.providers.push(fallback);
        self
    }

    /// Build the configured ElevenLabs to OpenAI chain.
    pub fn from_config(config: &SpeechConfig, timeout: std::time::Duration) -> WorkerResult<Self> {
        let client = build_client(timeout)?;
        let policy = RetryPolicy::linear("speech", config.max_attempts, config.retry_step);
        let mut synthesizer =
            Self::new(Arc::new(ElevenLabsProvider::new(config, client.clone())), policy);
        if let Some(key) = &config.openai_api_key {
            synthesizer = synthesizer
                .with_fallback(Arc::new(OpenAiSpeechProvider::new(config, key.clone(), client)));
        }
        Ok(synthesizer)
    }

    /// Synthesize `text` into `output`.
    ///
    /// Each provider gets the full retry budget before the next one is tried.
    /// `output` only ever holds a validated file.
    pub async fn synthesize(
        &self,
        text: &str,
        selector: &VoiceSelector,
        tier: PlanTier,
        output: &Path,
    ) -> WorkerResult<()> {
        if text.trim().is_empty() {
            return Err(WorkerError::invalid_input("Nothing to narrate"));
        }

        let mut last_error = None;
        for provider in &self.providers {
            let voice = provider.voices().resolve(selector, tier);
            debug!(provider = provider.name(), voice = %voice, "Synthesizing narration");

            let provider = provider.as_ref();
            let voice = voice.as_str();
            let result = retry_async(&self.policy, is_worth_retrying, move || async move {
                let audio = provider.synthesize(text, voice).await?;
                write_validated(&audio, output).await
            })
            .await;

            record_provider_call(provider.name(), result.is_ok());
            match result {
                Ok(()) => {
                    info!(provider = provider.name(), output = %output.display(), "Narration ready");
                    return Ok(());
                }
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "Speech provider exhausted");
                    last_error = Some(e);
                }
            }
        }

        Err(WorkerError::synthesis_failed(
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no speech provider configured".to_string()),
        ))
    }
}

#[async_trait]
impl Narrator for SpeechSynthesizer {
    async fn narrate(
        &self,
        text: &str,
        voice: &VoiceSelector,
        tier: PlanTier,
        output: &Path,
    ) -> WorkerResult<()> {
        self.synthesize(text, voice, tier, output).await
    }
}

fn is_worth_retrying(e: &WorkerError) -> bool {
    !matches!(e, WorkerError::InvalidInput(_) | WorkerError::ConfigError(_))
}

/// Write to a sibling temp file, validate it, then rename into place.
async fn write_validated(audio: &[u8], output: &Path) -> WorkerResult<()> {
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let temp = sibling_temp_path(output);

    let result = async {
        tokio::fs::write(&temp, audio).await?;
        validate_audio_file(&temp)
            .await
            .map_err(|e| WorkerError::provider(format!("invalid audio: {}", e)))?;
        tokio::fs::rename(&temp, output).await?;
        Ok::<(), WorkerError>(())
    }
    .await;

    if result.is_err() {
        reelgen_media::remove_files(&[&temp]).await;
    }
    result
}
