//! Script synthesis adapter.
//!
//! Stateless wrapper over an OpenAI-compatible chat completion endpoint with
//! profile-aware prompts and exponential backoff.

use async_trait::async_trait;
use reelgen_models::ContentProfile;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ScriptConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::http::{build_client, check_status, map_send_error};
use crate::metrics::record_provider_call;
use crate::retry::{retry_async, RetryPolicy};

const SCRIPT_PERSONA: &str = "You are a professional scriptwriter for short vertical videos (Reels, TikTok, Shorts). \
Write a voiceover script of about 50 words that hooks the viewer in the first sentence. \
Output only the words to be spoken: no stage directions, no scene descriptions, no emoji, no hashtags.";

const REVISE_INSTRUCTION: &str = "Revise the voiceover script according to the feedback. \
Keep roughly the same length and the original intent. \
Output only the revised words to be spoken: no stage directions, no emoji.";

/// Writes and revises narration scripts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScriptWriter: Send + Sync {
    async fn generate(&self, prompt: &str, profile: &ContentProfile) -> WorkerResult<String>;

    async fn improve(
        &self,
        script: &str,
        feedback: &str,
        profile: &ContentProfile,
    ) -> WorkerResult<String>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    fn system(content: String) -> Self {
        Self {
            role: "system",
            content,
        }
    }

    fn user(content: String) -> Self {
        Self {
            role: "user",
            content,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

fn with_profile(base: &str, heading: &str, profile: &ContentProfile) -> String {
    let context = profile.prompt_context();
    if context.is_empty() {
        base.to_string()
    } else {
        format!("{}\n\n{}:\n{}", base, heading, context)
    }
}

/// Messages for a fresh script.
pub fn generation_messages(prompt: &str, profile: &ContentProfile) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(with_profile(SCRIPT_PERSONA, "Author profile", profile)),
        ChatMessage::user(prompt.trim().to_string()),
    ]
}

/// Messages for revising `script` with `feedback`.
pub fn improvement_messages(script: &str, feedback: &str, profile: &ContentProfile) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(with_profile(REVISE_INSTRUCTION, "Consider the author profile", profile)),
        ChatMessage::user(format!(
            "Current script:\n{}\n\nFeedback:\n{}",
            script.trim(),
            feedback.trim()
        )),
    ]
}

/// OpenAI-compatible chat completion client.
pub struct OpenAiScriptWriter {
    client: Client,
    config: ScriptConfig,
    policy: RetryPolicy,
}

impl OpenAiScriptWriter {
    pub fn new(config: ScriptConfig, timeout: std::time::Duration) -> WorkerResult<Self> {
        let client = build_client(timeout)?;
        let policy = RetryPolicy::exponential("script", config.max_attempts, config.retry_base);
        Ok(Self {
            client,
            config,
            policy,
        })
    }

    async fn complete_once(&self, messages: &[ChatMessage], temperature: f32) -> WorkerResult<String> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let request = ChatRequest {
            model: &self.config.model,
            messages,
            temperature,
            max_tokens: self.config.max_tokens,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| map_send_error("chat_completions", e))?;
        let response = check_status("chat_completions", response).await?;
        let body: ChatResponse = response.json().await?;

        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| WorkerError::provider("chat completion returned no text"))
    }

    async fn complete(&self, messages: &[ChatMessage], temperature: f32) -> WorkerResult<String> {
        let result = retry_async(&self.policy, WorkerError::is_retryable, || {
            self.complete_once(messages, temperature)
        })
        .await;
        record_provider_call("chat_completions", result.is_ok());
        result.map_err(|e| WorkerError::generation_failed(e.to_string()))
    }
}

#[async_trait]
impl ScriptWriter for OpenAiScriptWriter {
    async fn generate(&self, prompt: &str, profile: &ContentProfile) -> WorkerResult<String> {
        if prompt.trim().is_empty() {
            return Err(WorkerError::invalid_input("Please describe your video idea in a few words."));
        }
        debug!(model = %self.config.model, "Generating script");
        let messages = generation_messages(prompt, profile);
        let script = self
            .complete(&messages, self.config.generate_temperature)
            .await?;
        info!(words = script.split_whitespace().count(), "Script generated");
        Ok(script)
    }

    async fn improve(
        &self,
        script: &str,
        feedback: &str,
        profile: &ContentProfile,
    ) -> WorkerResult<String> {
        if feedback.trim().is_empty() {
            return Err(WorkerError::invalid_input("Please describe what to change in the script."));
        }
        let messages = improvement_messages(script, feedback, profile);
        self.complete(&messages, self.config.improve_temperature)
            .await
    }
}
