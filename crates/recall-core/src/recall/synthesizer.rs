//! ============================================================================
//! Response Synthesizer - First-person replies grounded in retrieved stories
//! ============================================================================
//! Builds a persona instruction and a bounded context block, then asks a
//! chat-completion provider for a short reply. Without a provider (or when it
//! fails) a templated sentence is returned instead; this never errors.
//! ============================================================================

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::embeddings::DEFAULT_PROVIDER_TIMEOUT;
use super::provider::{
    http_client, with_deadline, CompletionProvider, CompletionRequest, ProviderFailure,
    ProviderUnavailable,
};
use crate::config::RecallConfig;
use crate::types::{Profile, Result, ScoredStory};

/// Default chat model
pub const DEFAULT_CHAT_MODEL: &str = "gpt-3.5-turbo";

/// Upper bound on reply length requested from the provider
pub const COMPLETION_MAX_TOKENS: u32 = 300;

/// Sampling temperature for replies
pub const COMPLETION_TEMPERATURE: f32 = 0.7;

/// Per-story cap on transcript characters in the context block
const MAX_STORY_CHARS: usize = 1_200;

/// Chat-completion provider speaking the OpenAI protocol
pub struct OpenAiChat {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiChat {
    pub fn new(
        api_key: String,
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAiChat {
    fn name(&self) -> &str {
        "openai-chat"
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<String, ProviderUnavailable> {
        debug!(
            "Requesting completion ({} context chars, model {})",
            request.context.len(),
            self.model
        );

        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: request.system.clone(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: format!(
                        "Context: {}\n\nUser question: {}",
                        request.context, request.query
                    ),
                },
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderUnavailable::from_status(status, &text));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderUnavailable::malformed(format!("chat body: {}", e)))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ProviderUnavailable::malformed("no choices returned"))
    }
}

/// Turns ranked stories into a reply in the profile's voice
#[derive(Clone)]
pub struct Synthesizer {
    provider: Option<Arc<dyn CompletionProvider>>,
    timeout: Duration,
}

impl Synthesizer {
    pub fn new(provider: Option<Arc<dyn CompletionProvider>>) -> Self {
        Self {
            provider,
            timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }

    /// Synthesizer that always answers with the templated reply
    pub fn offline() -> Self {
        Self::new(None)
    }

    pub fn from_config(config: &RecallConfig) -> Result<Self> {
        let provider: Option<Arc<dyn CompletionProvider>> = match config.api_key() {
            Some(key) => Some(Arc::new(OpenAiChat::new(
                key.to_string(),
                config.base_url.clone(),
                config.chat_model.clone(),
                config.provider_timeout,
            )?)),
            None => None,
        };

        Ok(Self::new(provider).with_timeout(config.provider_timeout))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Produce a reply for `query`. Falls back to `fallback_reply` on any
    /// provider problem, including an empty completion.
    pub async fn synthesize(&self, query: &str, stories: &[ScoredStory], profile: &Profile) -> String {
        let request = CompletionRequest {
            system: persona_instructions(profile),
            context: build_context(stories, profile),
            query: query.to_string(),
            max_tokens: COMPLETION_MAX_TOKENS,
            temperature: COMPLETION_TEMPERATURE,
        };

        match self.complete(&request).await {
            Ok(reply) => reply,
            Err(e) => {
                if e.kind == ProviderFailure::NotConfigured {
                    debug!("Using templated reply: {}", e.detail);
                } else {
                    warn!(
                        provider = self.provider_name(),
                        kind = %e.kind,
                        "Completion provider failed, using templated reply: {}",
                        e.detail
                    );
                }
                fallback_reply(stories.len(), profile)
            }
        }
    }

    async fn complete(&self, request: &CompletionRequest) -> std::result::Result<String, ProviderUnavailable> {
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| ProviderUnavailable::not_configured("completion"))?;

        let reply = with_deadline(self.timeout, provider.complete(request)).await?;
        let reply = reply.trim();
        if reply.is_empty() {
            return Err(ProviderUnavailable::malformed("empty completion"));
        }
        Ok(reply.to_string())
    }

    fn provider_name(&self) -> &str {
        self.provider.as_ref().map(|p| p.name()).unwrap_or("none")
    }
}

/// Deterministic reply used when no completion is available
pub fn fallback_reply(story_count: usize, profile: &Profile) -> String {
    format!(
        "Hey there! I've found {} memories from {} that relate to what you're asking about. Let me share them with you.",
        story_count, profile.name
    )
}

/// Persona instruction: speak as the profile, address the asker by relation
pub fn persona_instructions(profile: &Profile) -> String {
    let name = &profile.name;
    let relation = &profile.relation;
    format!(
        "You are {name}, speaking in the first person through the stories you left behind. \
         The person talking to you is someone you are the {relation} of; address them the way \
         a {relation} would.\n\
         - Talk about your own memories and experiences, citing the stories provided when relevant.\n\
         - Share what those experiences taught you and connect them to the question.\n\
         - Stay warm and encouraging, and keep the answer concise.\n\
         - Do not invent events that are not in the stories."
    )
}

/// Numbered context block of story transcripts, each optionally tagged
/// with its year and truncated to a fixed length.
pub fn build_context(stories: &[ScoredStory], profile: &Profile) -> String {
    if stories.is_empty() {
        return format!("No stored memories from {} relate to this question.\n", profile.name);
    }

    let mut context = format!("Here are some relevant memories from {}:\n\n", profile.name);
    for (i, scored) in stories.iter().enumerate() {
        let story = &scored.story;
        let year = story
            .event_year
            .map(|y| format!(" ({})", y))
            .unwrap_or_default();
        let _ = write!(
            context,
            "{}. {}{}\n\n",
            i + 1,
            truncate_chars(story.transcript.trim(), MAX_STORY_CHARS),
            year
        );
    }
    context
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}
