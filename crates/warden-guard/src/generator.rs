//! Text generators the pipeline mediates
//!
//! The pipeline treats generation as an opaque `prompt -> text` call behind
//! the [`Generator`] trait.

use crate::config::GenerationParams;
use crate::error::{Result, WardenError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Completions shorter than this are retried with the alternate template
const MIN_COMPLETION_CHARS: usize = 10;

/// Returned when the model produces nothing at all
pub const FALLBACK_COMPLETION: &str =
    "I understand your question. Let me provide a response based on my training data.";

const STOP_SEQUENCES: [&str; 3] = ["[INST]", "</s>", "<s>"];

/// Produces a completion for a prompt
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String>;

    /// Whether the backend can currently serve requests
    async fn is_ready(&self) -> bool {
        true
    }
}

#[async_trait]
impl<G: Generator + ?Sized> Generator for Arc<G> {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        (**self).generate(prompt, params).await
    }

    async fn is_ready(&self) -> bool {
        (**self).is_ready().await
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    prompt: String,
    n_predict: u32,
    temperature: f32,
    top_p: f32,
    top_k: u32,
    repeat_penalty: f32,
    stop: &'a [&'a str],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    content: String,
}

/// Prompt layout expected by Llama-2 chat models
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChatTemplate {
    Inst,
    BosInst,
}

impl ChatTemplate {
    fn render(self, prompt: &str) -> String {
        match self {
            ChatTemplate::Inst => format!("[INST] {prompt} [/INST]"),
            ChatTemplate::BosInst => format!("<s>[INST] {prompt} [/INST]"),
        }
    }
}

/// Client for a llama.cpp-compatible completion server
#[derive(Debug, Clone)]
pub struct LlamaServerGenerator {
    base_url: String,
    client: reqwest::Client,
}

impl LlamaServerGenerator {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn complete(
        &self,
        prompt: &str,
        template: ChatTemplate,
        params: &GenerationParams,
    ) -> Result<String> {
        let rendered = template.render(prompt);
        let request = CompletionRequest {
            prompt: rendered.clone(),
            n_predict: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            top_k: params.top_k,
            repeat_penalty: params.repeat_penalty,
            stop: &STOP_SEQUENCES,
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/completion", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| WardenError::GenerationFailure(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(WardenError::GenerationFailure(format!(
                "backend returned status: {}",
                response.status()
            )));
        }

        let body: CompletionResponse = response
            .json()
            .await
            .map_err(|e| WardenError::GenerationFailure(format!("invalid response: {e}")))?;

        Ok(clean_completion(&body.content, &rendered))
    }
}

#[async_trait]
impl Generator for LlamaServerGenerator {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        let mut text = self.complete(prompt, ChatTemplate::Inst, params).await?;

        if text.chars().count() < MIN_COMPLETION_CHARS {
            debug!(chars = text.len(), "short completion, retrying with alternate template");
            let retry = self.complete(prompt, ChatTemplate::BosInst, params).await?;
            if !retry.is_empty() {
                text = retry;
            }
        }

        if text.is_empty() {
            warn!("generator returned an empty completion");
            return Ok(FALLBACK_COMPLETION.to_string());
        }
        Ok(text)
    }

    async fn is_ready(&self) -> bool {
        match self
            .client
            .get(format!("{}/health", self.base_url))
            .timeout(Duration::from_secs(2))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                debug!(error = %err, "generator health check failed");
                false
            }
        }
    }
}

/// Strip an echoed prompt and surrounding whitespace
fn clean_completion(completion: &str, rendered_prompt: &str) -> String {
    let text = completion.trim();
    let text = text
        .strip_prefix(rendered_prompt.trim())
        .unwrap_or(text)
        .trim();
    text.to_string()
}

/// Adapts a synchronous, possibly slow function into a [`Generator`]
///
/// Each call runs on the blocking thread pool.
pub struct BlockingGenerator<F> {
    generate: Arc<F>,
}

impl<F> BlockingGenerator<F>
where
    F: Fn(&str, &GenerationParams) -> Result<String> + Send + Sync + 'static,
{
    pub fn new(generate: F) -> Self {
        Self {
            generate: Arc::new(generate),
        }
    }
}

#[async_trait]
impl<F> Generator for BlockingGenerator<F>
where
    F: Fn(&str, &GenerationParams) -> Result<String> + Send + Sync + 'static,
{
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        let generate = Arc::clone(&self.generate);
        let prompt = prompt.to_string();
        let params = params.clone();

        tokio::task::spawn_blocking(move || generate(&prompt, &params))
            .await
            .map_err(|e| WardenError::GenerationFailure(format!("generator task failed: {e}")))?
    }
}
