//! Portfolio narrative written by a local Ollama model.

use crate::analysis::PortfolioSummary;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Settings for the Ollama chat endpoint.
#[derive(Debug, Clone)]
pub struct NarrativeConfig {
    pub ollama_url: String,
    pub model_name: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

impl Default for NarrativeConfig {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            model_name: "llama3.2:latest".to_string(),
            temperature: 0.5,
            timeout_seconds: 300,
        }
    }
}

/// Text plus the usage metadata reported with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub tokens: u64,
    pub cost: f64,
    pub model: String,
}

/// Turns a prompt into text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<Generation>;
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
}

/// [`TextGenerator`] calling Ollama's `/api/chat`.
pub struct OllamaGenerator {
    config: NarrativeConfig,
    http_client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: NarrativeConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            config,
            http_client,
        })
    }
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    async fn generate(&self, prompt: &str) -> Result<Generation> {
        let url = format!("{}/api/chat", self.config.ollama_url.trim_end_matches('/'));
        info!("Requesting narrative from {}", self.config.model_name);

        let request = ChatRequest {
            model: self.config.model_name.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            stream: false,
            options: ChatOptions {
                temperature: self.config.temperature,
            },
        };

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow::anyhow!("Request timed out after {}s", self.config.timeout_seconds)
                } else if e.is_connect() {
                    anyhow::anyhow!("Cannot connect to Ollama at {}", self.config.ollama_url)
                } else {
                    anyhow::anyhow!("Failed to send request: {}", e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Ollama API error {}: {}", status, body));
        }

        let body: Value = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        parse_generation(&body, &self.config.model_name)
    }
}

/// Build a [`Generation`] from a chat response body.
pub fn parse_generation(body: &Value, model: &str) -> Result<Generation> {
    let content = body
        .pointer("/message/content")
        .or_else(|| body.pointer("/choices/0/message/content"))
        .and_then(|c| c.as_str())
        .context("Response has no message content")?;

    let generation = Generation {
        text: trim_markdown(content),
        tokens: extract_tokens(body),
        cost: extract_cost(body),
        model: body
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or(model)
            .to_string(),
    };

    debug!(
        "Generated {} chars, {} tokens, cost {}",
        generation.text.len(),
        generation.tokens,
        generation.cost
    );

    Ok(generation)
}

/// Strip code fences models like to wrap their answer in.
pub fn trim_markdown(text: &str) -> String {
    ["```markdown", "```text", "```json", "```"]
        .iter()
        .fold(text.to_string(), |acc, fence| acc.replace(fence, ""))
        .trim()
        .to_string()
}

/// Total tokens, from Ollama's eval counters or an OpenAI-style usage block.
pub fn extract_tokens(body: &Value) -> u64 {
    if let Some(total) = body.pointer("/usage/total_tokens").and_then(|t| t.as_u64()) {
        return total;
    }

    ["prompt_eval_count", "eval_count"]
        .iter()
        .filter_map(|key| body.get(*key).and_then(|v| v.as_u64()))
        .sum()
}

/// Reported cost rounded to five decimals. Missing, non-numeric, negative or
/// non-finite values count as zero.
pub fn extract_cost(body: &Value) -> f64 {
    let cost = ["/cost", "/response_cost", "/usage/cost"]
        .iter()
        .find_map(|pointer| body.pointer(pointer).and_then(|v| v.as_f64()))
        .unwrap_or(0.0);

    if !cost.is_finite() || cost <= 0.0 {
        return 0.0;
    }
    (cost * 100_000.0).round() / 100_000.0
}

/// Ask `generator` for a narrative about `summary`. Failures are logged and
/// yield `None`; the report is written without a narrative then.
pub async fn generate_narrative(
    generator: &dyn TextGenerator,
    target: &str,
    summary: &PortfolioSummary,
) -> Option<Generation> {
    let prompt = match narrative_prompt(target, summary) {
        Ok(prompt) => prompt,
        Err(e) => {
            warn!("Could not build narrative prompt: {:#}", e);
            return None;
        }
    };

    match generator.generate(&prompt).await {
        Ok(generation) if generation.text.is_empty() => {
            warn!("Model returned an empty narrative");
            None
        }
        Ok(generation) => Some(generation),
        Err(e) => {
            warn!("Narrative generation failed: {:#}", e);
            None
        }
    }
}

/// Prompt asking for a narrative over the portfolio totals.
pub fn narrative_prompt(target: &str, summary: &PortfolioSummary) -> Result<String> {
    let stats = serde_json::to_string_pretty(summary).context("Failed to serialize summary")?;

    Ok(format!(
        "Write a short portfolio health report for {}.\n\n\
         Cover overall activity, dependency hygiene and security exposure, \
         framework version spread and the size of the codebase. Finish with \
         up to five concrete recommendations as a bulleted list.\n\n\
         Portfolio statistics (JSON):\n{}\n",
        target, stats
    ))
}

const SYSTEM_PROMPT: &str = r#"You are an engineering manager reviewing a portfolio of software repositories.
You write for a non-technical audience: plain language, short paragraphs, no tables.
Only state facts that are supported by the statistics you are given.
Respond with markdown text only."#;
