//! OpenRouter-backed implementations of the external capabilities.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::OpenRouterConfig;
use crate::external::{Embedder, MergeOutcome, TextClassifier, TextSummarizer};

const OPENROUTER_EMBEDDINGS_URL: &str = "https://openrouter.ai/api/v1/embeddings";
const OPENROUTER_CHAT_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// One client serves all three model-backed capabilities.
pub struct OpenRouterClient {
    client: Client,
    config: OpenRouterConfig,
}

impl OpenRouterClient {
    pub fn new(config: OpenRouterConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    async fn chat(&self, model: &str, prompt: &str) -> anyhow::Result<String> {
        let resp = self
            .client
            .post(OPENROUTER_CHAT_URL)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&serde_json::json!({
                "model": model,
                "messages": [
                    {"role": "user", "content": prompt}
                ],
                "temperature": 0.0
            }))
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            anyhow::bail!("OpenRouter chat error: {} - {}", status, text);
        }

        let response: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| anyhow::anyhow!("Failed to parse chat response: {} - {}", e, text))?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("Chat response carried no content"))
    }
}

#[async_trait]
impl Embedder for OpenRouterClient {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: self.config.embed_model.clone(),
            input: vec![text.to_string()],
        };

        let resp = self
            .client
            .post(OPENROUTER_EMBEDDINGS_URL)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            tracing::error!("Embedding API error: {} - {}", status, text);
            anyhow::bail!("Embedding API error: {} - {}", status, text);
        }

        let response: EmbeddingResponse = serde_json::from_str(&text)
            .map_err(|e| anyhow::anyhow!("Failed to parse embedding response: {} - {}", e, text))?;

        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| anyhow::anyhow!("No embedding returned"))
    }
}

#[async_trait]
impl TextClassifier for OpenRouterClient {
    async fn classify(&self, prompt: &str) -> anyhow::Result<String> {
        self.chat(&self.config.classify_model, prompt).await
    }
}

#[async_trait]
impl TextSummarizer for OpenRouterClient {
    async fn merge(&self, texts: &[String]) -> anyhow::Result<MergeOutcome> {
        let numbered: Vec<String> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| format!("[{}] {}", i, t))
            .collect();

        let prompt = format!(
            r#"These are memory entries of the same category. Identify sub-groups of near-duplicate entries and merge each sub-group into one entry.

Entries:
{}

Return JSON only:
{{"merged_groups": [{{"member_indexes": [0, 2], "merged_content": "...", "summary": "one line, max 100 chars"}}]}}

Only group entries that genuinely say the same thing. If nothing is mergeable, return {{"merged_groups": []}}."#,
            numbered.join("\n")
        );

        let reply = self.chat(&self.config.merge_model, prompt.as_str()).await?;
        parse_merge_reply(&reply)
    }
}

/// Lenient decode of the merge reply: the model may wrap the JSON in prose
/// or code fences.
fn parse_merge_reply(reply: &str) -> anyhow::Result<MergeOutcome> {
    let start = reply
        .find('{')
        .ok_or_else(|| anyhow::anyhow!("merge reply carried no JSON object"))?;
    let end = reply
        .rfind('}')
        .ok_or_else(|| anyhow::anyhow!("merge reply carried no JSON object"))?;
    if end < start {
        anyhow::bail!("merge reply carried no JSON object");
    }
    Ok(serde_json::from_str(&reply[start..=end])?)
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}
