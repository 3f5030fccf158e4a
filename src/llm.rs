use std::collections::BTreeMap;
use std::future::Future;

use eyre::{Result, bail};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::retry::retry;

/// Which HTTP API a model is served from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum Provider {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "anthropic")]
    Anthropic,
}

impl Provider {
    pub fn name(self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
        }
    }

    /// Used when the config does not say
    pub fn for_model(model: &str) -> Self {
        if model.starts_with("claude") {
            Provider::Anthropic
        } else {
            Provider::OpenAi
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub system_prompt: &'a str,
    pub user_prompt: &'a str,
    pub model: &'a str,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

/// Stateless prompt-in, text-out model call
pub trait LanguageModel {
    fn complete(&self, request: CompletionRequest<'_>) -> impl Future<Output = Result<String>> + Send;
}

/// Calls the OpenAI or Anthropic HTTP API, retrying failed calls with backoff
#[derive(Debug, Clone)]
pub struct HttpLanguageModel {
    client: reqwest::Client,
    providers: BTreeMap<String, Provider>,
    max_retries: u32,
}

impl HttpLanguageModel {
    pub fn from_config(client: reqwest::Client, config: &Config) -> Self {
        let providers = config
            .models
            .iter()
            .filter_map(|(name, profile)| profile.provider.map(|p| (name.clone(), p)))
            .collect();
        Self {
            client,
            providers,
            max_retries: config.summary.max_retries.max(1),
        }
    }

    fn provider(&self, model: &str) -> Provider {
        self.providers
            .get(model)
            .copied()
            .unwrap_or_else(|| Provider::for_model(model))
    }
}

impl LanguageModel for HttpLanguageModel {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<String> {
        let provider = self.provider(request.model);
        let api_key = api_key(provider)?;

        let text = retry(self.max_retries, || {
            let client = &self.client;
            let api_key = &api_key;
            async move {
                match provider {
                    Provider::Anthropic => complete_anthropic(client, api_key, &request).await,
                    Provider::OpenAi => complete_openai(client, api_key, &request).await,
                }
            }
        })
        .await?;

        Ok(text.trim().to_string())
    }
}

fn api_key(provider: Provider) -> Result<String> {
    match provider {
        Provider::Anthropic => std::env::var("ANTHROPIC_API_KEY").map_err(|_| {
            eyre::eyre!("ANTHROPIC_API_KEY environment variable not set (required for Claude summarization)")
        }),
        Provider::OpenAi => std::env::var("OPENAI_API_KEY")
            .map_err(|_| eyre::eyre!("OPENAI_API_KEY environment variable not set (required for OpenAI summarization)")),
    }
}

async fn complete_anthropic(client: &reqwest::Client, api_key: &str, request: &CompletionRequest<'_>) -> Result<String> {
    debug!(
        "Calling Anthropic API with model {} ({} chars of prompt)",
        request.model,
        request.user_prompt.len()
    );

    let body = serde_json::json!({
        "model": request.model,
        "max_tokens": request.max_output_tokens,
        "temperature": request.temperature,
        "system": request.system_prompt,
        "messages": [
            {
                "role": "user",
                "content": request.user_prompt
            }
        ]
    });

    let resp = client
        .post("https://api.anthropic.com/v1/messages")
        .header("x-api-key", api_key)
        .header("anthropic-version", "2023-06-01")
        .header("Content-Type", "application/json")
        .json(&body)
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        bail!("Anthropic API returned {status}: {body}");
    }

    let json: serde_json::Value = resp.json().await?;
    extract_anthropic_text(&json)
}

fn extract_anthropic_text(json: &serde_json::Value) -> Result<String> {
    if let Some(content) = json.get("content").and_then(|c| c.as_array()) {
        let text: String = content
            .iter()
            .filter_map(|block| {
                if block.get("type")?.as_str()? == "text" {
                    block.get("text")?.as_str().map(|s| s.to_string())
                } else {
                    None
                }
            })
            .collect::<Vec<_>>()
            .join("");
        if !text.is_empty() {
            return Ok(text);
        }
    }
    bail!("unexpected Anthropic API response format");
}

async fn complete_openai(client: &reqwest::Client, api_key: &str, request: &CompletionRequest<'_>) -> Result<String> {
    debug!(
        "Calling OpenAI API with model {} ({} chars of prompt)",
        request.model,
        request.user_prompt.len()
    );

    let body = serde_json::json!({
        "model": request.model,
        "temperature": request.temperature,
        "max_tokens": request.max_output_tokens,
        "messages": [
            {
                "role": "system",
                "content": request.system_prompt
            },
            {
                "role": "user",
                "content": request.user_prompt
            }
        ]
    });

    let resp = client
        .post("https://api.openai.com/v1/chat/completions")
        .bearer_auth(api_key)
        .header("Content-Type", "application/json")
        .json(&body)
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        bail!("OpenAI API returned {status}: {body}");
    }

    let json: serde_json::Value = resp.json().await?;
    extract_openai_text(&json)
}

fn extract_openai_text(json: &serde_json::Value) -> Result<String> {
    if let Some(text) = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|t| t.as_str())
        .filter(|t| !t.trim().is_empty())
    {
        return Ok(text.to_string());
    }
    bail!("unexpected OpenAI API response format");
}
