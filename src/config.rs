use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Result, WrapErr};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::llm::Provider;

pub const DEFAULT_BUDGET: usize = 2000;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Caption languages to try, most preferred first
    pub default_languages: Vec<String>,
    pub default_model: String,
    /// Target language for the last-resort translation of an arbitrary track
    pub default_language: String,
    /// Chunk budget for models missing from `models`
    pub default_budget: usize,
    pub fetch: FetchConfig,
    pub summary: SummaryConfig,
    pub models: BTreeMap<String, ModelProfile>,
    pub prompts: Prompts,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FetchConfig {
    pub min_transcript_chars: usize,
    pub call_timeout_secs: u64,
    pub strategy_timeout_secs: u64,
    /// Attempts at listing a video's tracks when the failure is transient
    pub max_retries: u32,
    pub use_external_tool: bool,
    pub external_tool: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SummaryConfig {
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub combine_max_output_tokens: u32,
    pub parallel_chunks: usize,
    pub call_timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ModelProfile {
    /// Characters of transcript the model accepts per call
    pub budget: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
}

/// Prompt templates. `{title}`, `{text}` and `{summaries}` are substituted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Prompts {
    pub system: String,
    pub summarize: String,
    pub combine: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_languages: vec!["ru".to_string(), "en".to_string()],
            default_model: "gpt-4o-mini".to_string(),
            default_language: "en".to_string(),
            default_budget: DEFAULT_BUDGET,
            fetch: FetchConfig::default(),
            summary: SummaryConfig::default(),
            models: default_models(),
            prompts: Prompts::default(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            min_transcript_chars: 50,
            call_timeout_secs: 30,
            strategy_timeout_secs: 90,
            max_retries: 3,
            use_external_tool: true,
            external_tool: "yt-dlp".to_string(),
        }
    }
}

impl FetchConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn strategy_timeout(&self) -> Duration {
        Duration::from_secs(self.strategy_timeout_secs)
    }
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            temperature: 0.5,
            max_output_tokens: 1000,
            combine_max_output_tokens: 1500,
            parallel_chunks: 4,
            call_timeout_secs: 120,
            max_retries: 3,
        }
    }
}

impl SummaryConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            system: DEFAULT_SYSTEM_PROMPT.to_string(),
            summarize: DEFAULT_SUMMARIZE_PROMPT.to_string(),
            combine: DEFAULT_COMBINE_PROMPT.to_string(),
        }
    }
}

const DEFAULT_SYSTEM_PROMPT: &str = "You are a video content analyst. You write short, informative, well structured \
reviews of video transcripts. Keep what matters, drop what does not. Start every section with an emoji and format \
strictly as Markdown.";

const DEFAULT_SUMMARIZE_PROMPT: &str = "Analyze the transcript of the video and write a very short analytical \
review focused on the key points and practical recommendations.

Video title: \"{title}\"

Transcript:
{text}

Include:
1. KEY IDEA: the main thought of the video in one or two sentences.
2. MAIN POINTS: 3-5 concrete key points, using facts from the video.
3. PRACTICAL VALUE: 2-3 practical tips or applications.

Answer in Markdown with section headings. Be concise.

IMPORTANT:
- Do not mention \"parts\" or \"part X of Y\".
- Do not add links to the video.
- Do not name the source of the information.
- Do not put ** or ## inside headings.";

const DEFAULT_COMBINE_PROMPT: &str = "Merge several partial reviews of one video into a single coherent review.

Video title: \"{title}\"

Partial reviews:
{summaries}

When merging:
1. Remove repeated ideas and information.
2. Keep a logical order with smooth transitions.
3. Keep the most important points from every part.
4. Stay short and informative, formatted as Markdown with sections and emoji.
5. Do not mention parts or part numbers, and do not include links to the video.";

/// Built-in chunk budgets, keyed by model name
pub fn default_models() -> BTreeMap<String, ModelProfile> {
    [
        ("gpt-3.5-turbo", 2000),
        ("gpt-3.5-turbo-16k", 8000),
        ("gpt-4", 2000),
        ("gpt-4-32k", 12000),
        ("gpt-4-turbo", 8000),
        ("gpt-4o", 8000),
        ("gpt-4o-mini", 8000),
        ("claude-sonnet-4-6", 12000),
        ("claude-haiku-4-5", 12000),
    ]
    .into_iter()
    .map(|(name, budget)| (name.to_string(), ModelProfile { budget, provider: None }))
    .collect()
}

impl Config {
    /// Load config from ~/.config/ytsum/config.toml if it exists
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            debug!("Loading config from {}", path.display());
            let content = std::fs::read_to_string(path)?;
            Self::parse(&content).wrap_err_with(|| format!("invalid config file {}", path.display()))
        } else {
            debug!("No config file found at {}", path.display());
            Ok(Config::default())
        }
    }

    /// Parse TOML; model entries merge over the built-in table
    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        let mut models = default_models();
        models.append(&mut config.models);
        config.models = models;
        Ok(config)
    }

    /// Re-read ~/.config/ytsum/config.toml, replacing self
    pub fn reload(&mut self) -> Result<()> {
        self.reload_from(&config_path())
    }

    /// Re-read `path` and replace self with it
    pub fn reload_from(&mut self, path: &Path) -> Result<()> {
        *self = Self::load_from(path)?;
        debug!("Config reloaded from {}", path.display());
        Ok(())
    }

    /// Chunk budget for `model`, from the table or `default_budget`
    pub fn budget_for(&self, model: &str) -> usize {
        self.models.get(model).map(|m| m.budget).unwrap_or(self.default_budget)
    }
}

pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from(".config"))
        .join("ytsum")
        .join("config.toml")
}
