use log::{debug, info};
use serde::Serialize;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::assemble::assemble;
use crate::config::Config;
use crate::fetcher::{CaptionFetcher, FetchedCaptions, Strategy};
use crate::llm::LanguageModel;
use crate::source::TranscriptSource;
use crate::summarize::Summarizer;
use crate::{Result, char_len, chunker, extract_video_id};

/// Per-request choices: caption languages, model and its chunk budget
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preferences {
    pub languages: Vec<String>,
    pub model: String,
    pub budget: usize,
}

impl Preferences {
    pub fn from_config(config: &Config) -> Self {
        Self::for_model(config, &config.default_model)
    }

    /// Config defaults with `model` and its budget from the model table
    pub fn for_model(config: &Config, model: &str) -> Self {
        Self {
            languages: config.default_languages.clone(),
            model: model.to_string(),
            budget: config.budget_for(model),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoTranscript {
    pub video_id: String,
    pub title: String,
    pub language: String,
    pub strategy: Strategy,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoSummary {
    pub video_id: String,
    pub title: String,
    pub language: String,
    pub strategy: Strategy,
    pub transcript_chars: usize,
    pub chunk_count: usize,
    pub summary: String,
}

pub struct Pipeline<S, L> {
    fetcher: CaptionFetcher<S>,
    summarizer: Summarizer<L>,
}

impl<S, L> Pipeline<S, L>
where
    S: TranscriptSource,
    L: LanguageModel + Sync,
{
    pub fn new(fetcher: CaptionFetcher<S>, summarizer: Summarizer<L>) -> Self {
        Self { fetcher, summarizer }
    }

    pub fn fetcher(&self) -> &CaptionFetcher<S> {
        &self.fetcher
    }

    pub fn summarizer_mut(&mut self) -> &mut Summarizer<L> {
        &mut self.summarizer
    }

    /// Fetch and assemble the transcript without summarizing it
    pub async fn transcript(&self, url: &str, languages: &[String], cancel: &CancellationToken) -> Result<VideoTranscript> {
        let video_id = extract_video_id(url)?;
        info!("Processing video {video_id}");

        let (captions, title) = tokio::join!(
            self.fetcher.fetch_cancellable(&video_id, languages, cancel),
            self.title(&video_id)
        );
        let FetchedCaptions {
            fragments,
            language,
            strategy,
        } = captions?;

        Ok(VideoTranscript {
            text: assemble(&fragments),
            video_id,
            title,
            language,
            strategy,
        })
    }

    pub async fn run(&self, url: &str, prefs: &Preferences, cancel: &CancellationToken) -> Result<VideoSummary> {
        let transcript = self.transcript(url, &prefs.languages, cancel).await?;
        let transcript_chars = char_len(&transcript.text);
        let chunk_count = if transcript_chars <= prefs.budget {
            1
        } else {
            chunker::split(&transcript.text, prefs.budget).len()
        };
        debug!(
            "Transcript for {} is {transcript_chars} chars in {}, {chunk_count} chunk(s) at budget {}",
            transcript.video_id, transcript.language, prefs.budget
        );

        let summary = self
            .summarizer
            .summarize(&transcript.text, &transcript.title, &prefs.model, prefs.budget, cancel)
            .await?;
        info!("Summary for {} ready ({} chars)", transcript.video_id, char_len(&summary));

        Ok(VideoSummary {
            video_id: transcript.video_id,
            title: transcript.title,
            language: transcript.language,
            strategy: transcript.strategy,
            transcript_chars,
            chunk_count,
            summary,
        })
    }

    async fn title(&self, video_id: &str) -> String {
        let lookup = self.fetcher.source().video_title(video_id);
        match timeout(self.fetcher.settings().call_timeout, lookup).await {
            Ok(Some(title)) if !title.trim().is_empty() => title,
            _ => {
                debug!("No title for {video_id}, using placeholder");
                format!("Video {video_id}")
            }
        }
    }
}
