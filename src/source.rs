use std::future::Future;

use serde::Serialize;
use thiserror::Error;

use crate::CaptionFragment;

/// One caption stream for a video
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptionTrack {
    pub video_id: String,
    pub language_code: String,
    pub language: String,
    pub is_generated: bool,
    pub is_translatable: bool,
    /// Target language when this track is a machine translation of another
    pub translated_to: Option<String>,
    #[serde(skip)]
    pub url: String,
}

impl CaptionTrack {
    /// Language the fetched text will be in
    pub fn effective_language(&self) -> &str {
        self.translated_to.as_deref().unwrap_or(&self.language_code)
    }

    /// Identifies a track across strategies so it is fetched at most once
    pub fn key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.language_code,
            if self.is_generated { "asr" } else { "manual" },
            self.translated_to.as_deref().unwrap_or("-")
        )
    }
}

#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("captions are disabled for this video")]
    Disabled,

    #[error("no captions found")]
    NotFound,

    #[error("{0}")]
    Transient(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        SourceError::Transient(e.to_string())
    }
}

pub trait TranscriptSource {
    fn list_caption_tracks(
        &self,
        video_id: &str,
    ) -> impl Future<Output = Result<Vec<CaptionTrack>, SourceError>> + Send;

    fn fetch_track(
        &self,
        track: &CaptionTrack,
    ) -> impl Future<Output = Result<Vec<CaptionFragment>, SourceError>> + Send;

    fn translate_track(
        &self,
        track: &CaptionTrack,
        target_lang: &str,
    ) -> impl Future<Output = Result<CaptionTrack, SourceError>> + Send;

    /// Human readable title, if the source knows it
    fn video_title(&self, _video_id: &str) -> impl Future<Output = Option<String>> + Send {
        async { None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(lang: &str, generated: bool) -> CaptionTrack {
        CaptionTrack {
            video_id: "vid".to_string(),
            language_code: lang.to_string(),
            language: lang.to_string(),
            is_generated: generated,
            is_translatable: true,
            translated_to: None,
            url: String::new(),
        }
    }

    #[test]
    fn test_effective_language() {
        let mut t = track("de", false);
        assert_eq!(t.effective_language(), "de");
        t.translated_to = Some("en".to_string());
        assert_eq!(t.effective_language(), "en");
    }

    #[test]
    fn test_key_distinguishes_kind_and_translation() {
        let manual = track("en", false);
        let asr = track("en", true);
        let mut translated = track("en", false);
        translated.translated_to = Some("ru".to_string());
        assert_ne!(manual.key(), asr.key());
        assert_ne!(manual.key(), translated.key());
    }
}
