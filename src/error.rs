use thiserror::Error;

use crate::fetcher::Strategy;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors that leave the library. Per-chunk and combine failures are absorbed
/// by the summarizer and never show up here.
#[derive(Debug, Error)]
pub enum Error {
    #[error("could not extract a YouTube video id from {0:?}")]
    InvalidUrl(String),

    #[error("captions are disabled for video {video_id} (languages: {})", .languages.join(", "))]
    CaptionsDisabled { video_id: String, languages: Vec<String> },

    #[error("no captions found for video {video_id} (languages: {})", .languages.join(", "))]
    NoCaptionsFound { video_id: String, languages: Vec<String> },

    #[error(
        "failed to fetch captions for video {video_id} (languages: {}; strategies tried: {})",
        .languages.join(", "),
        strategy_list(.attempted)
    )]
    FetchError {
        video_id: String,
        languages: Vec<String>,
        attempted: Vec<Strategy>,
    },

    #[error("summarization failed: {0}")]
    Summarization(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Short text suitable for an end user, without internal detail.
    pub fn user_message(&self) -> String {
        match self {
            Error::InvalidUrl(_) => "That does not look like a YouTube video link. Supported forms are \
                 youtube.com/watch?v=ID, youtu.be/ID, youtube.com/embed/ID and youtube.com/shorts/ID."
                .to_string(),
            Error::CaptionsDisabled { .. } => {
                "Subtitles are disabled for this video, so it cannot be summarized. Try a different video.".to_string()
            }
            Error::NoCaptionsFound { languages, .. } => format!(
                "No subtitles were found for this video (looked for: {}). Try a different video.",
                languages.join(", ")
            ),
            Error::FetchError { .. } => {
                "Subtitles could not be downloaded right now. Please try again later.".to_string()
            }
            Error::Summarization(_) => "The summary could not be generated. Please try again later.".to_string(),
            Error::Cancelled => "The request was cancelled.".to_string(),
        }
    }
}

fn strategy_list(attempted: &[Strategy]) -> String {
    if attempted.is_empty() {
        return "none".to_string();
    }
    attempted.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(", ")
}
