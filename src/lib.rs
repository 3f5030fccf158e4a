pub mod assemble;
pub mod chunker;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod llm;
pub mod output;
pub mod pipeline;
pub mod retry;
pub mod source;
pub mod summarize;
pub mod youtube;
pub mod ytdlp;

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub use error::{Error, Result};

/// A single timed piece of caption text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionFragment {
    pub text: String,
    pub start: f64,
    pub duration: f64,
}

impl CaptionFragment {
    pub fn new(text: impl Into<String>, start: f64, duration: f64) -> Self {
        Self {
            text: text.into(),
            start,
            duration,
        }
    }

    /// Timing fields are finite and non-negative
    pub fn is_well_formed(&self) -> bool {
        self.start.is_finite() && self.start >= 0.0 && self.duration.is_finite() && self.duration >= 0.0
    }
}

/// Length in characters, which is what every size budget in this crate counts.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

static BARE_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]{11}$").expect("valid regex"));

// Ordered: first match wins. The id must end at a non-id character.
static URL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"youtube\.com/watch\?(?:[^#\s]*&)?v=([a-zA-Z0-9_-]{11})(?:[^a-zA-Z0-9_-]|$)",
        r"youtube(?:-nocookie)?\.com/embed/([a-zA-Z0-9_-]{11})(?:[^a-zA-Z0-9_-]|$)",
        r"youtu\.be/([a-zA-Z0-9_-]{11})(?:[^a-zA-Z0-9_-]|$)",
        r"youtube\.com/shorts/([a-zA-Z0-9_-]{11})(?:[^a-zA-Z0-9_-]|$)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

/// Extract video ID from various YouTube URL formats
pub fn extract_video_id(input: &str) -> Result<String> {
    let input = input.trim();

    if BARE_ID.is_match(input) {
        return Ok(input.to_string());
    }

    URL_PATTERNS
        .iter()
        .find_map(|re| re.captures(input).map(|caps| caps[1].to_string()))
        .ok_or_else(|| Error::InvalidUrl(input.to_string()))
}
