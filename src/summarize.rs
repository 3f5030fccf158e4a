use std::sync::LazyLock;
use std::time::Duration;

use eyre::eyre;
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use regex::{Captures, Regex};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::chunker;
use crate::config::{Config, Prompts};
use crate::llm::{CompletionRequest, LanguageModel};
use crate::{Error, Result, char_len};

const PARTIAL_SEPARATOR: &str = "\n\n---\n\n";

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{(title|text|summaries)\}").expect("valid regex"));
static PART_PHRASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[(\[]?\s*\b(?:part|часть)\s+\d+\s+(?:of|из)\s+\d+\s*[)\]]?").expect("valid regex")
});
static YOUTUBE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:https?://)?(?:www\.|m\.)?(?:youtube\.com|youtu\.be|youtube-nocookie\.com)/\S*")
        .expect("valid regex")
});
static EXTRA_NEWLINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

#[derive(Debug, Clone)]
pub struct SummarySettings {
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub combine_max_output_tokens: u32,
    /// Chunk calls allowed in flight at once
    pub parallel_chunks: usize,
    pub call_timeout: Duration,
}

impl Default for SummarySettings {
    fn default() -> Self {
        SummarySettings::from(&Config::default())
    }
}

impl From<&Config> for SummarySettings {
    fn from(config: &Config) -> Self {
        Self {
            temperature: config.summary.temperature,
            max_output_tokens: config.summary.max_output_tokens,
            combine_max_output_tokens: config.summary.combine_max_output_tokens,
            parallel_chunks: config.summary.parallel_chunks.max(1),
            call_timeout: config.summary.call_timeout(),
        }
    }
}

pub struct Summarizer<L> {
    llm: L,
    prompts: Prompts,
    settings: SummarySettings,
}

impl<L: LanguageModel + Sync> Summarizer<L> {
    pub fn new(llm: L, prompts: Prompts, settings: SummarySettings) -> Self {
        Self { llm, prompts, settings }
    }

    pub fn llm(&self) -> &L {
        &self.llm
    }

    /// Replace the prompt templates used by subsequent calls
    pub fn set_prompts(&mut self, prompts: Prompts) {
        self.prompts = prompts;
    }

    /// Summarize `transcript` with `model`, splitting it when it exceeds
    /// `budget` characters.
    pub async fn summarize(
        &self,
        transcript: &str,
        title: &str,
        model: &str,
        budget: usize,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let summary = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            summary = self.summarize_inner(transcript, title, model, budget) => summary?,
        };
        Ok(postprocess(&summary))
    }

    async fn summarize_inner(&self, transcript: &str, title: &str, model: &str, budget: usize) -> Result<String> {
        let len = char_len(transcript);
        if len <= budget {
            info!("Summarizing {len} chars in a single pass with {model}");
            return self
                .summarize_chunk(transcript, title, model)
                .await
                .map_err(|e| Error::Summarization(e.to_string()));
        }

        let chunks = chunker::split(transcript, budget);
        let total = chunks.len();
        info!("Summarizing {len} chars in {total} chunks with {model} (budget {budget})");

        let calls = chunks.iter().enumerate().map(|(i, chunk)| {
            let part_title = if total > 1 {
                format!("{title} (part {} of {total})", i + 1)
            } else {
                title.to_string()
            };
            async move { (i, self.summarize_chunk(chunk, &part_title, model).await) }
        });
        let mut results: Vec<(usize, eyre::Result<String>)> = stream::iter(calls)
            .buffer_unordered(self.settings.parallel_chunks.max(1))
            .collect()
            .await;
        results.sort_by_key(|(i, _)| *i);

        // failures keep their slot so the reader sees what is missing
        let partials: Vec<String> = results
            .into_iter()
            .map(|(i, result)| match result {
                Ok(text) => text,
                Err(e) => {
                    warn!("Chunk {}/{total} failed: {e}", i + 1);
                    format!("> ⚠️ Section {} could not be summarized: {e}", i + 1)
                }
            })
            .collect();

        if partials.len() == 1 {
            return Ok(partials.into_iter().collect());
        }

        match self.combine(&partials, title, model).await {
            Ok(combined) => Ok(combined),
            Err(e) => {
                warn!("Combining {} partial summaries failed, returning sections: {e}", partials.len());
                Ok(sections(&partials))
            }
        }
    }

    async fn summarize_chunk(&self, text: &str, title: &str, model: &str) -> eyre::Result<String> {
        debug!("Summarizing {} chars for {title:?}", char_len(text));
        let prompt = render(&self.prompts.summarize, title, text, "");
        self.call(&prompt, model, self.settings.max_output_tokens).await
    }

    async fn combine(&self, partials: &[String], title: &str, model: &str) -> eyre::Result<String> {
        debug!("Combining {} partial summaries", partials.len());
        let joined = partials.join(PARTIAL_SEPARATOR);
        let prompt = render(&self.prompts.combine, title, "", &joined);
        self.call(&prompt, model, self.settings.combine_max_output_tokens).await
    }

    async fn call(&self, user_prompt: &str, model: &str, max_output_tokens: u32) -> eyre::Result<String> {
        let request = CompletionRequest {
            system_prompt: &self.prompts.system,
            user_prompt,
            model,
            temperature: self.settings.temperature,
            max_output_tokens,
        };
        let text = timeout(self.settings.call_timeout, self.llm.complete(request))
            .await
            .map_err(|_| eyre!("model call timed out after {}s", self.settings.call_timeout.as_secs()))??;
        if text.trim().is_empty() {
            eyre::bail!("model returned an empty response");
        }
        Ok(text)
    }
}

/// Substitute `{title}`, `{text}` and `{summaries}` in one pass, so inserted
/// values are never rescanned.
fn render(template: &str, title: &str, text: &str, summaries: &str) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| match &caps[1] {
            "title" => title.to_string(),
            "text" => text.to_string(),
            _ => summaries.to_string(),
        })
        .into_owned()
}

fn sections(partials: &[String]) -> String {
    partials
        .iter()
        .enumerate()
        .map(|(i, p)| format!("## Section {}\n\n{p}", i + 1))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Clean up model output: part numbering, video links, trailing whitespace,
/// runs of blank lines, and unbalanced `**` or code fences.
pub fn postprocess(summary: &str) -> String {
    let text = PART_PHRASE.replace_all(summary, "");
    let text = YOUTUBE_URL.replace_all(&text, "");
    let text = text.lines().map(str::trim_end).collect::<Vec<_>>().join("\n");
    let text = EXTRA_NEWLINES.replace_all(&text, "\n\n");
    let mut text = text.trim().to_string();

    if text.matches("```").count() % 2 == 1 {
        text.push_str("\n```");
    }
    let outside_fences: usize = text.split("```").step_by(2).map(|s| s.matches("**").count()).sum();
    if outside_fences % 2 == 1 {
        if text.ends_with("```") {
            text.push_str("\n**");
        } else {
            text.push_str("**");
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    const SUMMARIZE: &str = "S|{title}|{text}";
    const COMBINE: &str = "C|{title}|{summaries}";

    #[derive(Default)]
    struct MockLlm {
        prompts: Mutex<Vec<String>>,
        /// Chunk prompts containing this marker fail
        fail_marker: Option<&'static str>,
        fail_combine: bool,
        delay: Option<Duration>,
        /// Chunk `i` of N takes N - i seconds, so later chunks finish first
        stagger: bool,
    }

    impl MockLlm {
        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    impl LanguageModel for MockLlm {
        async fn complete(&self, request: CompletionRequest<'_>) -> eyre::Result<String> {
            let prompt = request.user_prompt.to_string();
            self.prompts.lock().unwrap().push(prompt.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.stagger {
                if let Some((part, total)) = part_of(&prompt) {
                    tokio::time::sleep(Duration::from_secs(total + 1 - part)).await;
                }
            }
            if prompt.starts_with("C|") {
                if self.fail_combine {
                    eyre::bail!("combine overloaded");
                }
                return Ok("Combined review.".to_string());
            }
            if self.fail_marker.is_some_and(|m| prompt.contains(m)) {
                eyre::bail!("rate limited");
            }
            let part = prompt.split('|').nth(1).unwrap_or_default().to_string();
            Ok(format!("Summary of {part}."))
        }
    }

    fn part_of(prompt: &str) -> Option<(u64, u64)> {
        let rest = prompt.split("(part ").nth(1)?;
        let (part, rest) = rest.split_once(" of ")?;
        let total = rest.split(')').next()?;
        Some((part.parse().ok()?, total.parse().ok()?))
    }

    fn summarizer(llm: MockLlm) -> Summarizer<MockLlm> {
        let prompts = Prompts {
            system: "system".to_string(),
            summarize: SUMMARIZE.to_string(),
            combine: COMBINE.to_string(),
        };
        Summarizer::new(llm, prompts, SummarySettings::default())
    }

    /// 15 paragraphs of 998 chars, which split into 4 chunks at 4000
    fn long_transcript() -> String {
        let paragraphs: Vec<String> = (0..15).map(|i| format!("{i:02}{}.", "w".repeat(995))).collect();
        paragraphs.join("\n\n")
    }

    #[tokio::test]
    async fn test_short_transcript_single_call() {
        let s = summarizer(MockLlm::default());
        let transcript = "word ".repeat(600);
        assert_eq!(char_len(&transcript), 3000);

        let summary = s
            .summarize(&transcript, "Talk", "gpt-4o", 4000, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(s.llm().calls(), 1);
        assert_eq!(summary, "Summary of Talk.");
    }

    #[tokio::test]
    async fn test_long_transcript_chunks_then_combines() {
        let s = summarizer(MockLlm::default());
        let summary = s
            .summarize(&long_transcript(), "Talk", "gpt-4o", 4000, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(s.llm().calls(), 5);
        assert_eq!(summary, "Combined review.");
        let prompts = s.llm().prompts();
        let combine = prompts.iter().find(|p| p.starts_with("C|")).unwrap();
        assert_eq!(combine.matches(PARTIAL_SEPARATOR).count(), 3);
        assert!(combine.contains("Summary of Talk (part 1 of 4)."));
        assert!(combine.find("part 1 of 4").unwrap() < combine.find("part 4 of 4").unwrap());
    }

    #[tokio::test]
    async fn test_failed_chunk_becomes_placeholder() {
        let s = summarizer(MockLlm {
            fail_marker: Some("part 2 of 4"),
            ..Default::default()
        });
        s.summarize(&long_transcript(), "Talk", "gpt-4o", 4000, &CancellationToken::new())
            .await
            .unwrap();

        let prompts = s.llm().prompts();
        let combine = prompts.iter().find(|p| p.starts_with("C|")).unwrap();
        assert!(combine.contains("> ⚠️ Section 2 could not be summarized: rate limited"));
        assert_eq!(combine.matches(PARTIAL_SEPARATOR).count(), 3);
    }

    #[tokio::test]
    async fn test_combine_failure_returns_sections() {
        let s = summarizer(MockLlm {
            fail_combine: true,
            ..Default::default()
        });
        let summary = s
            .summarize(&long_transcript(), "Talk", "gpt-4o", 4000, &CancellationToken::new())
            .await
            .unwrap();

        for i in 1..=4 {
            assert!(summary.contains(&format!("## Section {i}")));
        }
        assert!(summary.find("## Section 1").unwrap() < summary.find("## Section 4").unwrap());
        // numbering from the chunk titles is stripped
        assert!(!summary.contains("part 1 of 4"));
    }

    #[tokio::test]
    async fn test_all_chunks_failing_still_combines_placeholders() {
        let s = summarizer(MockLlm {
            fail_marker: Some("S|"),
            ..Default::default()
        });
        let summary = s
            .summarize(&long_transcript(), "Talk", "gpt-4o", 4000, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(s.llm().calls(), 5);
        assert_eq!(summary, "Combined review.");
        let prompts = s.llm().prompts();
        let combine = prompts.iter().find(|p| p.starts_with("C|")).unwrap();
        for i in 1..=4 {
            assert!(combine.contains(&format!("> ⚠️ Section {i} could not be summarized: rate limited")));
        }
    }

    #[tokio::test]
    async fn test_all_chunks_and_combine_failing_returns_sections() {
        let s = summarizer(MockLlm {
            fail_marker: Some("S|"),
            fail_combine: true,
            ..Default::default()
        });
        let summary = s
            .summarize(&long_transcript(), "Talk", "gpt-4o", 4000, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!summary.is_empty());
        for i in 1..=4 {
            assert!(summary.contains(&format!("## Section {i}")));
            assert!(summary.contains(&format!("Section {i} could not be summarized")));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_partials_combined_in_chunk_order() {
        let s = summarizer(MockLlm {
            stagger: true,
            ..Default::default()
        });
        s.summarize(&long_transcript(), "Talk", "gpt-4o", 4000, &CancellationToken::new())
            .await
            .unwrap();

        let prompts = s.llm().prompts();
        let combine = prompts.iter().find(|p| p.starts_with("C|")).unwrap();
        let positions: Vec<usize> = (1..=4)
            .map(|i| combine.find(&format!("Summary of Talk (part {i} of 4).")).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "order: {positions:?}");
    }

    #[tokio::test]
    async fn test_single_oversized_chunk_skips_combine() {
        let s = summarizer(MockLlm::default());
        let word = "x".repeat(50);
        let summary = s
            .summarize(&word, "Talk", "gpt-4o", 10, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(s.llm().calls(), 1);
        assert!(s.llm().prompts().iter().all(|p| !p.starts_with("C|")));
        assert_eq!(summary, "Summary of Talk.");
    }

    #[tokio::test]
    async fn test_single_pass_failure_propagates() {
        let s = summarizer(MockLlm {
            fail_marker: Some("S|"),
            ..Default::default()
        });
        let err = s
            .summarize("short", "Talk", "gpt-4o", 4000, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Summarization(msg) if msg.contains("rate limited")));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let s = summarizer(MockLlm::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = s.summarize("short", "Talk", "gpt-4o", 4000, &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(s.llm().calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_while_chunks_in_flight() {
        let s = summarizer(MockLlm {
            delay: Some(Duration::from_secs(60)),
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = s
            .summarize(&long_transcript(), "Talk", "gpt-4o", 4000, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out() {
        let mut s = summarizer(MockLlm {
            delay: Some(Duration::from_secs(600)),
            ..Default::default()
        });
        s.settings.call_timeout = Duration::from_secs(5);
        let err = s
            .summarize("short", "Talk", "gpt-4o", 4000, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Summarization(msg) if msg.contains("timed out")));
    }

    #[tokio::test]
    async fn test_set_prompts() {
        let mut s = summarizer(MockLlm::default());
        s.set_prompts(Prompts {
            system: "system".to_string(),
            summarize: "S|new {title}|{text}".to_string(),
            combine: COMBINE.to_string(),
        });
        let summary = s
            .summarize("short", "Talk", "gpt-4o", 4000, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary, "Summary of new Talk.");
    }

    #[test]
    fn test_render_single_pass() {
        assert_eq!(render("{title}: {text}", "{text}", "body", ""), "{text}: body");
        assert_eq!(render("{summaries}", "t", "", "a\n\n---\n\nb"), "a\n\n---\n\nb");
    }

    #[test]
    fn test_postprocess_strips_part_numbering() {
        assert_eq!(postprocess("Overview (part 2 of 5) here"), "Overview  here");
        assert_eq!(postprocess("Обзор (часть 1 из 3)"), "Обзор");
        assert_eq!(postprocess("Part 3 of 4: details"), ": details");
    }

    #[test]
    fn test_postprocess_strips_youtube_links() {
        assert_eq!(
            postprocess("Watch https://www.youtube.com/watch?v=dQw4w9WgXcQ now"),
            "Watch  now"
        );
        assert_eq!(postprocess("See youtu.be/dQw4w9WgXcQ"), "See");
    }

    #[test]
    fn test_postprocess_whitespace() {
        assert_eq!(postprocess("  a  \n\n\n\n\nb\t\n"), "a\n\nb");
    }

    #[test]
    fn test_postprocess_balances_markers() {
        assert_eq!(postprocess("**bold"), "**bold**");
        assert_eq!(postprocess("**bold**"), "**bold**");
        assert_eq!(postprocess("```\ncode"), "```\ncode\n```");
        assert_eq!(postprocess("```\na ** b\n```"), "```\na ** b\n```");
    }
}
