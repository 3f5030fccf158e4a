use eyre::Result;

use crate::config::Config;
use crate::llm::Provider;
use crate::pipeline::{VideoSummary, VideoTranscript};

/// Render a summary as markdown under the video title
pub fn render_text(summary: &VideoSummary) -> String {
    format!("# {}\n\n{}", summary.title, summary.summary)
}

pub fn render_json(summary: &VideoSummary) -> Result<String> {
    Ok(serde_json::to_string_pretty(summary)?)
}

/// Render the assembled transcript alone
pub fn render_transcript_text(transcript: &VideoTranscript) -> String {
    transcript.text.clone()
}

pub fn render_transcript_json(transcript: &VideoTranscript) -> Result<String> {
    Ok(serde_json::to_string_pretty(transcript)?)
}

/// One line per configured model: name, chunk budget, provider
pub fn render_models(config: &Config) -> String {
    let width = config.models.keys().map(|name| name.len()).max().unwrap_or(0);
    let mut lines: Vec<String> = config
        .models
        .iter()
        .map(|(name, profile)| {
            let provider = match profile.provider {
                Some(provider) => provider.name().to_string(),
                None => format!("{} (inferred)", Provider::for_model(name).name()),
            };
            let marker = if *name == config.default_model { "*" } else { " " };
            format!("{marker} {name:<width$}  {:>6}  {provider}", profile.budget)
        })
        .collect();
    lines.push(format!("Other models: {} chars", config.default_budget));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::Strategy;

    fn sample_summary() -> VideoSummary {
        VideoSummary {
            video_id: "test1234567".to_string(),
            title: "Test Video".to_string(),
            language: "en".to_string(),
            strategy: Strategy::AutoGenerated,
            transcript_chars: 14998,
            chunk_count: 4,
            summary: "## 🎯 Key idea\n\nBirdhouses are easy.".to_string(),
        }
    }

    #[test]
    fn test_render_text() {
        assert_eq!(
            render_text(&sample_summary()),
            "# Test Video\n\n## 🎯 Key idea\n\nBirdhouses are easy."
        );
    }

    #[test]
    fn test_render_json() {
        let json: serde_json::Value = serde_json::from_str(&render_json(&sample_summary()).unwrap()).unwrap();
        assert_eq!(json["video_id"], "test1234567");
        assert_eq!(json["strategy"], "auto-generated");
        assert_eq!(json["chunk_count"], 4);
        assert_eq!(json["summary"], "## 🎯 Key idea\n\nBirdhouses are easy.");
    }

    #[test]
    fn test_render_transcript() {
        let t = VideoTranscript {
            video_id: "test1234567".to_string(),
            title: "Test Video".to_string(),
            language: "de".to_string(),
            strategy: Strategy::ExternalTool,
            text: "Hallo Welt".to_string(),
        };
        assert_eq!(render_transcript_text(&t), "Hallo Welt");
        let json: serde_json::Value = serde_json::from_str(&render_transcript_json(&t).unwrap()).unwrap();
        assert_eq!(json["strategy"], "external-tool");
        assert_eq!(json["language"], "de");
    }

    #[test]
    fn test_render_models() {
        let config = Config::parse(
            r#"
default_model = "gpt-4o"
default_budget = 1500

[models.local-llama]
budget = 3000
provider = "openai"
"#,
        )
        .unwrap();
        let out = render_models(&config);
        let lines: Vec<&str> = out.lines().collect();

        let llama = lines.iter().find(|l| l.contains("local-llama")).unwrap();
        assert!(llama.contains("3000"));
        assert!(llama.ends_with("openai"));
        let claude = lines.iter().find(|l| l.contains("claude-sonnet-4-6")).unwrap();
        assert!(claude.ends_with("anthropic (inferred)"));
        let default = lines.iter().find(|l| l.contains("gpt-4o ")).unwrap();
        assert!(default.starts_with('*'));
        assert_eq!(lines.last(), Some(&"Other models: 1500 chars"));
    }
}
