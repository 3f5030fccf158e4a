use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;

use eyre::{Result, bail};
use log::debug;
use regex::Regex;
use tokio::process::Command;

use crate::CaptionFragment;

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));

/// Subtitles downloaded by the external tool, in whichever language it found
#[derive(Debug, Clone)]
pub struct Downloaded {
    pub language: String,
    pub fragments: Vec<CaptionFragment>,
}

#[derive(Debug, Clone)]
pub struct ExternalTool {
    program: String,
}

impl ExternalTool {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Download manual or auto-generated subtitles and parse them
    pub async fn fetch(&self, video_id: &str, langs: &[String]) -> Result<Downloaded> {
        let dir = tempfile::tempdir()?;
        let url = format!("https://www.youtube.com/watch?v={video_id}");
        let output_template = dir.path().join("%(id)s.%(ext)s");
        let sub_langs = if langs.is_empty() {
            "all".to_string()
        } else {
            langs.join(",")
        };

        debug!("Downloading subtitles via {}: {url} (langs: {sub_langs})", self.program);

        let output = Command::new(&self.program)
            .args([
                "--skip-download",
                "--write-subs",
                "--write-auto-subs",
                "--sub-format",
                "vtt",
                "--sub-langs",
                &sub_langs,
                "--no-playlist",
                "-o",
            ])
            .arg(&output_template)
            .arg(&url)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(o) if o.status.success() => {}
            Ok(o) => {
                let stderr = String::from_utf8_lossy(&o.stderr);
                let last = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
                bail!("{} exited with status {}: {last}", self.program, o.status);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                bail!(
                    "{} not found. Install it to enable the subtitle download fallback:\n  \
                     pip install yt-dlp\n  \
                     or: brew install yt-dlp",
                    self.program
                );
            }
            Err(e) => bail!("failed to run {}: {e}", self.program),
        }

        let Some((language, path)) = pick_subtitle_file(dir.path(), langs)? else {
            bail!("{} produced no subtitle files for {video_id}", self.program);
        };

        debug!("Parsing subtitle file {}", path.display());
        let content = tokio::fs::read_to_string(&path).await?;
        Ok(Downloaded {
            language,
            fragments: parse_vtt(&content),
        })
    }
}

/// Choose `<id>.<lang>.vtt` by language preference, else the first one found
fn pick_subtitle_file(dir: &Path, langs: &[String]) -> Result<Option<(String, PathBuf)>> {
    let mut found: Vec<(String, PathBuf)> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "vtt"))
        .filter_map(|p| {
            let stem = p.file_stem()?.to_string_lossy().to_string();
            let lang = stem.rsplit_once('.').map(|(_, lang)| lang.to_string())?;
            Some((lang, p))
        })
        .collect();
    found.sort();

    for lang in langs {
        if let Some(hit) = found.iter().find(|(l, _)| l == lang || l.starts_with(&format!("{lang}-"))) {
            return Ok(Some(hit.clone()));
        }
    }
    Ok(found.into_iter().next())
}

/// Parse WebVTT cues into fragments. Inline tags are stripped and a line that
/// repeats the previous one (rolling auto-captions) is dropped.
pub fn parse_vtt(content: &str) -> Vec<CaptionFragment> {
    let mut fragments: Vec<CaptionFragment> = Vec::new();
    let mut last_line = String::new();
    let mut lines = content.lines();

    while let Some(line) = lines.next() {
        let Some((start, end)) = parse_timing(line) else {
            continue;
        };

        for text_line in lines.by_ref() {
            if text_line.trim().is_empty() {
                break;
            }
            let stripped = TAG.replace_all(text_line, "");
            let decoded = html_escape::decode_html_entities(&stripped);
            let text = decoded.split_whitespace().collect::<Vec<_>>().join(" ");
            if text.is_empty() || text == last_line {
                continue;
            }
            fragments.push(CaptionFragment {
                text: text.clone(),
                start,
                duration: (end - start).max(0.0),
            });
            last_line = text;
        }
    }

    fragments
}

fn parse_timing(line: &str) -> Option<(f64, f64)> {
    let (start, rest) = line.split_once("-->")?;
    let end = rest.split_whitespace().next()?;
    Some((parse_timestamp(start.trim())?, parse_timestamp(end)?))
}

/// `HH:MM:SS.mmm` or `MM:SS.mmm`
fn parse_timestamp(ts: &str) -> Option<f64> {
    let parts: Vec<&str> = ts.split(':').collect();
    let (h, m, s) = match parts.as_slice() {
        [h, m, s] => (h.parse::<f64>().ok()?, m.parse::<f64>().ok()?, s.replace(',', ".").parse::<f64>().ok()?),
        [m, s] => (0.0, m.parse::<f64>().ok()?, s.replace(',', ".").parse::<f64>().ok()?),
        _ => return None,
    };
    Some(h * 3600.0 + m * 60.0 + s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(parse_timestamp("00:00:01.500"), Some(1.5));
        assert_eq!(parse_timestamp("01:02:03.000"), Some(3723.0));
        assert_eq!(parse_timestamp("02:03.250"), Some(123.25));
        assert_eq!(parse_timestamp("garbage"), None);
    }

    #[test]
    fn test_parse_vtt_basic() {
        let vtt = "WEBVTT\nKind: captions\nLanguage: en\n\n\
                   00:00:00.000 --> 00:00:02.000\nHello world\n\n\
                   1\n00:00:02.000 --> 00:00:04.500 align:start position:0%\nThis is &amp; a test\n";
        let fragments = parse_vtt(vtt);
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].text, "Hello world");
        assert!((fragments[0].duration - 2.0).abs() < f64::EPSILON);
        assert_eq!(fragments[1].text, "This is & a test");
        assert!((fragments[1].start - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_vtt_rolling_auto_captions() {
        let vtt = "WEBVTT\n\n\
                   00:00:00.000 --> 00:00:02.000\n\
                   hello<00:00:00.500><c> there</c>\n\n\
                   00:00:02.000 --> 00:00:02.010\n\
                   hello there\n\n\
                   00:00:02.010 --> 00:00:04.000\n\
                   hello there\n\
                   general<00:00:02.500><c> kenobi</c>\n";
        let fragments = parse_vtt(vtt);
        let texts: Vec<_> = fragments.iter().map(|f| f.text.as_str()).collect();
        assert_eq!(texts, vec!["hello there", "general kenobi"]);
    }

    #[test]
    fn test_parse_vtt_empty() {
        assert!(parse_vtt("WEBVTT\n\n").is_empty());
    }

    #[test]
    fn test_pick_subtitle_file_prefers_language_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["abc.de.vtt", "abc.en.vtt", "abc.en.info.json"] {
            std::fs::write(dir.path().join(name), "WEBVTT\n").unwrap();
        }
        let langs = vec!["ru".to_string(), "en".to_string()];
        let (lang, path) = pick_subtitle_file(dir.path(), &langs).unwrap().unwrap();
        assert_eq!(lang, "en");
        assert!(path.ends_with("abc.en.vtt"));
    }

    #[test]
    fn test_pick_subtitle_file_falls_back_to_any() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("abc.de.vtt"), "WEBVTT\n").unwrap();
        let (lang, _) = pick_subtitle_file(dir.path(), &["en".to_string()]).unwrap().unwrap();
        assert_eq!(lang, "de");
    }

    #[test]
    fn test_pick_subtitle_file_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(pick_subtitle_file(dir.path(), &["en".to_string()]).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_program_reports_install_hint() {
        let tool = ExternalTool::new("ytsum-definitely-not-installed");
        let err = tool.fetch("dQw4w9WgXcQ", &["en".to_string()]).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
