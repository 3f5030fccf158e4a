use log::debug;
use regex::Regex;
use serde::Deserialize;

use crate::CaptionFragment;
use crate::source::{CaptionTrack, SourceError, TranscriptSource};

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

#[derive(Debug, Deserialize)]
struct InnerTubePlayerResponse {
    captions: Option<CaptionsData>,
    #[serde(rename = "playabilityStatus")]
    playability_status: Option<PlayabilityStatus>,
}

#[derive(Debug, Deserialize)]
struct PlayabilityStatus {
    status: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CaptionsData {
    #[serde(rename = "playerCaptionsTracklistRenderer")]
    player_captions_tracklist_renderer: Option<CaptionTracklistRenderer>,
}

#[derive(Debug, Deserialize)]
struct CaptionTracklistRenderer {
    #[serde(rename = "captionTracks")]
    caption_tracks: Option<Vec<RawCaptionTrack>>,
}

#[derive(Debug, Deserialize)]
struct RawCaptionTrack {
    #[serde(rename = "baseUrl")]
    base_url: String,
    #[serde(rename = "languageCode")]
    language_code: String,
    name: Option<TrackName>,
    kind: Option<String>,
    #[serde(rename = "isTranslatable", default)]
    is_translatable: bool,
}

#[derive(Debug, Deserialize)]
struct TrackName {
    #[serde(rename = "simpleText")]
    simple_text: Option<String>,
    runs: Option<Vec<TextRun>>,
}

#[derive(Debug, Deserialize)]
struct TextRun {
    text: String,
}

#[derive(Debug, Deserialize)]
struct OEmbed {
    title: String,
}

/// Caption tracks straight from YouTube's InnerTube player API
#[derive(Debug, Clone)]
pub struct YouTubeSource {
    client: reqwest::Client,
    hl: String,
}

impl YouTubeSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            hl: "en".to_string(),
        }
    }

    /// Interface language sent with the player request
    pub fn with_interface_language(mut self, hl: impl Into<String>) -> Self {
        self.hl = hl.into();
        self
    }

    async fn player_response(&self, video_id: &str) -> Result<InnerTubePlayerResponse, SourceError> {
        // Step 1: Fetch the watch page to get the InnerTube API key
        let watch_url = format!("https://www.youtube.com/watch?v={video_id}");
        debug!("Fetching watch page: {watch_url}");

        let page_html = self
            .client
            .get(&watch_url)
            .header("User-Agent", USER_AGENT)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let api_key = extract_api_key(&page_html)?;
        debug!("Extracted InnerTube API key: {api_key}");

        // Step 2: Call InnerTube player endpoint
        let player_url = format!("https://www.youtube.com/youtubei/v1/player?key={api_key}&prettyPrint=false");

        let body = serde_json::json!({
            "context": {
                "client": {
                    "hl": self.hl,
                    "gl": "US",
                    "clientName": "WEB",
                    "clientVersion": "2.20241126.01.00"
                }
            },
            "videoId": video_id
        });

        let resp = self
            .client
            .post(&player_url)
            .header("User-Agent", USER_AGENT)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(resp)
    }
}

impl TranscriptSource for YouTubeSource {
    async fn list_caption_tracks(&self, video_id: &str) -> Result<Vec<CaptionTrack>, SourceError> {
        let resp = self.player_response(video_id).await?;
        tracks_from_player_response(video_id, resp)
    }

    async fn fetch_track(&self, track: &CaptionTrack) -> Result<Vec<CaptionFragment>, SourceError> {
        debug!("Fetching caption track {} for {}", track.key(), track.video_id);

        let caption_xml = self
            .client
            .get(&track.url)
            .header("User-Agent", USER_AGENT)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        if caption_xml.trim().is_empty() {
            return Err(SourceError::NotFound);
        }

        parse_caption_xml(&caption_xml)
    }

    async fn translate_track(&self, track: &CaptionTrack, target_lang: &str) -> Result<CaptionTrack, SourceError> {
        if !track.is_translatable {
            return Err(SourceError::NotFound);
        }
        Ok(translated(track, target_lang))
    }

    async fn video_title(&self, video_id: &str) -> Option<String> {
        let url = format!("https://www.youtube.com/oembed?url=https://www.youtube.com/watch?v={video_id}&format=json");
        let resp = self.client.get(&url).send().await.ok()?.error_for_status().ok()?;
        let oembed: OEmbed = resp.json().await.ok()?;
        Some(oembed.title)
    }
}

fn translated(track: &CaptionTrack, target_lang: &str) -> CaptionTrack {
    CaptionTrack {
        translated_to: Some(target_lang.to_string()),
        url: format!("{}&tlang={target_lang}", track.url),
        ..track.clone()
    }
}

fn tracks_from_player_response(
    video_id: &str,
    resp: InnerTubePlayerResponse,
) -> Result<Vec<CaptionTrack>, SourceError> {
    if let Some(status) = resp.playability_status {
        let code = status.status.unwrap_or_default();
        if !code.is_empty() && code != "OK" {
            return Err(SourceError::Transient(format!(
                "video {video_id} is not playable: {code} {}",
                status.reason.unwrap_or_default()
            )));
        }
    }

    let Some(renderer) = resp.captions.and_then(|c| c.player_captions_tracklist_renderer) else {
        return Err(SourceError::Disabled);
    };

    let raw = renderer.caption_tracks.unwrap_or_default();
    if raw.is_empty() {
        return Err(SourceError::NotFound);
    }

    let (mut manual, generated): (Vec<_>, Vec<_>) = raw
        .into_iter()
        .map(|t| {
            let language = t
                .name
                .and_then(|n| n.simple_text.or_else(|| n.runs.and_then(|r| r.into_iter().next().map(|r| r.text))))
                .unwrap_or_else(|| t.language_code.clone());
            CaptionTrack {
                video_id: video_id.to_string(),
                language,
                is_generated: t.kind.as_deref() == Some("asr"),
                is_translatable: t.is_translatable,
                translated_to: None,
                url: t.base_url.replace("&fmt=srv3", ""),
                language_code: t.language_code,
            }
        })
        .partition(|t| !t.is_generated);

    manual.extend(generated);
    Ok(manual)
}

fn extract_api_key(html: &str) -> Result<String, SourceError> {
    let re = Regex::new(r#""INNERTUBE_API_KEY"\s*:\s*"([^"]+)""#).map_err(|e| SourceError::Transient(e.to_string()))?;
    if let Some(caps) = re.captures(html) {
        return Ok(caps[1].to_string());
    }

    // Fallback: try the newer pattern
    let re2 = Regex::new(r#"innertubeApiKey\s*[=:]\s*"([^"]+)""#).map_err(|e| SourceError::Transient(e.to_string()))?;
    if let Some(caps) = re2.captures(html) {
        return Ok(caps[1].to_string());
    }

    if html.contains("g-recaptcha") {
        return Err(SourceError::Transient("request blocked by YouTube (captcha)".to_string()));
    }

    Err(SourceError::Transient(
        "could not extract InnerTube API key from watch page".to_string(),
    ))
}

fn parse_caption_xml(xml: &str) -> Result<Vec<CaptionFragment>, SourceError> {
    use quick_xml::Reader;
    use quick_xml::events::Event;

    let mut reader = Reader::from_str(xml);
    let mut fragments = Vec::new();
    let mut current_start: Option<f64> = None;
    let mut current_dur: Option<f64> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"text" => {
                let mut start = None;
                let mut dur = None;
                for attr in e.attributes().flatten() {
                    match attr.key.as_ref() {
                        b"start" => {
                            start = String::from_utf8_lossy(&attr.value).parse::<f64>().ok();
                        }
                        b"dur" => {
                            dur = String::from_utf8_lossy(&attr.value).parse::<f64>().ok();
                        }
                        _ => {}
                    }
                }
                current_start = start;
                // Some tracks omit dur on the final cue
                current_dur = dur.or(Some(0.0));
            }
            Ok(Event::Empty(_)) => {}
            Ok(Event::Text(ref e)) => {
                if let (Some(start), Some(dur)) = (current_start.take(), current_dur.take()) {
                    let raw_text = e.unescape().unwrap_or_default().to_string();
                    let text = html_escape::decode_html_entities(&raw_text).replace('\n', " ");
                    if !text.trim().is_empty() {
                        fragments.push(CaptionFragment {
                            text,
                            start,
                            duration: dur,
                        });
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SourceError::Transient(format!("error parsing caption XML: {e}"))),
            _ => {}
        }
    }

    Ok(fragments)
}
