use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::assemble::assemble;
use crate::config::Config;
use crate::retry::retry_if;
use crate::source::{CaptionTrack, SourceError, TranscriptSource};
use crate::ytdlp::ExternalTool;
use crate::{CaptionFragment, Error, Result, char_len};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// A track in one of the preferred languages
    Direct,
    /// A translatable track machine-translated into a preferred language
    Translated,
    /// Auto-generated captions, preferred languages first
    AutoGenerated,
    /// Whatever track exists, in any language
    AnyAvailable,
    /// Any translatable track translated into the default language
    AnyTranslatedToDefault,
    /// Subtitle download through yt-dlp
    ExternalTool,
}

impl Strategy {
    pub const ALL: [Strategy; 6] = [
        Strategy::Direct,
        Strategy::Translated,
        Strategy::AutoGenerated,
        Strategy::AnyAvailable,
        Strategy::AnyTranslatedToDefault,
        Strategy::ExternalTool,
    ];

    fn needs_tracks(self) -> bool {
        self != Strategy::ExternalTool
    }

    async fn attempt<S: TranscriptSource>(self, run: &mut Run<'_, S>) -> std::result::Result<Option<FetchedCaptions>, SourceError> {
        match self {
            Strategy::Direct => {
                let mut candidates = Vec::new();
                for lang in run.langs {
                    // manual before generated, which is the track list order
                    candidates.extend(run.tracks.iter().filter(|t| &t.language_code == lang).cloned());
                }
                run.first_usable(self, candidates).await
            }
            Strategy::Translated => {
                let mut last_err = None;
                let translatable: Vec<CaptionTrack> = run.tracks.iter().filter(|t| t.is_translatable).cloned().collect();
                for track in &translatable {
                    for lang in run.langs {
                        if &track.language_code == lang {
                            continue;
                        }
                        match run.translated(self, track, lang).await {
                            Ok(Some(found)) => return Ok(Some(found)),
                            Ok(None) => {}
                            Err(e) => last_err = Some(e),
                        }
                    }
                }
                last_err.map_or(Ok(None), Err)
            }
            Strategy::AutoGenerated => {
                let generated: Vec<CaptionTrack> = run.tracks.iter().filter(|t| t.is_generated).cloned().collect();
                let mut candidates: Vec<CaptionTrack> = Vec::new();
                for lang in run.langs {
                    candidates.extend(generated.iter().filter(|t| &t.language_code == lang).cloned());
                }
                candidates.extend(generated.into_iter().filter(|t| !run.langs.contains(&t.language_code)));
                run.first_usable(self, candidates).await
            }
            Strategy::AnyAvailable => {
                let candidates = run.tracks.clone();
                run.first_usable(self, candidates).await
            }
            Strategy::AnyTranslatedToDefault => {
                let mut last_err = None;
                let target = run.fetcher.settings.default_language.clone();
                let translatable: Vec<CaptionTrack> = run
                    .tracks
                    .iter()
                    .filter(|t| t.is_translatable && t.language_code != target)
                    .cloned()
                    .collect();
                for track in &translatable {
                    match run.translated(self, track, &target).await {
                        Ok(Some(found)) => return Ok(Some(found)),
                        Ok(None) => {}
                        Err(e) => last_err = Some(e),
                    }
                }
                last_err.map_or(Ok(None), Err)
            }
            Strategy::ExternalTool => {
                let Some(tool) = &run.fetcher.settings.external_tool else {
                    return Ok(None);
                };
                let downloaded = tool
                    .fetch(run.video_id, run.langs)
                    .await
                    .map_err(|e| SourceError::Transient(e.to_string()))?;
                Ok(run
                    .fetcher
                    .validated(downloaded.fragments, downloaded.language, self))
            }
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::Direct => "direct",
            Strategy::Translated => "translated",
            Strategy::AutoGenerated => "auto-generated",
            Strategy::AnyAvailable => "any-available",
            Strategy::AnyTranslatedToDefault => "any-translated-to-default",
            Strategy::ExternalTool => "external-tool",
        };
        f.write_str(name)
    }
}

/// Captions that passed validation, and where they came from
#[derive(Debug, Clone, Serialize)]
pub struct FetchedCaptions {
    pub fragments: Vec<CaptionFragment>,
    pub language: String,
    pub strategy: Strategy,
}

#[derive(Debug, Clone)]
pub struct FetchSettings {
    /// Assembled text shorter than this is noise, not a transcript
    pub min_transcript_chars: usize,
    pub call_timeout: Duration,
    pub strategy_timeout: Duration,
    /// Attempts at listing tracks before giving up on a transient failure
    pub max_retries: u32,
    pub default_language: String,
    pub external_tool: Option<ExternalTool>,
}

impl Default for FetchSettings {
    fn default() -> Self {
        FetchSettings::from(&Config::default())
    }
}

impl From<&Config> for FetchSettings {
    fn from(config: &Config) -> Self {
        Self {
            min_transcript_chars: config.fetch.min_transcript_chars,
            call_timeout: config.fetch.call_timeout(),
            strategy_timeout: config.fetch.strategy_timeout(),
            max_retries: config.fetch.max_retries,
            default_language: config.default_language.clone(),
            external_tool: config
                .fetch
                .use_external_tool
                .then(|| ExternalTool::new(config.fetch.external_tool.clone())),
        }
    }
}

/// What listing the tracks told us, used to pick the final error
#[derive(Debug)]
enum Listing {
    Tracks,
    Disabled,
    NotFound,
    Failed,
}

struct Run<'a, S> {
    fetcher: &'a CaptionFetcher<S>,
    video_id: &'a str,
    langs: &'a [String],
    tracks: Vec<CaptionTrack>,
    tried: HashSet<String>,
}

impl<S: TranscriptSource> Run<'_, S> {
    async fn first_usable(
        &mut self,
        strategy: Strategy,
        candidates: Vec<CaptionTrack>,
    ) -> std::result::Result<Option<FetchedCaptions>, SourceError> {
        let mut last_err = None;
        for track in &candidates {
            match self.fetch(strategy, track).await {
                Ok(Some(found)) => return Ok(Some(found)),
                Ok(None) => {}
                Err(e) => last_err = Some(e),
            }
        }
        last_err.map_or(Ok(None), Err)
    }

    async fn translated(
        &mut self,
        strategy: Strategy,
        track: &CaptionTrack,
        lang: &str,
    ) -> std::result::Result<Option<FetchedCaptions>, SourceError> {
        let call_timeout = self.fetcher.settings.call_timeout;
        let translated = timeout(call_timeout, self.fetcher.source.translate_track(track, lang))
            .await
            .map_err(|_| SourceError::Transient(format!("translating {} to {lang} timed out", track.language_code)))??;
        self.fetch(strategy, &translated).await
    }

    /// Fetch and validate one track, at most once per run
    async fn fetch(
        &mut self,
        strategy: Strategy,
        track: &CaptionTrack,
    ) -> std::result::Result<Option<FetchedCaptions>, SourceError> {
        if !self.tried.insert(track.key()) {
            debug!("Skipping already tried track {}", track.key());
            return Ok(None);
        }

        debug!("[{strategy}] fetching track {} for {}", track.key(), self.video_id);
        let call_timeout = self.fetcher.settings.call_timeout;
        let fragments = timeout(call_timeout, self.fetcher.source.fetch_track(track))
            .await
            .map_err(|_| SourceError::Transient(format!("fetching track {} timed out", track.key())))??;

        Ok(self
            .fetcher
            .validated(fragments, track.effective_language().to_string(), strategy))
    }
}

/// Retrieves captions for a video through the strategy cascade
pub struct CaptionFetcher<S> {
    source: S,
    settings: FetchSettings,
}

impl<S: TranscriptSource> CaptionFetcher<S> {
    pub fn new(source: S, settings: FetchSettings) -> Self {
        Self { source, settings }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    /// Strategies this fetcher will run, in order
    pub fn strategies(&self) -> Vec<Strategy> {
        Strategy::ALL
            .into_iter()
            .filter(|s| *s != Strategy::ExternalTool || self.settings.external_tool.is_some())
            .collect()
    }

    pub async fn fetch(&self, video_id: &str, langs: &[String]) -> Result<FetchedCaptions> {
        self.fetch_cancellable(video_id, langs, &CancellationToken::new()).await
    }

    pub async fn fetch_cancellable(
        &self,
        video_id: &str,
        langs: &[String],
        cancel: &CancellationToken,
    ) -> Result<FetchedCaptions> {
        info!("Fetching captions for {video_id}, preferred languages: {}", langs.join(", "));

        let listed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            r = self.list_tracks(video_id) => r,
        };
        let (listing, tracks) = match listed {
            Ok(tracks) if tracks.is_empty() => (Listing::NotFound, tracks),
            Ok(tracks) => (Listing::Tracks, tracks),
            Err(SourceError::Disabled) => (Listing::Disabled, Vec::new()),
            Err(SourceError::NotFound) => (Listing::NotFound, Vec::new()),
            Err(e) => {
                warn!("Listing caption tracks for {video_id} failed: {e}");
                (Listing::Failed, Vec::new())
            }
        };
        debug!("{video_id}: {listing:?}, {} tracks", tracks.len());

        let mut run = Run {
            fetcher: self,
            video_id,
            langs,
            tracks,
            tried: HashSet::new(),
        };
        let mut attempted = Vec::new();

        for strategy in self.strategies() {
            if strategy.needs_tracks() && run.tracks.is_empty() {
                continue;
            }
            attempted.push(strategy);
            debug!("Trying caption strategy {strategy} for {video_id}");

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                r = timeout(self.settings.strategy_timeout, strategy.attempt(&mut run)) => r,
            };

            match outcome {
                Ok(Ok(Some(found))) => {
                    info!(
                        "Got captions for {video_id} via {strategy} in {} ({} fragments)",
                        found.language,
                        found.fragments.len()
                    );
                    return Ok(found);
                }
                Ok(Ok(None)) => debug!("Strategy {strategy} found nothing usable"),
                Ok(Err(e)) => warn!("Strategy {strategy} failed for {video_id}: {e}"),
                Err(_) => warn!("Strategy {strategy} timed out for {video_id}"),
            }
        }

        let video_id = video_id.to_string();
        let languages = langs.to_vec();
        Err(match listing {
            Listing::Disabled => Error::CaptionsDisabled { video_id, languages },
            Listing::NotFound => Error::NoCaptionsFound { video_id, languages },
            Listing::Tracks | Listing::Failed => Error::FetchError {
                video_id,
                languages,
                attempted,
            },
        })
    }

    /// List tracks, retrying transient failures and timeouts with backoff
    async fn list_tracks(&self, video_id: &str) -> std::result::Result<Vec<CaptionTrack>, SourceError> {
        let call_timeout = self.settings.call_timeout;
        retry_if(
            self.settings.max_retries,
            || {
                let source = &self.source;
                async move {
                    timeout(call_timeout, source.list_caption_tracks(video_id))
                        .await
                        .unwrap_or_else(|_| Err(SourceError::Transient("listing caption tracks timed out".to_string())))
                }
            },
            |e: &SourceError| matches!(e, SourceError::Transient(_)),
        )
        .await
    }

    fn validated(&self, fragments: Vec<CaptionFragment>, language: String, strategy: Strategy) -> Option<FetchedCaptions> {
        match validate(&fragments, self.settings.min_transcript_chars) {
            Ok(()) => Some(FetchedCaptions {
                fragments,
                language,
                strategy,
            }),
            Err(reason) => {
                debug!("[{strategy}] rejected {language} captions: {reason}");
                None
            }
        }
    }
}

/// Non-empty, well-formed fragments whose text reaches `min_chars`
pub fn validate(fragments: &[CaptionFragment], min_chars: usize) -> std::result::Result<(), String> {
    if fragments.is_empty() {
        return Err("no fragments".to_string());
    }
    if let Some(bad) = fragments.iter().find(|f| !f.is_well_formed()) {
        return Err(format!("malformed fragment at start={} duration={}", bad.start, bad.duration));
    }
    let len = char_len(&assemble(fragments));
    if len < min_chars {
        return Err(format!("text too short ({len} < {min_chars} chars)"));
    }
    Ok(())
}
