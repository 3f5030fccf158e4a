use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process::Command;

use eyre::{Result, WrapErr, bail};
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use ytsum::config::Config;
use ytsum::fetcher::{CaptionFetcher, FetchSettings};
use ytsum::llm::HttpLanguageModel;
use ytsum::pipeline::{Pipeline, Preferences};
use ytsum::summarize::{Summarizer, SummarySettings};
use ytsum::youtube::YouTubeSource;

mod cli;

use cli::{Cli, OutputFormat};

fn setup_logging() -> Result<()> {
    let log_dir = log_dir();
    std::fs::create_dir_all(&log_dir)?;
    let log_file = log_dir.join("ytsum.log");

    let target = Box::new(std::fs::OpenOptions::new().create(true).append(true).open(&log_file)?);

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized: {}", log_file.display());
    Ok(())
}

fn log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ytsum")
        .join("logs")
}

fn tool_version(name: &str) -> Option<String> {
    Command::new(name)
        .arg("--version")
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| {
            String::from_utf8_lossy(&o.stdout)
                .trim()
                .lines()
                .next()
                .unwrap_or("")
                .to_string()
        })
}

fn build_after_help(external_tool: &str) -> String {
    let tool_line = match tool_version(external_tool) {
        Some(v) => format!("  \x1b[32m✅\x1b[0m {external_tool:<10} {v}"),
        None => format!("  \x1b[31m❌\x1b[0m {external_tool:<10} (not found, needed for the subtitle download fallback)"),
    };

    let log_path = log_dir().join("ytsum.log");

    format!(
        "\nOPTIONAL TOOLS:\n{tool_line}\n\nAPI keys are read from OPENAI_API_KEY or ANTHROPIC_API_KEY.\n\
         Config is read from: {}\nLogs are written to: {}",
        ytsum::config::config_path().display(),
        log_path.display()
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging()?;

    let mut config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            warn!("Ignoring config: {e:#}");
            eprintln!("Warning: {e:#}, using defaults");
            Config::default()
        }
    };

    let after_help = build_after_help(&config.fetch.external_tool);
    let cmd = <Cli as clap::CommandFactory>::command().after_help(after_help);
    let matches = cmd.get_matches();
    let cli = <Cli as clap::FromArgMatches>::from_arg_matches(&matches)?;

    if cli.list_models {
        println!("{}", ytsum::output::render_models(&config));
        return Ok(());
    }

    // CLI flags take priority over config
    let model = cli.model.clone().unwrap_or_else(|| config.default_model.clone());
    let mut prefs = Preferences::for_model(&config, &model);
    if !cli.langs.is_empty() {
        prefs.languages = cli.langs.clone();
    }
    debug!("Preferences: {prefs:?}");

    let mut fetch_settings = FetchSettings::from(&config);
    if cli.no_external {
        fetch_settings.external_tool = None;
    }

    if cli.verbose {
        let config_path = ytsum::config::config_path();
        if config_path.exists() {
            eprintln!("Config: {}", config_path.display());
        }
        eprintln!(
            "Languages: {}\nModel: {} (budget {} chars)",
            prefs.languages.join(", "),
            prefs.model,
            prefs.budget
        );
    }

    let client = reqwest::Client::new();
    let source = YouTubeSource::new(client.clone()).with_interface_language(config.default_language.clone());
    let mut pipeline = Pipeline::new(
        CaptionFetcher::new(source, fetch_settings),
        Summarizer::new(
            HttpLanguageModel::from_config(client, &config),
            config.prompts.clone(),
            SummarySettings::from(&config),
        ),
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling");
                cancel.cancel();
            }
        });
    }

    // URLs from the argument, or one per stdin line as they arrive
    let urls: Box<dyn Iterator<Item = io::Result<String>>> = match cli.url {
        Some(ref url) => Box::new(std::iter::once(Ok(url.clone()))),
        None => Box::new(io::stdin().lock().lines()),
    };

    let mut processed = 0;
    let mut rendered_all = Vec::new();
    for url_input in urls {
        let url_input = url_input?;
        let url_input = url_input.trim();
        if url_input.is_empty() {
            continue;
        }

        // prompts edited between stdin URLs apply to the next one
        if processed > 0 {
            match config.reload() {
                Ok(()) => pipeline.summarizer_mut().set_prompts(config.prompts.clone()),
                Err(e) => warn!("Keeping previous prompts: {e:#}"),
            }
        }
        processed += 1;

        let rendered = if cli.transcript {
            let transcript = pipeline
                .transcript(url_input, &prefs.languages, &cancel)
                .await
                .map_err(|e| report(e, cli.verbose))?;
            if cli.verbose {
                eprintln!(
                    "Video: {} ({})\nStrategy: {}\nLanguage: {}",
                    transcript.title, transcript.video_id, transcript.strategy, transcript.language,
                );
            }
            match cli.format {
                OutputFormat::Text => ytsum::output::render_transcript_text(&transcript),
                OutputFormat::Json => ytsum::output::render_transcript_json(&transcript)?,
            }
        } else {
            let summary = pipeline
                .run(url_input, &prefs, &cancel)
                .await
                .map_err(|e| report(e, cli.verbose))?;
            if cli.verbose {
                eprintln!(
                    "Video: {} ({})\nStrategy: {}\nLanguage: {}\nTranscript: {} chars in {} chunk(s)",
                    summary.title,
                    summary.video_id,
                    summary.strategy,
                    summary.language,
                    summary.transcript_chars,
                    summary.chunk_count,
                );
            }
            match cli.format {
                OutputFormat::Text => ytsum::output::render_text(&summary),
                OutputFormat::Json => ytsum::output::render_json(&summary)?,
            }
        };

        if cli.output.is_some() {
            rendered_all.push(rendered);
        } else {
            println!("{rendered}");
        }
    }

    if processed == 0 {
        bail!("no URL or video ID provided\n\nUsage: ytsum <URL>\n       echo <URL> | ytsum");
    }

    if let Some(ref path) = cli.output {
        std::fs::write(path, rendered_all.join("\n\n"))
            .wrap_err_with(|| format!("failed to write {}", path.display()))?;
        if cli.verbose {
            eprintln!("Output written to: {}", path.display());
        }
    }

    Ok(())
}

/// Log the full error, surface the short form unless verbose
fn report(err: ytsum::Error, verbose: bool) -> eyre::Report {
    warn!("Request failed: {err}");
    if verbose {
        eyre::Report::new(err)
    } else {
        eyre::eyre!(err.user_message())
    }
}
