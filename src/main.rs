//! MoePeek - Streaming Translation Orchestrator
//!
//! Command-line host: translated text streams to stdout, progress and logs go
//! to stderr, and a daily log file is kept in the user's data directory.

use anyhow::Result;
use clap::Parser;
use directories::ProjectDirs;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, debug, info};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use moepeek::cli::{Args, Commands, ConfigAction, KeyAction};
use moepeek::config::Config;
use moepeek::credentials::{CredentialStore, KeyringStore, OPENAI_API_KEY};
use moepeek::detect::{DetectLanguage, LanguageDetector};
use moepeek::languages::{self, SUPPORTED_LANGUAGES};
use moepeek::orchestrator::{Collaborators, TranslationOrchestrator, TranslationState};
use moepeek::providers::{AlwaysGranted, CommandCapture, StdinSelection};
use moepeek::render::{IncrementalText, Outcome, Update, follow};
use moepeek::translate::Backends;

const CONFIG_FILE: &str = "moepeek.toml";

/// Where a translation's input comes from.
enum Entry {
    Text(String),
    Selection,
    Ocr,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(args.verbose)?;

    let mut config = load_config(args.config.as_deref())?;
    if let Some(target) = &args.target {
        config.general.target_language = target.clone();
    }
    if let Some(service) = args.service {
        config.general.preferred_service = service;
    }
    config.validate()?;

    match args.command {
        Commands::Translate { text } => {
            translate(config, Entry::Text(text.join(" ")), args.json).await?;
        }
        Commands::Selection => translate(config, Entry::Selection, args.json).await?,
        Commands::Ocr => translate(config, Entry::Ocr, args.json).await?,
        Commands::Detect { text, threshold } => {
            let text = text.join(" ");
            let threshold = threshold.unwrap_or(config.detection.confidence_threshold);
            let result = LanguageDetector::new().detect_with_confidence(
                &text,
                threshold,
                &config.detection_hints(),
            );

            if args.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                match &result.language {
                    Some(code) => {
                        let note = if result.is_uncertain() { " (uncertain)" } else { "" };
                        println!(
                            "{} [{}] confidence {:.2}{}",
                            languages::display_name(code),
                            code,
                            result.confidence,
                            note
                        );
                    }
                    None => println!(
                        "Unknown (best confidence {:.2} below {:.2})",
                        result.confidence, threshold
                    ),
                }
            }
        }
        Commands::Languages => {
            println!("{:<10} {:<25}", "Code", "Language");
            println!("{}", "-".repeat(35));
            for language in SUPPORTED_LANGUAGES.iter() {
                println!("{:<10} {:<25}", language.code, language.name);
            }
        }
        Commands::Key { action } => {
            let store = KeyringStore::new();
            match action {
                KeyAction::Set { key } => {
                    let key = match key {
                        Some(key) => key,
                        None => read_key_from_stdin()?,
                    };
                    if key.trim().is_empty() {
                        anyhow::bail!("API key is empty");
                    }
                    store.save(OPENAI_API_KEY, key.trim())?;
                    println!("API key saved to the system keyring.");
                }
                KeyAction::Delete => {
                    store.delete(OPENAI_API_KEY)?;
                    println!("API key removed.");
                }
                KeyAction::Status => {
                    let env_var = KeyringStore::env_var_name(OPENAI_API_KEY);
                    if std::env::var(&env_var).is_ok_and(|v| !v.trim().is_empty()) {
                        println!("API key: configured (from ${})", env_var);
                    } else if store.load(OPENAI_API_KEY).is_some() {
                        println!("API key: configured (system keyring)");
                    } else {
                        println!("API key: not configured");
                    }
                }
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Init { path, force } => {
                if path.exists() && !force {
                    anyhow::bail!(
                        "{} already exists (use --force to overwrite)",
                        path.display()
                    );
                }
                Config::default().save_to_file(&path)?;
                println!("Configuration written to {}", path.display());
            }
            ConfigAction::Show => {
                print!("{}", toml::to_string_pretty(&config)?);
            }
        },
    }

    Ok(())
}

async fn translate(config: Config, entry: Entry, json: bool) -> Result<()> {
    let credentials: Arc<dyn CredentialStore> = Arc::new(KeyringStore::new());
    let backends = Backends::from_config(&config, credentials.clone())?;
    let collaborators = Collaborators {
        detector: Arc::new(LanguageDetector::new()),
        capture: Arc::new(CommandCapture::from_config(&config)),
        preferences: Arc::new(config),
        credentials,
        selection: Arc::new(StdinSelection),
        permissions: Arc::new(AlwaysGranted),
    };
    let orchestrator = TranslationOrchestrator::new(backends, collaborators);

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(100));

    let mut text = IncrementalText::default();
    let mut stdout = std::io::stdout();
    let on_state = |state: &TranslationState| match state {
        TranslationState::Grabbing => spinner.set_message("Reading input..."),
        TranslationState::Translating { .. } => spinner.set_message("Translating..."),
        TranslationState::Streaming { partial_text, .. } if !json => {
            spinner.finish_and_clear();
            let written = match text.advance(partial_text) {
                Some(Update::Append(tail)) => write!(stdout, "{}", tail),
                Some(Update::Restart(all)) => write!(stdout, "\n{}", all),
                None => Ok(()),
            };
            if written.and_then(|_| stdout.flush()).is_err() {
                debug!("stdout closed");
            }
        }
        TranslationState::Completed { result } if !json => {
            spinner.finish_and_clear();
            if let Some(Update::Append(tail) | Update::Restart(tail)) =
                text.advance(result.translated_text())
            {
                print!("{}", tail);
            }
            println!();
        }
        _ => {}
    };

    let rx = orchestrator.subscribe();
    let run = async {
        match entry {
            Entry::Text(text) => orchestrator.translate(&text).await,
            Entry::Selection => orchestrator.translate_selection().await,
            Entry::Ocr => orchestrator.ocr_and_translate().await,
        }
    };

    let outcome = tokio::select! {
        (_, outcome) = async { tokio::join!(run, follow(rx, on_state)) } => outcome,
        _ = tokio::signal::ctrl_c() => {
            orchestrator.dismiss();
            Outcome::Cancelled
        }
    };
    spinner.finish_and_clear();

    match outcome {
        Outcome::Completed(result) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
            info!(
                "{} → {} via {}",
                result.source_lang(),
                result.target_lang(),
                result.service_name()
            );
            Ok(())
        }
        Outcome::Cancelled => {
            info!("Cancelled");
            Ok(())
        }
        Outcome::Failed(message) => Err(anyhow::anyhow!(message)),
    }
}

/// `--config`, then `./moepeek.toml`, then the user config directory, then defaults.
fn load_config(path: Option<&Path>) -> Result<Config> {
    if let Some(path) = path {
        return Ok(Config::from_file(path)?);
    }

    let candidates = std::iter::once(PathBuf::from(CONFIG_FILE))
        .chain(project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE)));
    for candidate in candidates {
        if candidate.exists() {
            info!("Loading configuration from {}", candidate.display());
            return Ok(Config::from_file(&candidate)?);
        }
    }

    debug!("No configuration file found, using defaults");
    Ok(Config::default())
}

fn read_key_from_stdin() -> Result<String> {
    eprint!("API key: ");
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "moepeek")
}

fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = match project_dirs() {
        Some(dirs) => dirs.data_local_dir().join("log"),
        None => std::env::current_dir()?.join(".moepeek").join("log"),
    };
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "moepeek.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    // stdout carries the translation, so the console layer writes to stderr
    // and stays quiet unless asked
    let console_filter = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(verbose)
        .with_line_number(verbose)
        .with_filter(console_filter);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    debug!(
        "Logging initialized - level: {}, file: {}",
        log_level,
        log_dir.join("moepeek.log").display()
    );

    Ok(())
}
