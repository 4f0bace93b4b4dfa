use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::ServiceKind;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override the target language (e.g. ja, zh-Hans)
    #[arg(short, long, global = true)]
    pub target: Option<String>,

    /// Override the preferred service (openai or local)
    #[arg(short, long, global = true)]
    pub service: Option<ServiceKind>,

    /// Print the finished result as JSON instead of plain text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Translate the given text
    Translate {
        /// Text to translate
        #[arg(required = true)]
        text: Vec<String>,
    },

    /// Translate the current selection (read from standard input)
    Selection,

    /// Capture a screen region with the configured command and translate its text
    Ocr,

    /// Detect the language of the given text
    Detect {
        /// Text to inspect
        #[arg(required = true)]
        text: Vec<String>,

        /// Minimum confidence for a reliable result
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// List supported languages
    Languages,

    /// Manage the API key for the remote service
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum KeyAction {
    /// Store the API key in the system keyring
    Set {
        /// API key; read from standard input when omitted
        key: Option<String>,
    },

    /// Remove the stored API key
    Delete,

    /// Show whether an API key is available
    Status,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Write a configuration file with default values
    Init {
        /// Destination path
        #[arg(default_value = "moepeek.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    Show,
}
