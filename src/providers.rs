//! Collaborators the orchestrator consumes but does not own: text selection,
//! screen capture with OCR, permission checks and user preferences.
//!
//! The traits are the seam; the structs here are the plain implementations
//! used by the command-line host.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::debug;

use crate::config::{Config, ServiceKind};
use crate::languages::LanguagePair;

/// Reads the text the user currently has selected.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SelectionProvider: Send + Sync {
    async fn grab_selected_text(&self) -> Option<String>;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// The user dismissed the capture; not a failure
    #[error("capture cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),
}

/// Captures a screen region and returns the recognized text.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CaptureProvider: Send + Sync {
    async fn capture_and_recognize_text(&self) -> Result<String, CaptureError>;
}

/// Whether the OS capability needed to read selections has been granted.
#[cfg_attr(test, mockall::automock)]
pub trait PermissionProvider: Send + Sync {
    fn is_required_capability_granted(&self) -> bool;
}

/// Read-only view of the user's translation preferences.
pub trait Preferences: Send + Sync {
    fn target_language(&self) -> String;
    fn preferred_service(&self) -> ServiceKind;
    fn local_supported_pairs(&self) -> Vec<LanguagePair>;
    fn detection_enabled(&self) -> bool;
    /// Source language used when detection is disabled
    fn fixed_source_language(&self) -> Option<String>;
    fn detection_threshold(&self) -> f64;
    fn detection_hints(&self) -> HashMap<String, f64>;
}

impl Preferences for Config {
    fn target_language(&self) -> String {
        self.general.target_language.clone()
    }

    fn preferred_service(&self) -> ServiceKind {
        self.general.preferred_service
    }

    fn local_supported_pairs(&self) -> Vec<LanguagePair> {
        self.local.supported_pairs.clone()
    }

    fn detection_enabled(&self) -> bool {
        self.detection.enabled
    }

    fn fixed_source_language(&self) -> Option<String> {
        Config::fixed_source_language(self).map(str::to_string)
    }

    fn detection_threshold(&self) -> f64 {
        self.detection.confidence_threshold
    }

    fn detection_hints(&self) -> HashMap<String, f64> {
        Config::detection_hints(self)
    }
}

/// Treats standard input as the current selection.
pub struct StdinSelection;

#[async_trait]
impl SelectionProvider for StdinSelection {
    async fn grab_selected_text(&self) -> Option<String> {
        let mut text = String::new();
        tokio::io::stdin().read_to_string(&mut text).await.ok()?;
        (!text.trim().is_empty()).then_some(text)
    }
}

/// Runs an external capture command and reads the recognized text from its stdout.
///
/// A successful run with no output is a cancelled capture.
pub struct CommandCapture {
    command: String,
    args: Vec<String>,
}

impl CommandCapture {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.capture.command.clone(), config.capture.args.clone())
    }
}

#[async_trait]
impl CaptureProvider for CommandCapture {
    async fn capture_and_recognize_text(&self) -> Result<String, CaptureError> {
        if self.command.trim().is_empty() {
            return Err(CaptureError::Failed(
                "no capture command configured (set capture.command)".to_string(),
            ));
        }

        debug!("Running capture command: {} {:?}", self.command, self.args);
        let output = Command::new(&self.command)
            .args(&self.args)
            .output()
            .await
            .map_err(|e| CaptureError::Failed(format!("{}: {}", self.command, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("{} exited with {}", self.command, output.status)
            } else {
                stderr
            };
            return Err(CaptureError::Failed(message));
        }

        let text = String::from_utf8_lossy(&output.stdout).to_string();
        if text.trim().is_empty() {
            return Err(CaptureError::Cancelled);
        }
        Ok(text)
    }
}

/// For hosts where reading the selection needs no special permission.
pub struct AlwaysGranted;

impl PermissionProvider for AlwaysGranted {
    fn is_required_capability_granted(&self) -> bool {
        true
    }
}
