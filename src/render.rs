//! Following an orchestrator's state from a terminal host.

use tokio::sync::watch;

use crate::orchestrator::{TranslationResult, TranslationState};

/// How a followed operation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed(TranslationResult),
    /// Back to idle without a result (cancelled capture, dismissal)
    Cancelled,
    Failed(String),
}

/// Text to write after a new partial translation arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Update<'a> {
    Append(&'a str),
    /// The new text does not extend what was written; start over with it
    Restart(&'a str),
}

/// Remembers what has been written so each update only adds the new tail.
#[derive(Debug, Default)]
pub struct IncrementalText {
    written: String,
}

impl IncrementalText {
    pub fn advance<'a>(&mut self, text: &'a str) -> Option<Update<'a>> {
        if let Some(tail) = text.strip_prefix(self.written.as_str()) {
            if tail.is_empty() {
                return None;
            }
            self.written.push_str(tail);
            return Some(Update::Append(tail));
        }

        self.written = text.to_string();
        Some(Update::Restart(text))
    }
}

/// Wait for the running operation to settle, reporting every state seen.
///
/// Intermediate states may be skipped when updates arrive faster than they
/// are read; the terminal one never is.
pub async fn follow<F>(mut rx: watch::Receiver<TranslationState>, mut on_state: F) -> Outcome
where
    F: FnMut(&TranslationState),
{
    loop {
        if rx.changed().await.is_err() {
            return Outcome::Cancelled;
        }

        let state = rx.borrow_and_update().clone();
        on_state(&state);

        match state {
            TranslationState::Completed { result } => return Outcome::Completed(result),
            TranslationState::Error { message } => return Outcome::Failed(message),
            TranslationState::Idle => return Outcome::Cancelled,
            _ => {}
        }
    }
}
