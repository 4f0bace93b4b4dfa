//! Translation orchestrator
//!
//! Owns the state of the current translation operation and is its only
//! writer. Hosts read the state through a `watch` channel (latest value, for
//! rendering) or a `broadcast` channel (every transition, in order).
//!
//! Each entry action starts a new operation. Starting another operation or
//! calling [`TranslationOrchestrator::dismiss`] supersedes the running one:
//! it stops consuming its backend stream and never publishes again.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, watch};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::credentials::{CredentialStore, OPENAI_API_KEY};
use crate::detect::DetectLanguage;
use crate::error::TranslationError;
use crate::languages::UNKNOWN_LANGUAGE;
use crate::providers::{
    CaptureError, CaptureProvider, PermissionProvider, Preferences, SelectionProvider,
};
use crate::resolve::resolve_target_language;
use crate::translate::{
    Backend, Backends, FALLBACK_SERVICE, TranslationBackend, TranslationRequest,
    is_local_available, select_backend,
};

/// Capacity of the transition channel; slow subscribers see `Lagged`.
const TRANSITION_CAPACITY: usize = 256;

/// A finished translation. Built once, never changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranslationResult {
    source_text: String,
    translated_text: String,
    source_lang: String,
    target_lang: String,
    service_name: String,
    completed_at: DateTime<Utc>,
}

impl TranslationResult {
    fn new(
        request: &TranslationRequest,
        translated_text: String,
        service_name: &str,
    ) -> Self {
        Self {
            source_text: request.text.clone(),
            translated_text,
            source_lang: request
                .source_lang
                .clone()
                .unwrap_or_else(|| UNKNOWN_LANGUAGE.to_string()),
            target_lang: request.target_lang.clone(),
            service_name: service_name.to_string(),
            completed_at: Utc::now(),
        }
    }

    pub fn source_text(&self) -> &str {
        &self.source_text
    }

    pub fn translated_text(&self) -> &str {
        &self.translated_text
    }

    /// Detected source language, or `"unknown"`
    pub fn source_lang(&self) -> &str {
        &self.source_lang
    }

    pub fn target_lang(&self) -> &str {
        &self.target_lang
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TranslationState {
    Idle,
    Grabbing,
    Translating {
        source_text: String,
    },
    /// Emitted once per chunk; a display update, never a final state
    Streaming {
        source_text: String,
        partial_text: String,
    },
    Completed {
        result: TranslationResult,
    },
    Error {
        message: String,
    },
}

impl TranslationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Error { .. })
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Grabbing => "grabbing",
            Self::Translating { .. } => "translating",
            Self::Streaming { .. } => "streaming",
            Self::Completed { .. } => "completed",
            Self::Error { .. } => "error",
        }
    }
}

/// Everything the orchestrator consumes besides the backends.
#[derive(Clone)]
pub struct Collaborators {
    pub detector: Arc<dyn DetectLanguage>,
    pub preferences: Arc<dyn Preferences>,
    pub credentials: Arc<dyn CredentialStore>,
    pub selection: Arc<dyn SelectionProvider>,
    pub capture: Arc<dyn CaptureProvider>,
    pub permissions: Arc<dyn PermissionProvider>,
}

/// Why a streaming attempt produced no result.
enum AttemptError {
    Failed(TranslationError),
    /// A newer operation or a dismissal took over
    Superseded,
}

impl From<TranslationError> for AttemptError {
    fn from(err: TranslationError) -> Self {
        Self::Failed(err)
    }
}

pub struct TranslationOrchestrator<B = Backend> {
    backends: Backends<B>,
    collaborators: Collaborators,
    state: watch::Sender<TranslationState>,
    transitions: broadcast::Sender<TranslationState>,
    /// Id of the running operation. Changed and checked only inside the
    /// state channel's lock, so a stale publish cannot land after a dismissal.
    operation: AtomicU64,
}

impl<B: TranslationBackend> TranslationOrchestrator<B> {
    pub fn new(backends: Backends<B>, collaborators: Collaborators) -> Self {
        let (state, _) = watch::channel(TranslationState::Idle);
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);

        Self {
            backends,
            collaborators,
            state,
            transitions,
            operation: AtomicU64::new(0),
        }
    }

    /// Current state.
    pub fn state(&self) -> TranslationState {
        self.state.borrow().clone()
    }

    /// Latest-value subscription, for rendering.
    pub fn subscribe(&self) -> watch::Receiver<TranslationState> {
        self.state.subscribe()
    }

    /// Every transition from now on, in order.
    pub fn transitions(&self) -> broadcast::Receiver<TranslationState> {
        self.transitions.subscribe()
    }

    /// Grab the selected text and translate it.
    pub async fn translate_selection(&self) {
        let op = self.begin();
        let span = info_span!("translation", id = %Uuid::new_v4(), action = "selection");

        async {
            if !self.collaborators.permissions.is_required_capability_granted() {
                warn!("Selection permission not granted");
                self.fail(op, TranslationError::PermissionDenied);
                return;
            }

            if !self.publish(op, TranslationState::Grabbing) {
                return;
            }

            match self.collaborators.selection.grab_selected_text().await {
                Some(text) => self.run(op, &text).await,
                None => {
                    info!("No text selected");
                    self.fail(op, TranslationError::NoInputAvailable);
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Capture a screen region, recognize its text and translate it.
    pub async fn ocr_and_translate(&self) {
        let op = self.begin();
        let span = info_span!("translation", id = %Uuid::new_v4(), action = "ocr");

        async {
            if !self.publish(op, TranslationState::Grabbing) {
                return;
            }

            match self.collaborators.capture.capture_and_recognize_text().await {
                Ok(text) => self.run(op, &text).await,
                Err(CaptureError::Cancelled) => {
                    info!("Capture cancelled by user");
                    self.publish(op, TranslationState::Idle);
                }
                Err(CaptureError::Failed(message)) => {
                    warn!("Capture failed: {}", message);
                    self.fail(op, TranslationError::CaptureFailed(message));
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Translate the given text.
    pub async fn translate(&self, text: &str) {
        let op = self.begin();
        let span = info_span!("translation", id = %Uuid::new_v4(), action = "text");
        self.run(op, text).instrument(span).await
    }

    /// Hide whatever is displayed and abandon the running operation.
    pub fn dismiss(&self) {
        let changed = self.state.send_if_modified(|state| {
            self.operation.fetch_add(1, Ordering::SeqCst);
            if state.is_idle() {
                return false;
            }
            *state = TranslationState::Idle;
            let _ = self.transitions.send(TranslationState::Idle);
            true
        });
        if changed {
            debug!("Dismissed");
        }
    }

    async fn run(&self, op: u64, text: &str) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            self.fail(op, TranslationError::EmptyInput);
            return;
        }

        if !self.publish(
            op,
            TranslationState::Translating {
                source_text: trimmed.to_string(),
            },
        ) {
            return;
        }

        let preferences = &self.collaborators.preferences;
        let source_lang = self.source_language(trimmed);
        let target_lang = resolve_target_language(source_lang.as_deref(), &preferences.target_language());
        let local_available = is_local_available(
            &preferences.local_supported_pairs(),
            source_lang.as_deref(),
            &target_lang,
        );
        let primary = select_backend(preferences.preferred_service(), local_available);

        let request = TranslationRequest {
            text: trimmed.to_string(),
            source_lang,
            target_lang,
        };
        info!(
            "Translating {} chars {} → {} with {}",
            request.text.chars().count(),
            request.source_lang.as_deref().unwrap_or(UNKNOWN_LANGUAGE),
            request.target_lang,
            primary
        );

        let outcome = match self.attempt(op, self.backends.get(primary), &request).await {
            Err(AttemptError::Failed(err)) if err.should_fallback() => {
                self.fallback(op, &request, err).await
            }
            other => other,
        };

        match outcome {
            Ok(result) => {
                info!(
                    "Translation completed by {} ({} chars)",
                    result.service_name(),
                    result.translated_text().chars().count()
                );
                self.publish(op, TranslationState::Completed { result });
            }
            Err(AttemptError::Failed(err)) => self.fail(op, err),
            Err(AttemptError::Superseded) => debug!("Operation superseded"),
        }
    }

    /// Detected language, or the configured one when detection is off.
    fn source_language(&self, text: &str) -> Option<String> {
        let preferences = &self.collaborators.preferences;
        if !preferences.detection_enabled() {
            return preferences.fixed_source_language();
        }

        self.collaborators
            .detector
            .detect_with_confidence(
                text,
                preferences.detection_threshold(),
                &preferences.detection_hints(),
            )
            .language
    }

    /// The one retry, against the remote backend, if it has a credential.
    async fn fallback(
        &self,
        op: u64,
        request: &TranslationRequest,
        original: TranslationError,
    ) -> Result<TranslationResult, AttemptError> {
        if !self.is_current(op) {
            return Err(AttemptError::Superseded);
        }

        if self.collaborators.credentials.load(OPENAI_API_KEY).is_none() {
            warn!("Primary attempt failed ({}); no API key for fallback", original);
            return Err(AttemptError::Failed(original));
        }

        let backend = self.backends.get(FALLBACK_SERVICE);
        warn!("Primary attempt failed ({}); falling back to {}", original, backend.name());
        self.attempt(op, backend, request).await
    }

    /// Stream one backend's output into the state until it completes.
    async fn attempt(
        &self,
        op: u64,
        backend: &B,
        request: &TranslationRequest,
    ) -> Result<TranslationResult, AttemptError> {
        let mut stream = backend.translate_stream(request).await?;
        let mut accumulated = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if chunk.is_empty() {
                continue;
            }
            accumulated.push_str(&chunk);

            let streaming = TranslationState::Streaming {
                source_text: request.text.clone(),
                partial_text: accumulated.clone(),
            };
            if !self.publish(op, streaming) {
                return Err(AttemptError::Superseded);
            }
        }

        if accumulated.is_empty() {
            return Err(TranslationError::EmptyResult.into());
        }

        Ok(TranslationResult::new(request, accumulated, backend.name()))
    }

    fn begin(&self) -> u64 {
        let mut op = 0;
        self.state.send_if_modified(|_| {
            op = self.operation.fetch_add(1, Ordering::SeqCst) + 1;
            false
        });
        op
    }

    fn is_current(&self, op: u64) -> bool {
        self.operation.load(Ordering::SeqCst) == op
    }

    /// Write `state` if `op` is still the running operation.
    fn publish(&self, op: u64, state: TranslationState) -> bool {
        let name = state.name();
        let published = self.state.send_if_modified(|current| {
            if !self.is_current(op) {
                return false;
            }
            let _ = self.transitions.send(state.clone());
            *current = state;
            true
        });
        if published {
            debug!("State → {}", name);
        }
        published
    }

    fn fail(&self, op: u64, err: TranslationError) {
        info!("Translation failed: {}", err);
        self.publish(
            op,
            TranslationState::Error {
                message: err.to_string(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ServiceKind};
    use crate::credentials::MockCredentialStore;
    use crate::detect::DetectionResult;
    use crate::languages::LanguagePair;
    use crate::providers::{MockCaptureProvider, MockPermissionProvider, MockSelectionProvider};
    use crate::translate::ChunkStream;
    use async_trait::async_trait;
    use futures::stream;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    /// What a scripted backend does when asked to translate.
    enum Script {
        Chunks(Vec<&'static str>),
        FailOnStart(TranslationError),
        FailMidStream(Vec<&'static str>, TranslationError),
        Channel(Mutex<Option<mpsc::UnboundedReceiver<String>>>),
    }

    struct ScriptedBackend {
        name: &'static str,
        script: Script,
        calls: Arc<AtomicUsize>,
        requests: Mutex<Vec<TranslationRequest>>,
    }

    impl ScriptedBackend {
        fn new(name: &'static str, script: Script) -> Self {
            Self {
                name,
                script,
                calls: Arc::new(AtomicUsize::new(0)),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn chunks(name: &'static str, chunks: Vec<&'static str>) -> Self {
            Self::new(name, Script::Chunks(chunks))
        }

        fn failing(name: &'static str, err: TranslationError) -> Self {
            Self::new(name, Script::FailOnStart(err))
        }
    }

    #[async_trait]
    impl TranslationBackend for ScriptedBackend {
        fn name(&self) -> &str {
            self.name
        }

        async fn translate_stream(
            &self,
            request: &TranslationRequest,
        ) -> Result<ChunkStream, TranslationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request.clone());

            match &self.script {
                Script::Chunks(chunks) => {
                    let items: Vec<_> = chunks.iter().map(|c| Ok(c.to_string())).collect();
                    Ok(stream::iter(items).boxed())
                }
                Script::FailOnStart(err) => Err(err.clone()),
                Script::FailMidStream(chunks, err) => {
                    let mut items: Vec<_> = chunks.iter().map(|c| Ok(c.to_string())).collect();
                    items.push(Err(err.clone()));
                    Ok(stream::iter(items).boxed())
                }
                Script::Channel(rx) => {
                    let rx = rx.lock().unwrap().take().expect("channel backend used twice");
                    Ok(stream::unfold(rx, |mut rx| async move {
                        rx.recv().await.map(|chunk| (Ok(chunk), rx))
                    })
                    .boxed())
                }
            }
        }
    }

    /// Detector returning a fixed answer and remembering its inputs.
    struct FixedDetector {
        result: DetectionResult,
        seen: Mutex<Vec<(String, f64, HashMap<String, f64>)>>,
    }

    impl FixedDetector {
        fn reliable(code: &str, confidence: f64) -> Self {
            Self {
                result: DetectionResult {
                    language: Some(code.to_string()),
                    confidence,
                    is_reliable: true,
                },
                seen: Mutex::new(Vec::new()),
            }
        }

        fn unreliable() -> Self {
            Self {
                result: DetectionResult::unknown(),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl DetectLanguage for FixedDetector {
        fn detect_with_confidence(
            &self,
            text: &str,
            threshold: f64,
            preferred_hints: &HashMap<String, f64>,
        ) -> DetectionResult {
            self.seen
                .lock()
                .unwrap()
                .push((text.to_string(), threshold, preferred_hints.clone()));
            self.result.clone()
        }
    }

    struct Harness {
        config: Config,
        detector: Arc<FixedDetector>,
        credentials: MockCredentialStore,
        selection: MockSelectionProvider,
        capture: MockCaptureProvider,
        permissions: MockPermissionProvider,
    }

    impl Harness {
        fn new() -> Self {
            let mut credentials = MockCredentialStore::new();
            credentials
                .expect_load()
                .returning(|_| Some("sk-test".to_string()));
            let mut permissions = MockPermissionProvider::new();
            permissions
                .expect_is_required_capability_granted()
                .return_const(true);

            Self {
                config: Config::default(),
                detector: Arc::new(FixedDetector::reliable("en", 0.9)),
                credentials,
                selection: MockSelectionProvider::new(),
                capture: MockCaptureProvider::new(),
                permissions,
            }
        }

        fn prefer_local(mut self) -> Self {
            self.config.general.preferred_service = ServiceKind::Local;
            self.config.local.supported_pairs = vec![LanguagePair::new("en", "zh-Hans")];
            self
        }

        fn without_credentials(mut self) -> Self {
            let mut credentials = MockCredentialStore::new();
            credentials.expect_load().returning(|_| None);
            self.credentials = credentials;
            self
        }

        fn build(
            self,
            local: ScriptedBackend,
            remote: ScriptedBackend,
        ) -> TranslationOrchestrator<ScriptedBackend> {
            TranslationOrchestrator::new(
                Backends::new(local, remote),
                Collaborators {
                    detector: self.detector,
                    preferences: Arc::new(self.config),
                    credentials: Arc::new(self.credentials),
                    selection: Arc::new(self.selection),
                    capture: Arc::new(self.capture),
                    permissions: Arc::new(self.permissions),
                },
            )
        }
    }

    fn drain(rx: &mut broadcast::Receiver<TranslationState>) -> Vec<TranslationState> {
        let mut states = Vec::new();
        while let Ok(state) = rx.try_recv() {
            states.push(state);
        }
        states
    }

    fn names(states: &[TranslationState]) -> Vec<&'static str> {
        states.iter().map(TranslationState::name).collect()
    }

    fn error_message(state: &TranslationState) -> &str {
        match state {
            TranslationState::Error { message } => message,
            other => panic!("expected error state, got {:?}", other),
        }
    }

    fn unused(name: &'static str) -> ScriptedBackend {
        ScriptedBackend::failing(name, TranslationError::Network("should not be called".into()))
    }

    #[tokio::test]
    async fn test_end_to_end_streaming_translation() {
        let orchestrator = Harness::new().build(
            unused("local"),
            ScriptedBackend::chunks("primary", vec!["你", "好", "世界"]),
        );
        let mut rx = orchestrator.transitions();

        orchestrator.translate("  hello world  ").await;

        let states = drain(&mut rx);
        assert_eq!(
            names(&states),
            vec!["translating", "streaming", "streaming", "streaming", "completed"]
        );
        assert_eq!(
            states[0],
            TranslationState::Translating {
                source_text: "hello world".into()
            }
        );
        assert_eq!(
            states[2],
            TranslationState::Streaming {
                source_text: "hello world".into(),
                partial_text: "你好".into()
            }
        );

        let TranslationState::Completed { result } = orchestrator.state() else {
            panic!("expected completed state");
        };
        assert_eq!(result.source_text(), "hello world");
        assert_eq!(result.translated_text(), "你好世界");
        assert_eq!(result.source_lang(), "en");
        assert_eq!(result.target_lang(), "zh-Hans");
        assert_eq!(result.service_name(), "primary");
    }

    #[tokio::test]
    async fn test_whitespace_input_is_empty_error() {
        for input in ["", "   ", "\n\t  \n"] {
            let orchestrator = Harness::new().build(unused("local"), unused("remote"));
            let mut rx = orchestrator.transitions();

            orchestrator.translate(input).await;

            let states = drain(&mut rx);
            assert_eq!(names(&states), vec!["error"]);
            assert_eq!(error_message(&states[0]), "Empty text");
        }
    }

    #[tokio::test]
    async fn test_local_primary_when_preferred_and_available() {
        let orchestrator = Harness::new()
            .prefer_local()
            .build(ScriptedBackend::chunks("local", vec!["你好"]), unused("remote"));

        orchestrator.translate("hello").await;

        let TranslationState::Completed { result } = orchestrator.state() else {
            panic!("expected completed state");
        };
        assert_eq!(result.service_name(), "local");
    }

    #[tokio::test]
    async fn test_fallback_invoked_once_with_credential() {
        let remote = ScriptedBackend::chunks("remote", vec!["你好"]);
        let remote_calls = remote.calls.clone();
        let orchestrator = Harness::new().prefer_local().build(
            ScriptedBackend::failing("local", TranslationError::Network("offline".into())),
            remote,
        );
        let mut rx = orchestrator.transitions();

        orchestrator.translate("hello").await;

        assert_eq!(remote_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            names(&drain(&mut rx)),
            vec!["translating", "streaming", "completed"]
        );
        let TranslationState::Completed { result } = orchestrator.state() else {
            panic!("expected completed state");
        };
        assert_eq!(result.service_name(), "remote");
    }

    #[tokio::test]
    async fn test_no_credential_keeps_original_error() {
        let remote = unused("remote");
        let remote_calls = remote.calls.clone();
        let orchestrator = Harness::new().prefer_local().without_credentials().build(
            ScriptedBackend::failing("local", TranslationError::Network("offline".into())),
            remote,
        );

        orchestrator.translate("hello").await;

        assert_eq!(remote_calls.load(Ordering::SeqCst), 0);
        assert_eq!(error_message(&orchestrator.state()), "Network error: offline");
    }

    #[tokio::test]
    async fn test_fallback_failure_reports_fallback_error() {
        let orchestrator = Harness::new().prefer_local().build(
            ScriptedBackend::failing("local", TranslationError::Timeout),
            ScriptedBackend::failing("remote", TranslationError::RateLimited("slow down".into())),
        );

        orchestrator.translate("hello").await;

        assert_eq!(
            error_message(&orchestrator.state()),
            "Rate limit exceeded: slow down"
        );
    }

    #[tokio::test]
    async fn test_terminal_error_skips_fallback() {
        let remote = unused("remote");
        let remote_calls = remote.calls.clone();
        let orchestrator = Harness::new().prefer_local().build(
            ScriptedBackend::failing("local", TranslationError::EmptyInput),
            remote,
        );

        orchestrator.translate("hello").await;

        assert_eq!(remote_calls.load(Ordering::SeqCst), 0);
        assert_eq!(error_message(&orchestrator.state()), "Empty text");
    }

    #[tokio::test]
    async fn test_remote_primary_falls_back_to_itself_once() {
        let remote = ScriptedBackend::failing("remote", TranslationError::Timeout);
        let remote_calls = remote.calls.clone();
        let orchestrator = Harness::new().build(unused("local"), remote);

        orchestrator.translate("hello").await;

        assert_eq!(remote_calls.load(Ordering::SeqCst), 2);
        assert_eq!(error_message(&orchestrator.state()), "Request timed out");
    }

    #[tokio::test]
    async fn test_zero_chunks_is_empty_result_error() {
        let orchestrator = Harness::new()
            .without_credentials()
            .build(unused("local"), ScriptedBackend::chunks("remote", vec![]));
        let mut rx = orchestrator.transitions();

        orchestrator.translate("hello").await;

        let states = drain(&mut rx);
        assert_eq!(names(&states), vec!["translating", "error"]);
        assert_eq!(
            error_message(&states[1]),
            "Translation service returned an empty result"
        );
    }

    #[tokio::test]
    async fn test_empty_result_falls_back_when_possible() {
        let orchestrator = Harness::new().prefer_local().build(
            ScriptedBackend::chunks("local", vec![""]),
            ScriptedBackend::chunks("remote", vec!["你好"]),
        );

        orchestrator.translate("hello").await;

        let TranslationState::Completed { result } = orchestrator.state() else {
            panic!("expected completed state");
        };
        assert_eq!(result.service_name(), "remote");
    }

    #[tokio::test]
    async fn test_mid_stream_failure_never_streams_after_terminal() {
        let orchestrator = Harness::new().without_credentials().build(
            unused("local"),
            ScriptedBackend::new(
                "remote",
                Script::FailMidStream(vec!["你"], TranslationError::Network("reset".into())),
            ),
        );
        let mut rx = orchestrator.transitions();

        orchestrator.translate("hello").await;

        let states = drain(&mut rx);
        assert_eq!(names(&states), vec!["translating", "streaming", "error"]);
        assert_eq!(error_message(&states[2]), "Network error: reset");
    }

    #[tokio::test]
    async fn test_unreliable_detection_keeps_preferred_target() {
        let mut harness = Harness::new();
        harness.detector = Arc::new(FixedDetector::unreliable());
        let remote = ScriptedBackend::chunks("remote", vec!["你好"]);
        let orchestrator = harness.build(unused("local"), remote);

        orchestrator.translate("ok").await;

        let TranslationState::Completed { result } = orchestrator.state() else {
            panic!("expected completed state");
        };
        assert_eq!(result.source_lang(), "unknown");
        assert_eq!(result.target_lang(), "zh-Hans");
    }

    #[tokio::test]
    async fn test_same_language_flips_target() {
        let mut harness = Harness::new();
        harness.config.general.target_language = "en".to_string();
        let remote = ScriptedBackend::chunks("remote", vec!["你好"]);
        let orchestrator = harness.build(unused("local"), remote);

        orchestrator.translate("hello").await;

        let TranslationState::Completed { result } = orchestrator.state() else {
            panic!("expected completed state");
        };
        assert_eq!(result.target_lang(), "zh-Hans");
    }

    #[tokio::test]
    async fn test_detection_uses_configured_threshold_and_hints() {
        let mut harness = Harness::new();
        harness.config.detection.confidence_threshold = 0.6;
        harness.config.detection.source_language = "ja".to_string();
        let detector = harness.detector.clone();
        let orchestrator = harness.build(
            unused("local"),
            ScriptedBackend::chunks("remote", vec!["你好"]),
        );

        orchestrator.translate(" hello ").await;

        let seen = detector.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "hello");
        assert_eq!(seen[0].1, 0.6);
        assert_eq!(seen[0].2["ja"], 1.0);
    }

    #[tokio::test]
    async fn test_disabled_detection_uses_fixed_source() {
        let mut harness = Harness::new();
        harness.config.detection.enabled = false;
        harness.config.detection.source_language = "zh-Hans".to_string();
        let detector = harness.detector.clone();
        let remote = ScriptedBackend::chunks("remote", vec!["hello"]);
        let orchestrator = harness.build(unused("local"), remote);

        orchestrator.translate("你好").await;

        assert!(detector.seen.lock().unwrap().is_empty());
        let TranslationState::Completed { result } = orchestrator.state() else {
            panic!("expected completed state");
        };
        assert_eq!(result.source_lang(), "zh-Hans");
        assert_eq!(result.target_lang(), "en");
    }

    #[tokio::test]
    async fn test_selection_without_permission() {
        let mut harness = Harness::new();
        let mut permissions = MockPermissionProvider::new();
        permissions
            .expect_is_required_capability_granted()
            .return_const(false);
        harness.permissions = permissions;
        harness.selection.expect_grab_selected_text().never();
        let orchestrator = harness.build(unused("local"), unused("remote"));
        let mut rx = orchestrator.transitions();

        orchestrator.translate_selection().await;

        let states = drain(&mut rx);
        assert_eq!(names(&states), vec!["error"]);
        assert!(error_message(&states[0]).contains("permission"));
    }

    #[tokio::test]
    async fn test_selection_with_nothing_selected() {
        let mut harness = Harness::new();
        harness
            .selection
            .expect_grab_selected_text()
            .times(1)
            .returning(|| None);
        let orchestrator = harness.build(unused("local"), unused("remote"));
        let mut rx = orchestrator.transitions();

        orchestrator.translate_selection().await;

        let states = drain(&mut rx);
        assert_eq!(names(&states), vec!["grabbing", "error"]);
        assert_eq!(
            error_message(&states[1]),
            "No text selected. Select some text and try again."
        );
    }

    #[tokio::test]
    async fn test_selection_translates_grabbed_text() {
        let mut harness = Harness::new();
        harness
            .selection
            .expect_grab_selected_text()
            .returning(|| Some(" hello\n".to_string()));
        let remote = ScriptedBackend::chunks("remote", vec!["你好"]);
        let orchestrator = harness.build(unused("local"), remote);
        let mut rx = orchestrator.transitions();

        orchestrator.translate_selection().await;

        assert_eq!(
            names(&drain(&mut rx)),
            vec!["grabbing", "translating", "streaming", "completed"]
        );
    }

    #[tokio::test]
    async fn test_cancelled_capture_returns_to_idle() {
        let mut harness = Harness::new();
        harness
            .capture
            .expect_capture_and_recognize_text()
            .returning(|| Err(CaptureError::Cancelled));
        let orchestrator = harness.build(unused("local"), unused("remote"));
        let mut rx = orchestrator.transitions();

        orchestrator.ocr_and_translate().await;

        assert_eq!(names(&drain(&mut rx)), vec!["grabbing", "idle"]);
        assert!(orchestrator.state().is_idle());
    }

    #[tokio::test]
    async fn test_failed_capture_is_error() {
        let mut harness = Harness::new();
        harness
            .capture
            .expect_capture_and_recognize_text()
            .returning(|| Err(CaptureError::Failed("no display".into())));
        let orchestrator = harness.build(unused("local"), unused("remote"));

        orchestrator.ocr_and_translate().await;

        assert_eq!(error_message(&orchestrator.state()), "OCR failed: no display");
    }

    #[tokio::test]
    async fn test_capture_translates_recognized_text() {
        let mut harness = Harness::new();
        harness
            .capture
            .expect_capture_and_recognize_text()
            .returning(|| Ok("hello world\n".to_string()));
        let remote = ScriptedBackend::chunks("remote", vec!["你好", "世界"]);
        let orchestrator = harness.build(unused("local"), remote);

        orchestrator.ocr_and_translate().await;

        let TranslationState::Completed { result } = orchestrator.state() else {
            panic!("expected completed state");
        };
        assert_eq!(result.source_text(), "hello world");
        assert_eq!(result.translated_text(), "你好世界");
    }

    #[tokio::test]
    async fn test_dismiss_from_idle_is_noop() {
        let orchestrator = Harness::new().build(unused("local"), unused("remote"));
        let mut rx = orchestrator.transitions();
        let watcher = orchestrator.subscribe();

        orchestrator.dismiss();

        assert!(orchestrator.state().is_idle());
        assert!(drain(&mut rx).is_empty());
        assert!(!watcher.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_dismiss_after_completion() {
        let orchestrator = Harness::new().build(
            unused("local"),
            ScriptedBackend::chunks("remote", vec!["你好"]),
        );
        orchestrator.translate("hello").await;
        assert!(orchestrator.state().is_terminal());

        orchestrator.dismiss();

        assert!(orchestrator.state().is_idle());
    }

    #[tokio::test]
    async fn test_dismiss_mid_stream_stops_publishing() {
        let (tx, rx) = mpsc::unbounded_channel();
        let remote = ScriptedBackend::new("remote", Script::Channel(Mutex::new(Some(rx))));
        let orchestrator = Arc::new(Harness::new().build(unused("local"), remote));
        let mut watcher = orchestrator.subscribe();

        let running = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.translate("hello world").await }
        });

        tx.send("你".to_string()).unwrap();
        watcher
            .wait_for(|state| matches!(state, TranslationState::Streaming { .. }))
            .await
            .unwrap();

        orchestrator.dismiss();
        tx.send("好".to_string()).ok();
        drop(tx);
        running.await.unwrap();

        assert!(orchestrator.state().is_idle());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_dismiss_always_ends_idle() {
        for _ in 0..50 {
            let remote = ScriptedBackend::chunks("remote", vec!["x"; 200]);
            let orchestrator = Arc::new(Harness::new().build(unused("local"), remote));
            let mut watcher = orchestrator.subscribe();
            let mut rx = orchestrator.transitions();

            let running = tokio::spawn({
                let orchestrator = orchestrator.clone();
                async move { orchestrator.translate("hello world").await }
            });

            watcher
                .wait_for(|state| !state.is_idle())
                .await
                .unwrap();
            let dismissing = std::thread::spawn({
                let orchestrator = orchestrator.clone();
                move || orchestrator.dismiss()
            });
            dismissing.join().unwrap();
            running.await.unwrap();

            assert!(orchestrator.state().is_idle());
            let states = drain(&mut rx);
            assert_eq!(states.last(), Some(&TranslationState::Idle));
        }
    }

    #[tokio::test]
    async fn test_new_operation_overwrites_state() {
        let orchestrator = Harness::new().build(
            unused("local"),
            ScriptedBackend::chunks("remote", vec!["你好"]),
        );

        orchestrator.translate("").await;
        assert_eq!(error_message(&orchestrator.state()), "Empty text");

        orchestrator.translate("hello").await;
        assert!(matches!(
            orchestrator.state(),
            TranslationState::Completed { .. }
        ));
    }
}
