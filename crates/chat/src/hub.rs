use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use snafu::{OptionExt, ResultExt, ensure};
use tokio::sync::mpsc;
use transgpt_llm::{
    AudioTask, AudioTranscriber, CompletionSource, LocalGenerationParams, LocalModelConfig,
    ModelCatalog, ProviderError, ProviderResult, create_local_source,
};

use crate::audio::{self, AudioFormat, AudioInput};
use crate::error::{
    AudioUnavailableSnafu, BackendUnavailableSnafu, CaptureAlreadyActiveSnafu, CaptureSnafu,
    ChatError, EmptyRecordingSnafu, ExportSnafu, InvalidModelPathSnafu, InvalidParameterSnafu,
    RecordingActiveSnafu, SessionNotFoundSnafu, TurnInFlightSnafu, UnknownModelSnafu,
};
use crate::events::{RecordingToggle, ResponseKind, StreamEvent, TurnEvent, TurnOutcome};
use crate::message::{
    Backend, BackendChoice, GenerationParams, Message, SessionId, StreamTarget, TurnId, TurnMode,
    TurnRequest, translation_prompt,
};
use crate::session::{ActiveTurn, ConversationSession};
use crate::settings::Settings;
use crate::worker;

pub const VOICE_MESSAGE_ECHO: &str = "You sent a voice message";

/// Maps a session's backend choice to a ready completion source.
pub trait BackendResolver: Send + Sync {
    fn resolve(&self, backend: &Backend) -> ProviderResult<Arc<dyn CompletionSource>>;
}

/// Resolver for the shipped backends: one shared remote source, local runners built per turn.
pub struct DefaultBackends {
    remote: Option<Arc<dyn CompletionSource>>,
    local_runner: PathBuf,
    local_params: LocalGenerationParams,
}

impl DefaultBackends {
    pub fn new(
        remote: Option<Arc<dyn CompletionSource>>,
        local_runner: impl Into<PathBuf>,
        local_params: LocalGenerationParams,
    ) -> Self {
        Self {
            remote,
            local_runner: local_runner.into(),
            local_params,
        }
    }
}

impl BackendResolver for DefaultBackends {
    fn resolve(&self, backend: &Backend) -> ProviderResult<Arc<dyn CompletionSource>> {
        match backend {
            Backend::Remote { .. } => {
                self.remote
                    .clone()
                    .ok_or_else(|| ProviderError::MissingApiKey {
                        stage: "resolve-remote-backend",
                        provider_id: "openai".to_string(),
                    })
            }
            Backend::Local { model_path } => create_local_source(
                LocalModelConfig::new(model_path.clone())
                    .with_runner(self.local_runner.clone())
                    .with_params(self.local_params.clone()),
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub catalog: ModelCatalog,
    pub params: GenerationParams,
    pub local_model_path: Option<PathBuf>,
    pub audio_format: AudioFormat,
    pub records_dir: PathBuf,
    pub stream_idle_timeout: Option<Duration>,
}

impl HubConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            catalog: settings.model_catalog(),
            params: settings.generation_params(),
            local_model_path: settings.local.model_path.clone(),
            audio_format: settings.audio.format(),
            records_dir: settings.audio.records_dir.clone(),
            stream_idle_timeout: settings.stream_idle_timeout(),
        }
    }

    pub fn default_backend(&self) -> Backend {
        Backend::remote(self.catalog.default_model())
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Owns every session and applies worker events to them in arrival order.
///
/// All mutation happens on the task that owns the hub. Workers only send
/// `TurnEvent`s, which `next_event` applies one at a time.
pub struct ChatHub {
    config: HubConfig,
    backends: Arc<dyn BackendResolver>,
    transcriber: Option<Arc<dyn AudioTranscriber>>,
    audio_input: Option<Arc<dyn AudioInput>>,
    sessions: BTreeMap<SessionId, ConversationSession>,
    next_session_id: u64,
    next_turn_id: u64,
    event_tx: mpsc::UnboundedSender<TurnEvent>,
    event_rx: mpsc::UnboundedReceiver<TurnEvent>,
}

impl ChatHub {
    pub fn new(config: HubConfig, backends: Arc<dyn BackendResolver>) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            config,
            backends,
            transcriber: None,
            audio_input: None,
            sessions: BTreeMap::new(),
            next_session_id: 1,
            next_turn_id: 1,
            event_tx,
            event_rx,
        }
    }

    pub fn with_transcriber(mut self, transcriber: Arc<dyn AudioTranscriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    pub fn with_audio_input(mut self, audio_input: Arc<dyn AudioInput>) -> Self {
        self.audio_input = Some(audio_input);
        self
    }

    pub fn available_models(&self) -> &ModelCatalog {
        &self.config.catalog
    }

    pub fn open_session(&mut self) -> SessionId {
        let id = SessionId::new(self.next_session_id);
        self.next_session_id += 1;

        let session = ConversationSession::new(
            id,
            format!("Chat {id}"),
            self.config.default_backend(),
            self.config.params,
            self.config.local_model_path.clone(),
        );
        self.sessions.insert(id, session);
        tracing::info!(session_id = %id, "session opened");
        id
    }

    /// Removes the session, aborting its worker. Returns the number of sessions left.
    pub fn close_session(&mut self, id: SessionId) -> Result<usize, ChatError> {
        let mut session = self.sessions.remove(&id).context(SessionNotFoundSnafu {
            stage: "close-session",
            session_id: id,
        })?;
        session.shutdown();
        tracing::info!(session_id = %id, remaining = self.sessions.len(), "session closed");
        Ok(self.sessions.len())
    }

    pub fn session(&self, id: SessionId) -> Option<&ConversationSession> {
        self.sessions.get(&id)
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    /// Validates the input, engages the gate and spawns the turn worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn begin_turn(
        &mut self,
        id: SessionId,
        user_text: &str,
        mode: TurnMode,
    ) -> Result<TurnOutcome, ChatError> {
        let session = self.session_ref(id, "begin-turn")?;
        if user_text.trim().is_empty() {
            tracing::debug!(session_id = %id, "empty input ignored");
            return Ok(TurnOutcome::Skipped);
        }
        if let TurnMode::Translate { target_language, .. } = &mode {
            ensure!(
                !target_language.trim().is_empty(),
                InvalidParameterSnafu {
                    stage: "begin-turn",
                    name: "target_language",
                    value: target_language.clone(),
                    reason: "a target language is required",
                }
            );
        }
        Self::ensure_idle(session, "begin-turn")?;
        if session.capture.is_some() {
            return RecordingActiveSnafu {
                stage: "begin-turn",
                session_id: id,
            }
            .fail();
        }

        let backend = session.backend.clone();
        let source = self.resolve_or_revert(id, &backend)?;

        let target = self.allocate_target(id);
        let kind = ResponseKind::from(&mode);
        let persist = mode.persists_history();
        let event_tx = self.event_tx.clone();
        let idle_timeout = self.config.stream_idle_timeout;
        let session = self.session_mut(id, "begin-turn")?;

        if persist {
            session.messages.push(Message::user(user_text));
        }
        let messages = match &mode {
            TurnMode::Chat => session.messages.clone(),
            TurnMode::Translate {
                target_language,
                style,
            } => vec![Message::user(translation_prompt(
                user_text,
                target_language,
                style.as_deref(),
            ))],
        };
        let request = TurnRequest {
            target,
            mode,
            backend,
            messages,
            params: session.params,
        };

        Self::engage(session, target, user_text, &event_tx);
        tracing::info!(
            session_id = %id,
            turn_id = %target.turn_id,
            backend = %request.backend.label(),
            kind = ?kind,
            history_len = session.messages.len(),
            "turn started"
        );

        let task = tokio::spawn(worker::run_completion_turn(
            source,
            request,
            event_tx,
            idle_timeout,
        ));
        session.active_turn = Some(ActiveTurn::new(target, kind, persist, task));
        Ok(TurnOutcome::Started(target))
    }

    /// Waits for the next worker event and applies it to its session.
    ///
    /// Events for closed sessions or superseded turns are dropped without being
    /// returned. Pending forever while no turn is in flight.
    pub async fn next_event(&mut self) -> Option<(SessionId, StreamEvent)> {
        loop {
            let turn_event = self.event_rx.recv().await?;
            if let Some(applied) = self.apply_event(turn_event) {
                return Some(applied);
            }
        }
    }

    /// Applies worker events until the session's gate is idle again.
    pub async fn drain_session(&mut self, id: SessionId) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while self.session(id).is_some_and(ConversationSession::is_busy) {
            match self.next_event().await {
                Some((session_id, event)) if session_id == id => events.push(event),
                Some(_) => {}
                None => break,
            }
        }
        events
    }

    pub fn select_backend(&mut self, id: SessionId, choice: BackendChoice) -> Result<(), ChatError> {
        let session = self.session_ref(id, "select-backend")?;
        Self::ensure_idle(session, "select-backend")?;

        let backend = match choice {
            BackendChoice::Remote(model_id) => {
                let model_id = model_id.trim().to_string();
                if !self.config.catalog.contains(&model_id) {
                    return UnknownModelSnafu {
                        stage: "select-backend",
                        model_id,
                    }
                    .fail();
                }
                Backend::Remote { model_id }
            }
            BackendChoice::Local => match session.local_model_path.clone() {
                Some(model_path) => {
                    let backend = Backend::Local { model_path };
                    self.resolve_or_revert(id, &backend)?;
                    backend
                }
                None => {
                    let fallback = self.config.default_backend();
                    self.session_mut(id, "select-backend")?.backend = fallback;
                    return Err(ChatError::BackendUnavailable {
                        stage: "select-backend",
                        backend: "local model".to_string(),
                        source: ProviderError::LocalModelNotLoaded {
                            stage: "select-local-backend",
                        },
                    });
                }
            },
        };

        tracing::info!(session_id = %id, backend = %backend.label(), "backend selected");
        self.session_mut(id, "select-backend")?.backend = backend;
        Ok(())
    }

    pub fn load_local_model(&mut self, id: SessionId, path: &Path) -> Result<(), ChatError> {
        let session = self.session_ref(id, "load-local-model")?;
        Self::ensure_idle(session, "load-local-model")?;
        if !path.is_file() {
            return InvalidModelPathSnafu {
                stage: "load-local-model",
                path: path.to_path_buf(),
            }
            .fail();
        }

        let session = self.session_mut(id, "load-local-model")?;
        session.local_model_path = Some(path.to_path_buf());
        if session.backend.is_local() {
            session.backend = Backend::Local {
                model_path: path.to_path_buf(),
            };
        }
        tracing::info!(session_id = %id, path = %path.display(), "local model loaded");
        Ok(())
    }

    pub fn set_temperature(&mut self, id: SessionId, raw: &str) -> Result<f64, ChatError> {
        let temperature = parse_temperature(raw)?;
        self.session_mut(id, "set-temperature")?.params.temperature = temperature;
        Ok(temperature)
    }

    /// Zero clears the limit.
    pub fn set_max_tokens(&mut self, id: SessionId, raw: &str) -> Result<Option<u64>, ChatError> {
        let max_tokens = parse_max_tokens(raw)?;
        self.session_mut(id, "set-max-tokens")?.params.max_tokens = max_tokens;
        Ok(max_tokens)
    }

    pub fn clear(&mut self, id: SessionId) -> Result<(), ChatError> {
        let session = self.session_mut(id, "clear-session")?;
        Self::ensure_idle(session, "clear-session")?;
        session.messages.clear();
        session.transcript.clear();
        tracing::info!(session_id = %id, "session cleared");
        Ok(())
    }

    pub fn export(&self, id: SessionId, dir: &Path) -> Result<PathBuf, ChatError> {
        let session = self.session_ref(id, "export-transcript")?;
        Self::ensure_idle(session, "export-transcript")?;

        let contents = session.transcript.as_plain_text();
        let path = crate::transcript::write_export(dir, &contents, Local::now()).context(
            ExportSnafu {
                stage: "export-transcript",
                path: dir.to_path_buf(),
            },
        )?;
        tracing::info!(session_id = %id, path = %path.display(), "transcript exported");
        Ok(path)
    }

    /// Starts a capture, or stops the active one and sends the clip to the transcriber.
    pub async fn toggle_recording(
        &mut self,
        id: SessionId,
        task: AudioTask,
    ) -> Result<RecordingToggle, ChatError> {
        let recording = self.session_ref(id, "toggle-recording")?.recording();
        match recording {
            None => {
                self.start_recording(id, task)?;
                Ok(RecordingToggle::Started)
            }
            Some(active) if active != task => CaptureAlreadyActiveSnafu {
                stage: "toggle-recording",
                session_id: id,
                active,
            }
            .fail(),
            Some(_) => {
                let target = self.stop_recording(id, task).await?;
                Ok(RecordingToggle::Stopped(target))
            }
        }
    }

    fn start_recording(&mut self, id: SessionId, task: AudioTask) -> Result<(), ChatError> {
        let session = self.session_ref(id, "start-recording")?;
        Self::ensure_idle(session, "start-recording")?;
        if self.transcriber.is_none() {
            return AudioUnavailableSnafu {
                stage: "start-recording",
                details: "no transcription backend configured",
            }
            .fail();
        }
        let input = self.audio_input.clone().context(AudioUnavailableSnafu {
            stage: "start-recording",
            details: "no audio input configured",
        })?;

        let capture = audio::start_capture(input.as_ref(), self.config.audio_format, task)
            .context(CaptureSnafu {
                stage: "start-recording",
            })?;
        self.session_mut(id, "start-recording")?.capture = Some(capture);
        tracing::info!(session_id = %id, task = ?task, "recording started");
        Ok(())
    }

    async fn stop_recording(
        &mut self,
        id: SessionId,
        task: AudioTask,
    ) -> Result<StreamTarget, ChatError> {
        let records_dir = self.config.records_dir.clone();
        let session = self.session_mut(id, "stop-recording")?;
        let Some(capture) = session.capture.take() else {
            return AudioUnavailableSnafu {
                stage: "stop-recording",
                details: "no recording in progress",
            }
            .fail();
        };

        let clip = capture.finish().await.context(CaptureSnafu {
            stage: "stop-recording",
        })?;
        if clip.is_empty() {
            return EmptyRecordingSnafu {
                stage: "stop-recording",
            }
            .fail();
        }
        let clip_path = audio::persist_wav(&clip, &records_dir).context(CaptureSnafu {
            stage: "persist-recording",
        })?;

        let transcriber = self.transcriber.clone().context(AudioUnavailableSnafu {
            stage: "stop-recording",
            details: "no transcription backend configured",
        })?;
        let target = self.allocate_target(id);
        let event_tx = self.event_tx.clone();
        let session = self.session_mut(id, "stop-recording")?;
        Self::engage(session, target, VOICE_MESSAGE_ECHO, &event_tx);
        tracing::info!(
            session_id = %id,
            turn_id = %target.turn_id,
            task = ?task,
            clip = %clip_path.display(),
            "audio turn started"
        );

        let worker_task = tokio::spawn(worker::run_audio_turn(
            transcriber,
            clip_path,
            task,
            target,
            event_tx,
        ));
        session.active_turn = Some(ActiveTurn::new(
            target,
            ResponseKind::Translation,
            false,
            worker_task,
        ));
        Ok(target)
    }

    fn apply_event(&mut self, turn_event: TurnEvent) -> Option<(SessionId, StreamEvent)> {
        let TurnEvent { target, event } = turn_event;
        let Some(session) = self.sessions.get_mut(&target.session_id) else {
            tracing::debug!(
                session_id = %target.session_id,
                turn_id = %target.turn_id,
                event = event.kind_name(),
                "dropping event for closed session"
            );
            return None;
        };

        let Some(active) = session
            .active_turn
            .as_mut()
            .filter(|active| active.target == target)
        else {
            tracing::debug!(
                session_id = %target.session_id,
                turn_id = %target.turn_id,
                event = event.kind_name(),
                "dropping stale event"
            );
            return None;
        };

        if let Some(text) = event.delta_text() {
            active.buffer.push_str(text);
        }
        session.transcript.apply(&event);

        if event.is_terminal() {
            if let Some(turn) = session.active_turn.take() {
                if turn.persist && !matches!(event, StreamEvent::Error(_)) {
                    session.messages.push(Message::assistant(turn.buffer));
                }
                tracing::info!(
                    session_id = %target.session_id,
                    turn_id = %target.turn_id,
                    kind = ?turn.kind,
                    outcome = event.kind_name(),
                    "turn finished"
                );
            }
            if let Err(rejection) = session.gate.release(target) {
                tracing::error!(
                    session_id = %target.session_id,
                    turn_id = %target.turn_id,
                    rejection = ?rejection,
                    "gate release rejected"
                );
            }
        }

        Some((target.session_id, event))
    }

    /// Idle→Busy plus the user echo. Callers have already checked the gate is idle.
    fn engage(
        session: &mut ConversationSession,
        target: StreamTarget,
        echo: &str,
        event_tx: &mpsc::UnboundedSender<TurnEvent>,
    ) {
        if let Err(rejection) = session.gate.acquire(target) {
            tracing::error!(
                session_id = %target.session_id,
                turn_id = %target.turn_id,
                rejection = ?rejection,
                "gate acquire rejected"
            );
        }
        // The echo goes through the channel so it precedes every worker event.
        let _ = event_tx.send(TurnEvent {
            target,
            event: StreamEvent::UserEcho(echo.to_string()),
        });
    }

    fn resolve_or_revert(
        &mut self,
        id: SessionId,
        backend: &Backend,
    ) -> Result<Arc<dyn CompletionSource>, ChatError> {
        match self.backends.resolve(backend) {
            Ok(source) => Ok(source),
            Err(source) => {
                let fallback = self.config.default_backend();
                tracing::warn!(
                    session_id = %id,
                    backend = %backend.label(),
                    fallback = %fallback.label(),
                    error = %source,
                    "backend unavailable, reverting to default"
                );
                if let Some(session) = self.sessions.get_mut(&id) {
                    session.backend = fallback;
                }
                Err(source).context(BackendUnavailableSnafu {
                    stage: "resolve-backend",
                    backend: backend.label(),
                })
            }
        }
    }

    fn allocate_target(&mut self, id: SessionId) -> StreamTarget {
        let turn_id = TurnId::new(self.next_turn_id);
        self.next_turn_id += 1;
        StreamTarget::new(id, turn_id)
    }

    fn ensure_idle(session: &ConversationSession, stage: &'static str) -> Result<(), ChatError> {
        match session.gate.active_target() {
            Some(active) => TurnInFlightSnafu {
                stage,
                session_id: session.id(),
                active,
            }
            .fail(),
            None => Ok(()),
        }
    }

    fn session_ref(
        &self,
        id: SessionId,
        stage: &'static str,
    ) -> Result<&ConversationSession, ChatError> {
        self.sessions.get(&id).context(SessionNotFoundSnafu {
            stage,
            session_id: id,
        })
    }

    fn session_mut(
        &mut self,
        id: SessionId,
        stage: &'static str,
    ) -> Result<&mut ConversationSession, ChatError> {
        self.sessions.get_mut(&id).context(SessionNotFoundSnafu {
            stage,
            session_id: id,
        })
    }
}

pub fn parse_temperature(raw: &str) -> Result<f64, ChatError> {
    let value = raw.trim();
    match value.parse::<f64>() {
        Ok(temperature) if temperature.is_finite() && temperature >= 0.0 => Ok(temperature),
        Ok(_) => InvalidParameterSnafu {
            stage: "parse-temperature",
            name: "temperature",
            value,
            reason: "must be a non-negative number",
        }
        .fail(),
        Err(error) => InvalidParameterSnafu {
            stage: "parse-temperature",
            name: "temperature",
            value,
            reason: error.to_string(),
        }
        .fail(),
    }
}

pub fn parse_max_tokens(raw: &str) -> Result<Option<u64>, ChatError> {
    let value = raw.trim();
    match value.parse::<u64>() {
        Ok(0) => Ok(None),
        Ok(max_tokens) => Ok(Some(max_tokens)),
        Err(error) => InvalidParameterSnafu {
            stage: "parse-max-tokens",
            name: "max tokens",
            value,
            reason: error.to_string(),
        }
        .fail(),
    }
}
