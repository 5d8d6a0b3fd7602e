use std::path::PathBuf;

use tokio::task::JoinHandle;
use transgpt_llm::AudioTask;

use crate::audio::ActiveCapture;
use crate::events::ResponseKind;
use crate::gate::{ControlSet, SyncGate};
use crate::message::{Backend, GenerationParams, Message, SessionId, StreamTarget};
use crate::transcript::Transcript;

/// Owner-side bookkeeping for the turn currently holding the gate.
pub(crate) struct ActiveTurn {
    pub(crate) target: StreamTarget,
    pub(crate) kind: ResponseKind,
    pub(crate) persist: bool,
    pub(crate) buffer: String,
    task: JoinHandle<()>,
}

impl ActiveTurn {
    pub(crate) fn new(
        target: StreamTarget,
        kind: ResponseKind,
        persist: bool,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            target,
            kind,
            persist,
            buffer: String::new(),
            task,
        }
    }

    pub(crate) fn abort(&self) {
        self.task.abort();
    }
}

/// One chat tab: history, backend choice, parameters, gate, capture and transcript.
pub struct ConversationSession {
    id: SessionId,
    title: String,
    pub(crate) messages: Vec<Message>,
    pub(crate) backend: Backend,
    pub(crate) params: GenerationParams,
    pub(crate) local_model_path: Option<PathBuf>,
    pub(crate) gate: SyncGate,
    pub(crate) transcript: Transcript,
    pub(crate) active_turn: Option<ActiveTurn>,
    pub(crate) capture: Option<ActiveCapture>,
}

impl ConversationSession {
    pub(crate) fn new(
        id: SessionId,
        title: String,
        backend: Backend,
        params: GenerationParams,
        local_model_path: Option<PathBuf>,
    ) -> Self {
        Self {
            id,
            title,
            messages: Vec::new(),
            backend,
            params,
            local_model_path,
            gate: SyncGate::new(),
            transcript: Transcript::new(),
            active_turn: None,
            capture: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn params(&self) -> GenerationParams {
        self.params
    }

    pub fn gate(&self) -> &SyncGate {
        &self.gate
    }

    pub fn controls(&self) -> ControlSet {
        self.gate.controls()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn is_busy(&self) -> bool {
        self.gate.is_busy()
    }

    pub fn recording(&self) -> Option<AudioTask> {
        self.capture.as_ref().map(ActiveCapture::task)
    }

    /// Stops the in-flight worker and any capture. Their later events are discarded.
    pub(crate) fn shutdown(&mut self) {
        if let Some(turn) = self.active_turn.take() {
            tracing::debug!(
                session_id = %self.id,
                turn_id = %turn.target.turn_id,
                "aborting in-flight turn"
            );
            turn.abort();
        }
        if let Some(capture) = self.capture.take() {
            capture.abandon();
        }
    }
}
