use std::fmt;

use crate::message::{StreamTarget, TurnMode};

/// Renderer-facing event for one response stream.
///
/// A turn produces `UserEcho`, one `*Start`, zero or more deltas of the same kind and
/// exactly one terminal (`*End` or `Error`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    UserEcho(String),
    AssistantStart,
    AssistantDelta(String),
    AssistantEnd,
    TranslationStart,
    TranslationDelta(String),
    TranslationEnd,
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Assistant,
    Translation,
}

impl From<&TurnMode> for ResponseKind {
    fn from(mode: &TurnMode) -> Self {
        match mode {
            TurnMode::Chat => Self::Assistant,
            TurnMode::Translate { .. } => Self::Translation,
        }
    }
}

impl StreamEvent {
    pub fn start(kind: ResponseKind) -> Self {
        match kind {
            ResponseKind::Assistant => Self::AssistantStart,
            ResponseKind::Translation => Self::TranslationStart,
        }
    }

    pub fn delta(kind: ResponseKind, text: impl Into<String>) -> Self {
        match kind {
            ResponseKind::Assistant => Self::AssistantDelta(text.into()),
            ResponseKind::Translation => Self::TranslationDelta(text.into()),
        }
    }

    pub fn end(kind: ResponseKind) -> Self {
        match kind {
            ResponseKind::Assistant => Self::AssistantEnd,
            ResponseKind::Translation => Self::TranslationEnd,
        }
    }

    /// `*End` and `Error` close a turn and release the session gate.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::AssistantEnd | Self::TranslationEnd | Self::Error(_)
        )
    }

    pub fn delta_text(&self) -> Option<&str> {
        match self {
            Self::AssistantDelta(text) | Self::TranslationDelta(text) => Some(text),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::UserEcho(_) => "user-echo",
            Self::AssistantStart => "assistant-start",
            Self::AssistantDelta(_) => "assistant-delta",
            Self::AssistantEnd => "assistant-end",
            Self::TranslationStart => "translation-start",
            Self::TranslationDelta(_) => "translation-delta",
            Self::TranslationEnd => "translation-end",
            Self::Error(_) => "error",
        }
    }
}

/// Event tagged with the turn that produced it, as carried from workers to the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnEvent {
    pub target: StreamTarget,
    pub event: StreamEvent,
}

/// Result of a `begin_turn` call that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Started(StreamTarget),
    /// Empty input; nothing was appended and the gate stayed idle.
    Skipped,
}

impl TurnOutcome {
    pub fn target(&self) -> Option<StreamTarget> {
        match self {
            Self::Started(target) => Some(*target),
            Self::Skipped => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingToggle {
    Started,
    Stopped(StreamTarget),
}

impl fmt::Display for StreamEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserEcho(text)
            | Self::AssistantDelta(text)
            | Self::TranslationDelta(text)
            | Self::Error(text) => write!(f, "{}({text})", self.kind_name()),
            _ => f.write_str(self.kind_name()),
        }
    }
}
