use std::path::PathBuf;

use transgpt_llm::{DEFAULT_OPENAI_MODEL, LOCAL_PROVIDER_ID, ProviderMessage, StreamRequest};

pub use transgpt_llm::{Role, SessionId, StreamTarget, TurnId};

pub const DEFAULT_TEMPERATURE: f64 = 0.5;
pub const DEFAULT_MAX_TOKENS: u64 = 4000;

/// One role-tagged turn of conversation history. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn to_provider(&self) -> ProviderMessage {
        ProviderMessage::new(self.role, self.content.clone())
    }
}

/// Backend a session sends its turns to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Remote { model_id: String },
    Local { model_path: PathBuf },
}

impl Backend {
    pub fn remote(model_id: impl Into<String>) -> Self {
        Self::Remote {
            model_id: model_id.into(),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local { .. })
    }

    /// Model identifier sent with the stream request.
    pub fn model_id(&self) -> &str {
        match self {
            Self::Remote { model_id } => model_id,
            Self::Local { .. } => LOCAL_PROVIDER_ID,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::Remote { model_id } => model_id.clone(),
            Self::Local { model_path } => format!("local model ({})", model_path.display()),
        }
    }
}

impl Default for Backend {
    fn default() -> Self {
        Self::remote(DEFAULT_OPENAI_MODEL)
    }
}

/// Model selector input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendChoice {
    Remote(String),
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f64,
    /// `None` leaves the output length to the backend.
    pub max_tokens: Option<u64>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: Some(DEFAULT_MAX_TOKENS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnMode {
    Chat,
    Translate {
        target_language: String,
        style: Option<String>,
    },
}

impl TurnMode {
    pub fn translate(target_language: impl Into<String>) -> Self {
        Self::Translate {
            target_language: target_language.into(),
            style: None,
        }
    }

    pub fn translate_with_style(
        target_language: impl Into<String>,
        style: impl Into<String>,
    ) -> Self {
        Self::Translate {
            target_language: target_language.into(),
            style: Some(style.into()),
        }
    }

    /// Translation requests are one-off and never become conversational context.
    pub fn persists_history(&self) -> bool {
        matches!(self, Self::Chat)
    }
}

pub fn translation_prompt(text: &str, target_language: &str, style: Option<&str>) -> String {
    match style.map(str::trim).filter(|style| !style.is_empty()) {
        Some(style) => format!(
            "Please translate the following sentence to {target_language}, use {style} translation style, \
             and give me translation outcome without anything else: {text}"
        ),
        None => format!(
            "Please translate the following sentence to {target_language}, \
             and give me translation outcome without anything else: {text}"
        ),
    }
}

/// Immutable snapshot driving exactly one completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnRequest {
    pub target: StreamTarget,
    pub mode: TurnMode,
    pub backend: Backend,
    pub messages: Vec<Message>,
    pub params: GenerationParams,
}

impl TurnRequest {
    pub fn to_stream_request(&self) -> StreamRequest {
        let messages = self.messages.iter().map(Message::to_provider).collect();
        let mut request = StreamRequest::new(self.target, self.backend.model_id(), messages)
            .with_temperature(self.params.temperature);
        if let Some(max_tokens) = self.params.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }
        request
    }
}
