//! Conversation sessions, turn dispatch and transcript rendering for TransGPT.
pub mod audio;
mod error;
mod events;
mod gate;
mod hub;
mod message;
mod session;
pub mod settings;
mod transcript;
mod worker;

pub use error::{CaptureError, ChatError};
pub use events::{RecordingToggle, ResponseKind, StreamEvent, TurnEvent, TurnOutcome};
pub use gate::{ControlSet, GateRejection, GateState, SyncGate};
pub use hub::{
    BackendResolver, ChatHub, DefaultBackends, HubConfig, VOICE_MESSAGE_ECHO, parse_max_tokens,
    parse_temperature,
};
pub use message::{
    Backend, BackendChoice, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, GenerationParams, Message,
    Role, SessionId, StreamTarget, TurnId, TurnMode, TurnRequest, translation_prompt,
};
pub use session::ConversationSession;
pub use settings::{Settings, SettingsError, SettingsStore};
pub use transcript::{
    ASSISTANT_LABEL, ERROR_LABEL, EntryTag, Transcript, TranscriptEntry, USER_LABEL,
    export_file_name,
};
