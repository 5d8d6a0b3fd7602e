//! Completion sources and speech clients used by the chat pipeline.
use std::sync::Arc;

mod local_adapter;
mod model;
mod provider;
mod rig_adapter;
mod transcription;

pub use local_adapter::{
    DEFAULT_LOCAL_RUNNER, LOCAL_PROVIDER_ID, LocalGenerationParams, LocalModelAdapter,
    LocalModelConfig,
};
pub use model::{
    DEFAULT_OPENAI_MODEL, Model, ModelCatalog, ModelCatalogSource, default_openai_models,
};
pub use provider::{
    BoxFuture, CompletionSource, ProviderConfig, ProviderError, ProviderEventStream,
    ProviderMessage, ProviderResult, ProviderStreamHandle, ProviderWorker, Role, SessionId,
    StreamEventMapped, StreamEventPayload, StreamRequest, StreamTarget, TurnId,
    make_event_stream,
};
pub use rig_adapter::{RIG_OPENAI_PROVIDER_ID, RigProviderAdapter};
pub use transcription::{AudioTask, AudioTranscriber, DEFAULT_TRANSCRIPTION_MODEL, WhisperClient};

pub fn create_remote_source(
    mut config: ProviderConfig,
) -> ProviderResult<Arc<dyn CompletionSource>> {
    if config.provider_id.trim().is_empty() {
        config.provider_id = RIG_OPENAI_PROVIDER_ID.to_string();
    }

    match config.provider_id.as_str() {
        "openai" | "rig-openai" => {
            config.provider_id = RIG_OPENAI_PROVIDER_ID.to_string();
            Ok(Arc::new(RigProviderAdapter::new(config)?))
        }
        _ => Err(ProviderError::UnsupportedProvider {
            stage: "create-remote-source",
            provider_id: config.provider_id,
        }),
    }
}

pub fn create_local_source(config: LocalModelConfig) -> ProviderResult<Arc<dyn CompletionSource>> {
    Ok(Arc::new(LocalModelAdapter::new(config)?))
}
