use std::path::Path;

use serde::Deserialize;
use snafu::{ResultExt, ensure};

use super::provider::{
    BoxFuture, MissingApiKeySnafu, ProviderConfig, ProviderResult, ReadAudioSnafu,
    TranscriptionRequestSnafu, TranscriptionStatusSnafu,
};

pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

/// Which audio endpoint a recording is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioTask {
    /// Speech to text in the spoken language.
    Transcribe,
    /// Speech to English text.
    Translate,
}

impl AudioTask {
    fn path_segment(self) -> &'static str {
        match self {
            Self::Transcribe => "transcriptions",
            Self::Translate => "translations",
        }
    }
}

pub trait AudioTranscriber: Send + Sync {
    fn transcribe<'a>(
        &'a self,
        audio_path: &'a Path,
        task: AudioTask,
    ) -> BoxFuture<'a, ProviderResult<String>>;
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// OpenAI-compatible speech client for the transcription and translation endpoints.
pub struct WhisperClient {
    client: reqwest::Client,
    config: ProviderConfig,
    model: String,
}

impl WhisperClient {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        ensure!(
            !config.api_key.is_empty(),
            MissingApiKeySnafu {
                stage: "whisper-client-new",
                provider_id: config.provider_id.clone(),
            }
        );

        Ok(Self {
            client: reqwest::Client::new(),
            config,
            model: DEFAULT_TRANSCRIPTION_MODEL.to_string(),
        })
    }

    fn endpoint_for(&self, task: AudioTask) -> String {
        format!(
            "{}/audio/{}",
            self.config.endpoint.trim_end_matches('/'),
            task.path_segment()
        )
    }

    async fn send(&self, audio_path: &Path, task: AudioTask) -> ProviderResult<String> {
        let bytes = tokio::fs::read(audio_path).await.context(ReadAudioSnafu {
            stage: "read-audio-file",
            path: audio_path.to_path_buf(),
        })?;

        let file_name = audio_path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("recorded_audio.wav")
            .to_string();
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("audio/wav")
            .context(TranscriptionRequestSnafu {
                stage: "build-audio-part",
            })?;
        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .part("file", part);

        let url = self.endpoint_for(task);
        tracing::debug!(url = %url, task = ?task, "sending audio for transcription");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await
            .context(TranscriptionRequestSnafu {
                stage: "send-audio-request",
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return TranscriptionStatusSnafu {
                stage: "audio-http-status",
                status: status.as_u16(),
                body,
            }
            .fail();
        }

        let payload: TranscriptionResponse =
            response.json().await.context(TranscriptionRequestSnafu {
                stage: "parse-audio-response",
            })?;
        Ok(payload.text)
    }
}

impl AudioTranscriber for WhisperClient {
    fn transcribe<'a>(
        &'a self,
        audio_path: &'a Path,
        task: AudioTask,
    ) -> BoxFuture<'a, ProviderResult<String>> {
        Box::pin(self.send(audio_path, task))
    }
}
