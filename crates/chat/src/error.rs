use std::path::PathBuf;

use snafu::Snafu;
use transgpt_llm::{AudioTask, ProviderError};

use crate::message::{SessionId, StreamTarget};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CaptureError {
    #[snafu(display("[{stage}] audio input unavailable: {details}"))]
    OpenInput { stage: &'static str, details: String },
    #[snafu(display("[{stage}] capture worker did not finish: {source}"))]
    JoinCapture {
        stage: &'static str,
        source: tokio::task::JoinError,
    },
    #[snafu(display("[{stage}] failed to create records dir {}: {source}", path.display()))]
    CreateRecordsDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("[{stage}] failed to write recording {}: {source}", path.display()))]
    WriteWav {
        stage: &'static str,
        path: PathBuf,
        source: hound::Error,
    },
    #[snafu(display("[{stage}] failed to read recording {}: {source}", path.display()))]
    ReadWav {
        stage: &'static str,
        path: PathBuf,
        source: hound::Error,
    },
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ChatError {
    #[snafu(display("[{stage}] session {session_id} does not exist"))]
    SessionNotFound {
        stage: &'static str,
        session_id: SessionId,
    },
    #[snafu(display(
        "[{stage}] session {session_id} is still streaming turn {}",
        active.turn_id
    ))]
    TurnInFlight {
        stage: &'static str,
        session_id: SessionId,
        active: StreamTarget,
    },
    #[snafu(display("[{stage}] session {session_id} is recording"))]
    RecordingActive {
        stage: &'static str,
        session_id: SessionId,
    },
    #[snafu(display("[{stage}] session {session_id} is already recording for {active:?}"))]
    CaptureAlreadyActive {
        stage: &'static str,
        session_id: SessionId,
        active: AudioTask,
    },
    #[snafu(display("[{stage}] backend {backend} is unavailable: {source}"))]
    BackendUnavailable {
        stage: &'static str,
        backend: String,
        source: ProviderError,
    },
    #[snafu(display("[{stage}] {details}"))]
    AudioUnavailable { stage: &'static str, details: String },
    #[snafu(display("[{stage}] invalid {name} `{value}`: {reason}"))]
    InvalidParameter {
        stage: &'static str,
        name: &'static str,
        value: String,
        reason: String,
    },
    #[snafu(display("[{stage}] unknown model `{model_id}`"))]
    UnknownModel {
        stage: &'static str,
        model_id: String,
    },
    #[snafu(display("[{stage}] model file {} not found", path.display()))]
    InvalidModelPath { stage: &'static str, path: PathBuf },
    #[snafu(display("[{stage}] recording captured no audio"))]
    EmptyRecording { stage: &'static str },
    #[snafu(display("[{stage}] {source}"))]
    Capture {
        stage: &'static str,
        source: CaptureError,
    },
    #[snafu(display("[{stage}] failed to export transcript to {}: {source}", path.display()))]
    Export {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}

impl ChatError {
    /// Input was rejected before any state changed.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidParameter { .. }
                | Self::UnknownModel { .. }
                | Self::InvalidModelPath { .. }
                | Self::EmptyRecording { .. }
        )
    }

    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            Self::TurnInFlight { .. } | Self::RecordingActive { .. } | Self::CaptureAlreadyActive { .. }
        )
    }

    pub fn is_backend_unavailable(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable { .. } | Self::AudioUnavailable { .. }
        )
    }
}
