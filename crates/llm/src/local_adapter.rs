use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use snafu::ensure;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

use super::provider::{
    CompletionSource, EmptyMessageSetSnafu, LocalModelMissingSnafu, LocalModelNotLoadedSnafu,
    ProviderError, ProviderMessage, ProviderResult, ProviderStreamHandle, ProviderWorker, Role,
    StreamEventMapped, StreamEventPayload, StreamRequest, emit_error_event, make_event_stream,
};

pub const LOCAL_PROVIDER_ID: &str = "local";
pub const DEFAULT_LOCAL_RUNNER: &str = "llama-cli";

const READ_CHUNK_BYTES: usize = 512;
const STDERR_TAIL_LINES: usize = 8;

/// Sampling parameters handed to the local runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalGenerationParams {
    pub max_length: u32,
    pub max_context_length: u32,
    pub top_k: u32,
    pub top_p: f64,
    pub temperature: f64,
    pub repetition_penalty: f64,
}

impl Default for LocalGenerationParams {
    fn default() -> Self {
        Self {
            max_length: 2048,
            max_context_length: 512,
            top_k: 0,
            top_p: 0.7,
            temperature: 0.95,
            repetition_penalty: 1.0,
        }
    }
}

impl LocalGenerationParams {
    /// Sampling is only enabled for a positive temperature; otherwise decoding is greedy.
    pub fn do_sample(&self) -> bool {
        self.temperature > 0.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalModelConfig {
    pub model_path: PathBuf,
    pub runner: PathBuf,
    pub params: LocalGenerationParams,
}

impl LocalModelConfig {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            runner: PathBuf::from(DEFAULT_LOCAL_RUNNER),
            params: LocalGenerationParams::default(),
        }
    }

    pub fn with_runner(mut self, runner: impl Into<PathBuf>) -> Self {
        self.runner = runner.into();
        self
    }

    pub fn with_params(mut self, params: LocalGenerationParams) -> Self {
        self.params = params;
        self
    }
}

/// Completion source that drives a llama.cpp-compatible runner against a model file on disk.
pub struct LocalModelAdapter {
    config: LocalModelConfig,
}

impl LocalModelAdapter {
    pub fn new(config: LocalModelConfig) -> ProviderResult<Self> {
        ensure!(
            !config.model_path.as_os_str().is_empty(),
            LocalModelNotLoadedSnafu {
                stage: "local-adapter-new",
            }
        );
        ensure!(
            config.model_path.is_file(),
            LocalModelMissingSnafu {
                stage: "local-adapter-new",
                path: config.model_path.clone(),
            }
        );

        Ok(Self { config })
    }

    /// Renders role-tagged history into a single chat-formatted prompt ending on the assistant tag.
    pub fn build_prompt(messages: &[ProviderMessage]) -> String {
        let mut prompt = String::new();
        for message in messages {
            let tag = match message.role {
                Role::System => "<|system|>",
                Role::User => "<|user|>",
                Role::Assistant => "<|assistant|>",
            };
            prompt.push_str(tag);
            prompt.push('\n');
            prompt.push_str(message.content.trim_end());
            prompt.push('\n');
        }
        prompt.push_str("<|assistant|>\n");
        prompt
    }

    fn effective_params(&self, request: &StreamRequest) -> LocalGenerationParams {
        let mut params = self.config.params.clone();
        if let Some(temperature) = request.temperature {
            params.temperature = temperature.max(0.0);
        }
        params
    }

    fn runner_args(
        config: &LocalModelConfig,
        params: &LocalGenerationParams,
        prompt: String,
    ) -> Vec<OsString> {
        let temperature = if params.do_sample() {
            params.temperature
        } else {
            0.0
        };

        vec![
            "-m".into(),
            config.model_path.clone().into_os_string(),
            "-p".into(),
            prompt.into(),
            "-n".into(),
            params.max_length.to_string().into(),
            "-c".into(),
            params.max_context_length.to_string().into(),
            "--top-k".into(),
            params.top_k.to_string().into(),
            "--top-p".into(),
            params.top_p.to_string().into(),
            "--temp".into(),
            temperature.to_string().into(),
            "--repeat-penalty".into(),
            params.repetition_penalty.to_string().into(),
            "--no-display-prompt".into(),
            "-no-cnv".into(),
        ]
    }

    async fn run_runner_worker(
        config: LocalModelConfig,
        args: Vec<OsString>,
        target: crate::provider::StreamTarget,
        event_tx: mpsc::UnboundedSender<StreamEventMapped>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let mut command = Command::new(&config.runner);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                tracing::error!(
                    session_id = %target.session_id,
                    turn_id = %target.turn_id,
                    runner = ?config.runner,
                    error = %source,
                    "failed to spawn local runner"
                );
                let error = ProviderError::SpawnRunner {
                    stage: "spawn-runner",
                    runner: config.runner.clone(),
                    source,
                };
                emit_error_event(&event_tx, target, error);
                return;
            }
        };

        let (Some(mut stdout), stderr) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.start_kill();
            let error = ProviderError::RunnerIo {
                stage: "take-runner-stdout",
                source: std::io::Error::other("runner stdout was not captured"),
            };
            emit_error_event(&event_tx, target, error);
            return;
        };

        let stderr_task = tokio::spawn(async move {
            let mut text = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut text).await;
            }
            text
        });

        let mut decoder = Utf8ChunkDecoder::default();
        let mut buffer = [0u8; READ_CHUNK_BYTES];

        loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    tracing::debug!(session_id = %target.session_id, turn_id = %target.turn_id, "local runner cancelled");
                    let _ = child.start_kill();
                    stderr_task.abort();
                    return;
                }
                read = stdout.read(&mut buffer) => {
                    match read {
                        Ok(0) => break,
                        Ok(count) => {
                            let text = decoder.push(&buffer[..count]);
                            if text.is_empty() {
                                continue;
                            }
                            let event = StreamEventMapped {
                                target,
                                payload: StreamEventPayload::Delta(text),
                            };
                            if event_tx.send(event).is_err() {
                                let _ = child.start_kill();
                                stderr_task.abort();
                                return;
                            }
                        }
                        Err(source) => {
                            let _ = child.start_kill();
                            stderr_task.abort();
                            let error = ProviderError::RunnerIo {
                                stage: "read-runner-stdout",
                                source,
                            };
                            emit_error_event(&event_tx, target, error);
                            return;
                        }
                    }
                }
            }
        }

        let tail = decoder.finish();
        if !tail.is_empty() {
            let _ = event_tx.send(StreamEventMapped {
                target,
                payload: StreamEventPayload::Delta(tail),
            });
        }

        let status = match child.wait().await {
            Ok(status) => status,
            Err(source) => {
                let error = ProviderError::RunnerIo {
                    stage: "wait-runner",
                    source,
                };
                emit_error_event(&event_tx, target, error);
                return;
            }
        };
        let stderr_text = stderr_task.await.unwrap_or_default();

        if !status.success() {
            tracing::warn!(
                session_id = %target.session_id,
                turn_id = %target.turn_id,
                status = %status,
                "local runner exited unsuccessfully"
            );
            let error = ProviderError::RunnerFailed {
                stage: "runner-exit-status",
                status: status.to_string(),
                stderr: stderr_tail(&stderr_text),
            };
            emit_error_event(&event_tx, target, error);
            return;
        }

        let _ = event_tx.send(StreamEventMapped {
            target,
            payload: StreamEventPayload::Done,
        });
    }
}

impl CompletionSource for LocalModelAdapter {
    fn id(&self) -> &str {
        LOCAL_PROVIDER_ID
    }

    fn name(&self) -> &str {
        "Local model"
    }

    fn stream_chat(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle> {
        ensure!(
            !request.messages.is_empty(),
            EmptyMessageSetSnafu {
                stage: "local-stream-chat",
                target: request.target,
            }
        );

        let params = self.effective_params(&request);
        let prompt = Self::build_prompt(&request.messages);
        let args = Self::runner_args(&self.config, &params, prompt);

        let (event_tx, stream, cancel_rx) = make_event_stream(request.target);
        let worker: ProviderWorker = Box::pin(Self::run_runner_worker(
            self.config.clone(),
            args,
            request.target,
            event_tx,
            cancel_rx,
        ));

        Ok(ProviderStreamHandle { stream, worker })
    }
}

/// Reassembles UTF-8 text from byte chunks that may split a code point.
#[derive(Debug, Default)]
struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        match std::str::from_utf8(&self.pending) {
            Ok(text) => {
                let text = text.to_string();
                self.pending.clear();
                text
            }
            Err(error) if error.error_len().is_none() => {
                let valid = error.valid_up_to();
                let text = String::from_utf8_lossy(&self.pending[..valid]).into_owned();
                self.pending.drain(..valid);
                text
            }
            Err(_) => {
                let text = String::from_utf8_lossy(&self.pending).into_owned();
                self.pending.clear();
                text
            }
        }
    }

    fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}
