use futures::StreamExt;
use rig::completion::{CompletionModel, Message as RigMessage};
use rig::prelude::CompletionClient;
use rig::providers::openai;
use rig::streaming::StreamedAssistantContent;
use snafu::{ResultExt, ensure};
use tokio::sync::{mpsc, oneshot};

use super::provider::{
    CompletionSource, CompletionsFailedSnafu, EmptyMessageSetSnafu, HttpClientSnafu,
    MissingApiKeySnafu, ProviderConfig, ProviderError, ProviderMessage, ProviderResult,
    ProviderStreamHandle, Role, StreamEventMapped, StreamEventPayload, StreamRequest,
    emit_error_event, make_event_stream,
};

pub const RIG_OPENAI_PROVIDER_ID: &str = "openai";

type RigStreamingResponse = rig::streaming::StreamingCompletionResponse<
    rig::providers::openai::responses_api::streaming::StreamingCompletionResponse,
>;

/// How a remote stream stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    Exhausted,
    Cancelled,
    Failed,
    ReceiverGone,
}

/// Remote completion source backed by rig's OpenAI client.
pub struct RigProviderAdapter {
    config: ProviderConfig,
}

/// One streamed completion against the remote API, owned by its worker future.
struct RemoteTurn {
    config: ProviderConfig,
    request: StreamRequest,
    event_tx: mpsc::UnboundedSender<StreamEventMapped>,
}

impl RigProviderAdapter {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        ensure!(
            !config.api_key.is_empty(),
            MissingApiKeySnafu {
                stage: "rig-adapter-new",
                provider_id: config.provider_id.clone(),
            }
        );

        Ok(Self { config })
    }
}

impl RemoteTurn {
    fn client(&self) -> ProviderResult<openai::Client> {
        let mut builder = openai::Client::builder().api_key(self.config.api_key.as_str());
        if !self.config.endpoint.is_empty() {
            builder = builder.base_url(self.config.endpoint.as_str());
        }
        builder.build().context(HttpClientSnafu {
            stage: "build-client",
        })
    }

    /// Splits history into rig chat messages plus a preamble built from system text.
    fn split_history(request: &StreamRequest) -> (Option<String>, Vec<RigMessage>) {
        let mut system_text = Vec::new();
        let mut chat = Vec::with_capacity(request.messages.len());

        for ProviderMessage { role, content } in &request.messages {
            match role {
                Role::System if !content.trim().is_empty() => system_text.push(content.as_str()),
                Role::System => {}
                Role::User => chat.push(RigMessage::user(content.clone())),
                Role::Assistant => chat.push(RigMessage::assistant(content.clone())),
            }
        }

        let preamble = (!system_text.is_empty()).then(|| system_text.join("\n\n"));
        (preamble, chat)
    }

    async fn open(&self) -> ProviderResult<RigStreamingResponse> {
        let (preamble, mut history) = Self::split_history(&self.request);
        let Some(prompt) = history.pop() else {
            tracing::warn!(
                session_id = %self.request.target.session_id,
                turn_id = %self.request.target.turn_id,
                model_id = %self.request.model_id,
                "no chat messages left after removing system text"
            );
            return EmptyMessageSetSnafu {
                stage: "remote-turn-open",
                target: self.request.target,
            }
            .fail();
        };

        let model = self.client()?.completion_model(self.request.model_id.clone());
        let mut builder = model.completion_request(prompt).messages(history);
        if let Some(preamble) = preamble {
            builder = builder.preamble(preamble);
        }
        if let Some(temperature) = self.request.temperature {
            builder = builder.temperature(temperature);
        }
        if let Some(max_tokens) = self.request.max_tokens {
            builder = builder.max_tokens(max_tokens);
        }

        builder.stream().await.context(CompletionsFailedSnafu {
            stage: "remote-turn-open",
        })
    }

    /// Visible answer text carried by a stream item, if any.
    fn answer_text<R>(item: StreamedAssistantContent<R>) -> Option<String>
    where
        R: Clone + Unpin,
    {
        match item {
            StreamedAssistantContent::Text(text) if !text.text.is_empty() => Some(text.text),
            _ => None,
        }
    }

    fn emit(&self, payload: StreamEventPayload) -> bool {
        self.event_tx
            .send(StreamEventMapped {
                target: self.request.target,
                payload,
            })
            .is_ok()
    }

    async fn pump(
        &self,
        stream: &mut RigStreamingResponse,
        cancel_rx: &mut oneshot::Receiver<()>,
    ) -> StreamEnd {
        let target = self.request.target;
        loop {
            let item = tokio::select! {
                _ = &mut *cancel_rx => {
                    tracing::debug!(session_id = %target.session_id, turn_id = %target.turn_id, "remote stream cancelled");
                    stream.cancel();
                    return StreamEnd::Cancelled;
                }
                item = stream.next() => item,
            };

            match item {
                Some(Ok(item)) => {
                    let Some(text) = Self::answer_text(item) else {
                        continue;
                    };
                    if !self.emit(StreamEventPayload::Delta(text)) {
                        return StreamEnd::ReceiverGone;
                    }
                }
                Some(Err(source)) => {
                    tracing::warn!(
                        session_id = %target.session_id,
                        turn_id = %target.turn_id,
                        error = %source,
                        "remote stream returned an error chunk"
                    );
                    emit_error_event(
                        &self.event_tx,
                        target,
                        ProviderError::CompletionsFailed {
                            stage: "remote-stream-chunk",
                            source,
                        },
                    );
                    return StreamEnd::Failed;
                }
                None => return StreamEnd::Exhausted,
            }
        }
    }

    async fn run(self, mut cancel_rx: oneshot::Receiver<()>) {
        let target = self.request.target;
        let mut stream = match self.open().await {
            Ok(stream) => stream,
            Err(error) => {
                tracing::error!(
                    session_id = %target.session_id,
                    turn_id = %target.turn_id,
                    provider_id = %self.config.provider_id,
                    model_id = %self.request.model_id,
                    error = %error,
                    "failed to open remote stream"
                );
                emit_error_event(&self.event_tx, target, error);
                return;
            }
        };

        if self.pump(&mut stream, &mut cancel_rx).await == StreamEnd::Exhausted {
            self.emit(StreamEventPayload::Done);
        }
    }
}

impl CompletionSource for RigProviderAdapter {
    fn id(&self) -> &str {
        &self.config.provider_id
    }

    fn name(&self) -> &str {
        "OpenAI"
    }

    fn stream_chat(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle> {
        ensure!(
            !request.messages.is_empty(),
            EmptyMessageSetSnafu {
                stage: "stream-chat",
                target: request.target,
            }
        );

        let (event_tx, stream, cancel_rx) = make_event_stream(request.target);
        let turn = RemoteTurn {
            config: self.config.clone(),
            request,
            event_tx,
        };

        Ok(ProviderStreamHandle {
            stream,
            worker: Box::pin(turn.run(cancel_rx)),
        })
    }
}
