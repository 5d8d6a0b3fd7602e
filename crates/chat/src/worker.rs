use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use transgpt_llm::{
    AudioTask, AudioTranscriber, CompletionSource, ProviderStreamHandle, StreamEventPayload,
};

use crate::events::{ResponseKind, StreamEvent, TurnEvent};
use crate::message::{StreamTarget, TurnRequest};

const WORKER_PANICKED: &str = "the response worker stopped unexpectedly";
const WORKER_VANISHED: &str = "the response worker exited without finishing the turn";
const STREAM_CLOSED_EARLY: &str = "provider stream ended before a terminal event";

/// Worker-side sender for one turn. Guarantees a terminal event reaches the hub, even
/// when the worker is dropped mid-flight.
struct TurnRelay {
    target: StreamTarget,
    kind: ResponseKind,
    event_tx: mpsc::UnboundedSender<TurnEvent>,
    finished: bool,
}

impl TurnRelay {
    fn new(
        target: StreamTarget,
        kind: ResponseKind,
        event_tx: mpsc::UnboundedSender<TurnEvent>,
    ) -> Self {
        Self {
            target,
            kind,
            event_tx,
            finished: false,
        }
    }

    fn send(&self, event: StreamEvent) {
        if self
            .event_tx
            .send(TurnEvent {
                target: self.target,
                event,
            })
            .is_err()
        {
            tracing::debug!(
                session_id = %self.target.session_id,
                turn_id = %self.target.turn_id,
                "hub channel closed; dropping event"
            );
        }
    }

    fn start(&self) {
        self.send(StreamEvent::start(self.kind));
    }

    fn delta(&self, text: impl Into<String>) {
        self.send(StreamEvent::delta(self.kind, text));
    }

    fn finish(mut self, outcome: Result<(), String>) {
        self.finished = true;
        match outcome {
            Ok(()) => self.send(StreamEvent::end(self.kind)),
            Err(message) => self.send(StreamEvent::Error(message)),
        }
    }
}

impl Drop for TurnRelay {
    fn drop(&mut self) {
        if !self.finished {
            self.send(StreamEvent::Error(WORKER_VANISHED.to_string()));
        }
    }
}

/// Runs one completion turn: Start, deltas in arrival order, then End or Error.
pub(crate) async fn run_completion_turn(
    source: Arc<dyn CompletionSource>,
    request: TurnRequest,
    event_tx: mpsc::UnboundedSender<TurnEvent>,
    idle_timeout: Option<Duration>,
) {
    let target = request.target;
    let relay = TurnRelay::new(target, ResponseKind::from(&request.mode), event_tx);
    relay.start();

    let outcome = AssertUnwindSafe(relay_completion(
        source.as_ref(),
        &request,
        &relay,
        idle_timeout,
    ))
    .catch_unwind()
    .await;

    let outcome = match outcome {
        Ok(result) => result,
        Err(_) => {
            tracing::error!(
                session_id = %target.session_id,
                turn_id = %target.turn_id,
                source_id = source.id(),
                "completion worker panicked"
            );
            Err(WORKER_PANICKED.to_string())
        }
    };

    if let Err(message) = &outcome {
        tracing::warn!(
            session_id = %target.session_id,
            turn_id = %target.turn_id,
            error = %message,
            "turn finished with an error"
        );
    }
    relay.finish(outcome);
}

async fn relay_completion(
    source: &dyn CompletionSource,
    request: &TurnRequest,
    relay: &TurnRelay,
    idle_timeout: Option<Duration>,
) -> Result<(), String> {
    let ProviderStreamHandle { mut stream, worker } = source
        .stream_chat(request.to_stream_request())
        .map_err(|error| error.to_string())?;

    tracing::debug!(
        session_id = %request.target.session_id,
        turn_id = %request.target.turn_id,
        source = source.name(),
        model_id = request.backend.model_id(),
        message_count = request.messages.len(),
        "completion stream opened"
    );

    let relay_events = async {
        loop {
            let next = match idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, stream.recv()).await {
                    Ok(next) => next,
                    Err(_) => {
                        return Err(format!(
                            "no response from the model within {} seconds",
                            limit.as_secs_f32()
                        ));
                    }
                },
                None => stream.recv().await,
            };

            let Some(event) = next else {
                return Err(STREAM_CLOSED_EARLY.to_string());
            };
            if event.target != stream.target() {
                tracing::debug!(
                    session_id = %request.target.session_id,
                    turn_id = %request.target.turn_id,
                    foreign_turn_id = %event.target.turn_id,
                    "dropping provider event for another turn"
                );
                continue;
            }

            match event.payload {
                StreamEventPayload::Delta(text) => relay.delta(text),
                StreamEventPayload::Done => return Ok(()),
                StreamEventPayload::Error(message) => return Err(message),
            }
        }
    };
    tokio::pin!(relay_events);

    let mut worker = worker;
    let mut worker_done = false;
    loop {
        tokio::select! {
            result = &mut relay_events => return result,
            _ = &mut worker, if !worker_done => worker_done = true,
        }
    }
}

/// Runs one audio turn: the transcriber result is emitted one line per delta.
pub(crate) async fn run_audio_turn(
    transcriber: Arc<dyn AudioTranscriber>,
    clip_path: PathBuf,
    task: AudioTask,
    target: StreamTarget,
    event_tx: mpsc::UnboundedSender<TurnEvent>,
) {
    let relay = TurnRelay::new(target, ResponseKind::Translation, event_tx);
    relay.start();

    let outcome = AssertUnwindSafe(transcriber.transcribe(&clip_path, task))
        .catch_unwind()
        .await;

    let outcome = match outcome {
        Ok(Ok(text)) => {
            for line in text.split_inclusive('\n') {
                relay.delta(line);
            }
            Ok(())
        }
        Ok(Err(error)) => {
            tracing::warn!(
                session_id = %target.session_id,
                turn_id = %target.turn_id,
                clip = %clip_path.display(),
                error = %error,
                "audio transcription failed"
            );
            Err(error.to_string())
        }
        Err(_) => {
            tracing::error!(
                session_id = %target.session_id,
                turn_id = %target.turn_id,
                "transcription worker panicked"
            );
            Err(WORKER_PANICKED.to_string())
        }
    };
    relay.finish(outcome);
}
