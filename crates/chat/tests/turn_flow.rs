use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use transgpt_chat::audio::{AudioFormat, AudioInput, FrameSource};
use transgpt_chat::{
    Backend, BackendChoice, BackendResolver, CaptureError, ChatError, ChatHub, GateState,
    HubConfig, Message, RecordingToggle, SessionId, StreamEvent, TurnMode, TurnOutcome,
    VOICE_MESSAGE_ECHO,
};
use transgpt_llm::{
    AudioTask, AudioTranscriber, BoxFuture, CompletionSource, ProviderError, ProviderResult,
    ProviderStreamHandle, ProviderWorker, Role, StreamEventMapped, StreamEventPayload,
    StreamRequest, make_event_stream,
};

#[derive(Debug, Clone)]
enum Step {
    Delta(&'static str),
    Done,
    Fail(&'static str),
    Hang,
    Panic,
}

struct ScriptedSource {
    steps: Vec<Step>,
    requests: Mutex<Vec<StreamRequest>>,
}

impl ScriptedSource {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn replying(deltas: &[&'static str]) -> Arc<Self> {
        let mut steps: Vec<Step> = deltas.iter().copied().map(Step::Delta).collect();
        steps.push(Step::Done);
        Self::new(steps)
    }

    fn requests(&self) -> Vec<StreamRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl CompletionSource for ScriptedSource {
    fn id(&self) -> &str {
        "scripted"
    }

    fn name(&self) -> &str {
        "Scripted"
    }

    fn stream_chat(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle> {
        self.requests.lock().unwrap().push(request.clone());
        let target = request.target;
        let (event_tx, stream, _cancel_rx) = make_event_stream(target);
        let steps = self.steps.clone();

        let worker: ProviderWorker = Box::pin(async move {
            for step in steps {
                let payload = match step {
                    Step::Delta(text) => StreamEventPayload::Delta(text.to_string()),
                    Step::Done => StreamEventPayload::Done,
                    Step::Fail(message) => StreamEventPayload::Error(message.to_string()),
                    Step::Hang => futures::future::pending::<StreamEventPayload>().await,
                    Step::Panic => panic!("scripted source panic"),
                };
                let _ = event_tx.send(StreamEventMapped { target, payload });
                tokio::task::yield_now().await;
            }
        });

        Ok(ProviderStreamHandle { stream, worker })
    }
}

struct ScriptedBackends {
    remote: Option<Arc<ScriptedSource>>,
    local: Option<Arc<ScriptedSource>>,
}

impl BackendResolver for ScriptedBackends {
    fn resolve(&self, backend: &Backend) -> ProviderResult<Arc<dyn CompletionSource>> {
        match backend {
            Backend::Remote { .. } => match &self.remote {
                Some(source) => Ok(source.clone()),
                None => Err(ProviderError::MissingApiKey {
                    stage: "test-resolve",
                    provider_id: "openai".into(),
                }),
            },
            Backend::Local { model_path } => match &self.local {
                Some(source) if model_path.is_file() => Ok(source.clone()),
                _ => Err(ProviderError::LocalModelMissing {
                    stage: "test-resolve",
                    path: model_path.clone(),
                }),
            },
        }
    }
}

fn hub_with(remote: Option<Arc<ScriptedSource>>, local: Option<Arc<ScriptedSource>>) -> ChatHub {
    ChatHub::new(
        HubConfig::default(),
        Arc::new(ScriptedBackends { remote, local }),
    )
}

fn hub(remote: &Arc<ScriptedSource>) -> ChatHub {
    hub_with(Some(remote.clone()), None)
}

fn history(hub: &ChatHub, id: SessionId) -> Vec<Message> {
    hub.session(id).unwrap().messages().to_vec()
}

fn assert_idle(hub: &ChatHub, id: SessionId) {
    let session = hub.session(id).unwrap();
    assert_eq!(session.gate().state(), GateState::Idle);
    assert!(session.controls().all_enabled());
}

#[tokio::test]
async fn chat_turn_streams_and_commits_reply() {
    let source = ScriptedSource::replying(&["Hi", " there"]);
    let mut hub = hub(&source);
    let id = hub.open_session();

    let outcome = hub.begin_turn(id, "Hello", TurnMode::Chat).unwrap();
    assert!(matches!(outcome, TurnOutcome::Started(_)));
    assert!(hub.session(id).unwrap().controls().all_disabled());

    let events = hub.drain_session(id).await;

    assert_eq!(
        events,
        vec![
            StreamEvent::UserEcho("Hello".into()),
            StreamEvent::AssistantStart,
            StreamEvent::AssistantDelta("Hi".into()),
            StreamEvent::AssistantDelta(" there".into()),
            StreamEvent::AssistantEnd,
        ]
    );
    assert_eq!(
        history(&hub, id),
        vec![Message::user("Hello"), Message::assistant("Hi there")]
    );
    assert_idle(&hub, id);
    assert_eq!(hub.session(id).unwrap().gate().transition_counts(), (1, 1));
    assert_eq!(
        hub.session(id).unwrap().transcript().as_plain_text(),
        "You: Hello\n\nGPT: Hi there\n\n"
    );

    let requests = source.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].model_id, "gpt-3.5-turbo");
    assert_eq!(requests[0].temperature, Some(0.5));
    assert_eq!(requests[0].max_tokens, Some(4000));
}

#[tokio::test]
async fn history_grows_by_one_pair_per_turn() {
    let source = ScriptedSource::replying(&["ok"]);
    let mut hub = hub(&source);
    let id = hub.open_session();

    hub.begin_turn(id, "first", TurnMode::Chat).unwrap();
    hub.drain_session(id).await;
    hub.begin_turn(id, "second", TurnMode::Chat).unwrap();
    hub.drain_session(id).await;

    let messages = history(&hub, id);
    assert_eq!(messages.len(), 4);
    assert_eq!(
        messages.iter().map(|message| message.role).collect::<Vec<_>>(),
        vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
    );
    assert_eq!(source.requests()[1].messages.len(), 3);
}

#[tokio::test]
async fn translate_turn_leaves_history_untouched() {
    let source = ScriptedSource::replying(&["Bonjour"]);
    let mut hub = hub(&source);
    let id = hub.open_session();

    hub.begin_turn(id, "Good morning", TurnMode::translate("French"))
        .unwrap();
    let events = hub.drain_session(id).await;

    assert_eq!(
        events,
        vec![
            StreamEvent::UserEcho("Good morning".into()),
            StreamEvent::TranslationStart,
            StreamEvent::TranslationDelta("Bonjour".into()),
            StreamEvent::TranslationEnd,
        ]
    );
    assert!(history(&hub, id).is_empty());

    let request = &source.requests()[0];
    assert_eq!(request.messages.len(), 1);
    assert_eq!(request.messages[0].role, Role::User);
    assert!(
        request.messages[0]
            .content
            .starts_with("Please translate the following sentence to French")
    );
    assert!(request.messages[0].content.ends_with(": Good morning"));
    assert_idle(&hub, id);
}

#[tokio::test]
async fn error_mid_stream_commits_nothing() {
    let source = ScriptedSource::new(vec![Step::Delta("Hi"), Step::Fail("connection refused")]);
    let mut hub = hub(&source);
    let id = hub.open_session();

    hub.begin_turn(id, "Hello", TurnMode::Chat).unwrap();
    let events = hub.drain_session(id).await;

    assert_eq!(
        events,
        vec![
            StreamEvent::UserEcho("Hello".into()),
            StreamEvent::AssistantStart,
            StreamEvent::AssistantDelta("Hi".into()),
            StreamEvent::Error("connection refused".into()),
        ]
    );
    assert_eq!(history(&hub, id), vec![Message::user("Hello")]);
    assert!(
        hub.session(id)
            .unwrap()
            .transcript()
            .as_plain_text()
            .ends_with("ERROR: connection refused\n\n")
    );
    assert_idle(&hub, id);
}

#[tokio::test]
async fn failed_translation_leaves_history_untouched() {
    let source = ScriptedSource::new(vec![Step::Delta("Bon"), Step::Fail("boom")]);
    let mut hub = hub(&source);
    let id = hub.open_session();
    hub.begin_turn(id, "hi", TurnMode::Chat).unwrap();
    hub.drain_session(id).await;
    let before = history(&hub, id);

    hub.begin_turn(id, "Good morning", TurnMode::translate("French"))
        .unwrap();
    let events = hub.drain_session(id).await;

    assert_eq!(
        events,
        vec![
            StreamEvent::UserEcho("Good morning".into()),
            StreamEvent::TranslationStart,
            StreamEvent::TranslationDelta("Bon".into()),
            StreamEvent::Error("boom".into()),
        ]
    );
    assert_eq!(history(&hub, id), before);
    assert_idle(&hub, id);
}

#[tokio::test]
async fn reply_without_fragments_commits_empty_assistant_message() {
    let source = ScriptedSource::replying(&[]);
    let mut hub = hub(&source);
    let id = hub.open_session();

    hub.begin_turn(id, "Hello", TurnMode::Chat).unwrap();
    let events = hub.drain_session(id).await;

    assert_eq!(
        events,
        vec![
            StreamEvent::UserEcho("Hello".into()),
            StreamEvent::AssistantStart,
            StreamEvent::AssistantEnd,
        ]
    );
    assert_eq!(
        history(&hub, id),
        vec![Message::user("Hello"), Message::assistant("")]
    );
    assert_idle(&hub, id);
}

#[tokio::test]
async fn failure_before_first_fragment_commits_nothing() {
    let source = ScriptedSource::new(vec![Step::Fail("early")]);
    let mut hub = hub(&source);
    let id = hub.open_session();

    hub.begin_turn(id, "Hello", TurnMode::Chat).unwrap();
    let events = hub.drain_session(id).await;

    assert_eq!(
        events,
        vec![
            StreamEvent::UserEcho("Hello".into()),
            StreamEvent::AssistantStart,
            StreamEvent::Error("early".into()),
        ]
    );
    assert_eq!(history(&hub, id), vec![Message::user("Hello")]);
    assert_idle(&hub, id);
}

#[tokio::test]
async fn translation_without_target_language_is_rejected() {
    let source = ScriptedSource::replying(&["never"]);
    let mut hub = hub(&source);
    let id = hub.open_session();

    let error = hub
        .begin_turn(id, "Good morning", TurnMode::translate("  "))
        .unwrap_err();

    assert!(error.is_validation());
    assert!(matches!(
        error,
        ChatError::InvalidParameter { name: "target_language", .. }
    ));
    assert!(source.requests().is_empty());
    assert!(hub.session(id).unwrap().transcript().is_empty());
    assert_eq!(hub.session(id).unwrap().gate().transition_counts(), (0, 0));
    assert_idle(&hub, id);
}

#[tokio::test]
async fn busy_session_rejects_second_turn() {
    let source = ScriptedSource::replying(&["one"]);
    let mut hub = hub(&source);
    let id = hub.open_session();

    let first = hub.begin_turn(id, "first", TurnMode::Chat).unwrap();
    let error = hub.begin_turn(id, "second", TurnMode::Chat).unwrap_err();

    assert!(error.is_busy());
    assert!(matches!(
        error,
        ChatError::TurnInFlight { active, .. } if Some(active) == first.target()
    ));
    assert!(matches!(hub.clear(id), Err(ChatError::TurnInFlight { .. })));
    assert!(matches!(
        hub.select_backend(id, BackendChoice::Remote("gpt-4".into())),
        Err(ChatError::TurnInFlight { .. })
    ));

    hub.drain_session(id).await;
    assert_eq!(
        history(&hub, id),
        vec![Message::user("first"), Message::assistant("one")]
    );
    assert_eq!(source.requests().len(), 1);
    assert_idle(&hub, id);
}

#[tokio::test]
async fn empty_input_is_skipped() {
    let source = ScriptedSource::replying(&["never"]);
    let mut hub = hub(&source);
    let id = hub.open_session();

    assert_eq!(
        hub.begin_turn(id, "   ", TurnMode::Chat).unwrap(),
        TurnOutcome::Skipped
    );
    assert_eq!(
        hub.begin_turn(id, "", TurnMode::translate("German")).unwrap(),
        TurnOutcome::Skipped
    );

    assert!(history(&hub, id).is_empty());
    assert!(hub.session(id).unwrap().transcript().is_empty());
    assert_eq!(hub.session(id).unwrap().gate().transition_counts(), (0, 0));
    assert!(source.requests().is_empty());
}

#[tokio::test]
async fn concurrent_sessions_stay_isolated() {
    let source = ScriptedSource::replying(&["a", "b"]);
    let mut hub = hub(&source);
    let left = hub.open_session();
    let right = hub.open_session();

    hub.begin_turn(left, "left question", TurnMode::Chat)
        .unwrap();
    hub.begin_turn(right, "right question", TurnMode::Chat)
        .unwrap();
    assert!(hub.session(left).unwrap().is_busy());
    assert!(hub.session(right).unwrap().is_busy());

    let mut per_session: Vec<(SessionId, StreamEvent)> = Vec::new();
    while hub.session(left).unwrap().is_busy() || hub.session(right).unwrap().is_busy() {
        per_session.push(hub.next_event().await.unwrap());
    }

    for id in [left, right] {
        let events: Vec<_> = per_session
            .iter()
            .filter(|(session_id, _)| *session_id == id)
            .map(|(_, event)| event.clone())
            .collect();
        assert_eq!(events.len(), 5);
        assert_eq!(events[1], StreamEvent::AssistantStart);
        assert_eq!(events[4], StreamEvent::AssistantEnd);
        assert_idle(&hub, id);
    }
    assert_eq!(
        history(&hub, left),
        vec![Message::user("left question"), Message::assistant("ab")]
    );
    assert_eq!(
        history(&hub, right),
        vec![Message::user("right question"), Message::assistant("ab")]
    );
}

#[tokio::test]
async fn closing_session_mid_turn_discards_its_events() {
    let hanging = ScriptedSource::new(vec![Step::Delta("partial"), Step::Hang]);
    let mut hub = hub(&hanging);
    let doomed = hub.open_session();
    let survivor = hub.open_session();

    hub.begin_turn(doomed, "Hello", TurnMode::Chat).unwrap();
    tokio::task::yield_now().await;
    assert_eq!(hub.close_session(doomed).unwrap(), 1);
    assert!(hub.session(doomed).is_none());
    assert!(matches!(
        hub.begin_turn(doomed, "again", TurnMode::Chat),
        Err(ChatError::SessionNotFound { .. })
    ));

    hub.select_backend(survivor, BackendChoice::Remote("gpt-4".into()))
        .unwrap();
    assert!(hub.session(survivor).unwrap().backend() == &Backend::remote("gpt-4"));
    assert!(hub.clear(survivor).is_ok());
    assert_eq!(hub.close_session(survivor).unwrap(), 0);
}

#[tokio::test]
async fn events_from_closed_session_never_reach_survivor() {
    let source = ScriptedSource::replying(&["x"]);
    let mut hub = hub(&source);
    let doomed = hub.open_session();
    let survivor = hub.open_session();

    hub.begin_turn(doomed, "gone", TurnMode::Chat).unwrap();
    hub.close_session(doomed).unwrap();
    hub.begin_turn(survivor, "stay", TurnMode::Chat).unwrap();

    let mut seen = Vec::new();
    while hub.session(survivor).unwrap().is_busy() {
        seen.push(hub.next_event().await.unwrap());
    }

    assert!(seen.iter().all(|(id, _)| *id == survivor));
    assert_eq!(
        history(&hub, survivor),
        vec![Message::user("stay"), Message::assistant("x")]
    );
}

#[tokio::test]
async fn missing_credential_fails_before_gate() {
    let mut hub = hub_with(None, None);
    let id = hub.open_session();

    let error = hub.begin_turn(id, "Hello", TurnMode::Chat).unwrap_err();

    assert!(error.is_backend_unavailable());
    assert!(history(&hub, id).is_empty());
    assert!(hub.session(id).unwrap().transcript().is_empty());
    assert_eq!(hub.session(id).unwrap().gate().transition_counts(), (0, 0));
}

#[tokio::test]
async fn local_backend_without_model_reverts_to_remote() {
    let source = ScriptedSource::replying(&["remote"]);
    let mut hub = hub_with(Some(source.clone()), Some(ScriptedSource::replying(&["local"])));
    let id = hub.open_session();
    hub.select_backend(id, BackendChoice::Remote("gpt-4".into()))
        .unwrap();

    let error = hub.select_backend(id, BackendChoice::Local).unwrap_err();

    assert!(error.is_backend_unavailable());
    assert_eq!(
        hub.session(id).unwrap().backend(),
        &Backend::remote("gpt-3.5-turbo")
    );
    assert_idle(&hub, id);
}

#[tokio::test]
async fn local_backend_streams_and_fails_fast_when_model_disappears() {
    let local = ScriptedSource::replying(&["local reply"]);
    let mut hub = hub_with(Some(ScriptedSource::replying(&["remote"])), Some(local.clone()));
    let id = hub.open_session();
    let dir = tempfile::tempdir().unwrap();
    let model_path = dir.path().join("model.gguf");
    std::fs::write(&model_path, b"weights").unwrap();

    assert!(matches!(
        hub.load_local_model(id, &dir.path().join("missing.gguf")),
        Err(ChatError::InvalidModelPath { .. })
    ));
    hub.load_local_model(id, &model_path).unwrap();
    hub.select_backend(id, BackendChoice::Local).unwrap();
    assert!(hub.session(id).unwrap().backend().is_local());

    hub.begin_turn(id, "Hello", TurnMode::Chat).unwrap();
    hub.drain_session(id).await;
    assert_eq!(local.requests()[0].model_id, "local");
    assert_eq!(history(&hub, id)[1], Message::assistant("local reply"));

    std::fs::remove_file(&model_path).unwrap();
    let error = hub.begin_turn(id, "again", TurnMode::Chat).unwrap_err();
    assert!(error.is_backend_unavailable());
    assert_eq!(history(&hub, id).len(), 2);
    assert!(!hub.session(id).unwrap().backend().is_local());
    assert_idle(&hub, id);
}

#[tokio::test]
async fn panicking_source_becomes_error_event() {
    let source = ScriptedSource::new(vec![Step::Delta("half"), Step::Panic]);
    let mut hub = hub(&source);
    let id = hub.open_session();

    hub.begin_turn(id, "Hello", TurnMode::Chat).unwrap();
    let events = hub.drain_session(id).await;

    assert!(matches!(events.last(), Some(StreamEvent::Error(_))));
    assert_eq!(history(&hub, id), vec![Message::user("Hello")]);
    assert_idle(&hub, id);
}

#[tokio::test]
async fn stream_closing_without_terminal_becomes_error() {
    let source = ScriptedSource::new(vec![Step::Delta("dangling")]);
    let mut hub = hub(&source);
    let id = hub.open_session();

    hub.begin_turn(id, "Hello", TurnMode::Chat).unwrap();
    let events = hub.drain_session(id).await;

    assert_eq!(events.len(), 4);
    assert!(matches!(
        &events[3],
        StreamEvent::Error(message) if message.contains("terminal")
    ));
    assert_idle(&hub, id);
}

#[tokio::test]
async fn idle_timeout_turns_hang_into_error() {
    let source = ScriptedSource::new(vec![Step::Hang]);
    let config = HubConfig {
        stream_idle_timeout: Some(Duration::from_millis(50)),
        ..HubConfig::default()
    };
    let mut hub = ChatHub::new(
        config,
        Arc::new(ScriptedBackends {
            remote: Some(source),
            local: None,
        }),
    );
    let id = hub.open_session();

    hub.begin_turn(id, "Hello", TurnMode::Chat).unwrap();
    let events = hub.drain_session(id).await;

    assert_eq!(events[1], StreamEvent::AssistantStart);
    assert!(matches!(events.last(), Some(StreamEvent::Error(_))));
    assert_idle(&hub, id);
}

#[tokio::test]
async fn parameters_are_validated_and_snapshotted() {
    let source = ScriptedSource::replying(&["ok"]);
    let mut hub = hub(&source);
    let id = hub.open_session();

    assert!(hub.set_temperature(id, "hot").unwrap_err().is_validation());
    assert!(hub.set_max_tokens(id, "-1").unwrap_err().is_validation());
    assert_eq!(hub.session(id).unwrap().gate().transition_counts(), (0, 0));

    hub.set_temperature(id, "0.9").unwrap();
    hub.set_max_tokens(id, "0").unwrap();
    hub.select_backend(id, BackendChoice::Remote("gpt-4".into()))
        .unwrap();
    assert!(matches!(
        hub.select_backend(id, BackendChoice::Remote("gpt-9".into())),
        Err(ChatError::UnknownModel { .. })
    ));

    hub.begin_turn(id, "Hello", TurnMode::Chat).unwrap();
    hub.set_temperature(id, "0.1").unwrap();
    hub.drain_session(id).await;

    let request = &source.requests()[0];
    assert_eq!(request.model_id, "gpt-4");
    assert_eq!(request.temperature, Some(0.9));
    assert_eq!(request.max_tokens, None);
}

#[tokio::test]
async fn clear_and_export_follow_the_transcript() {
    let source = ScriptedSource::replying(&["Hi", " there"]);
    let mut hub = hub(&source);
    let id = hub.open_session();
    let dir = tempfile::tempdir().unwrap();

    hub.begin_turn(id, "Hello", TurnMode::Chat).unwrap();
    hub.drain_session(id).await;

    let path = hub.export(id, dir.path()).unwrap();
    let name = path.file_name().unwrap().to_str().unwrap().to_string();
    assert!(name.starts_with("chat_") && name.ends_with(".txt"));
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "You: Hello\n\nGPT: Hi there\n\n"
    );

    hub.clear(id).unwrap();
    assert!(history(&hub, id).is_empty());
    assert!(hub.session(id).unwrap().transcript().is_empty());

    hub.begin_turn(id, "fresh", TurnMode::Chat).unwrap();
    hub.drain_session(id).await;
    assert_eq!(source.requests()[1].messages.len(), 1);
}

struct FakeInput {
    frames: Vec<Vec<i16>>,
    reads: Arc<AtomicUsize>,
}

struct FakeFrames {
    frames: VecDeque<Vec<i16>>,
    reads: Arc<AtomicUsize>,
}

impl AudioInput for FakeInput {
    fn open(&self, _format: AudioFormat) -> Result<Box<dyn FrameSource>, CaptureError> {
        Ok(Box::new(FakeFrames {
            frames: self.frames.iter().cloned().collect(),
            reads: self.reads.clone(),
        }))
    }
}

impl FrameSource for FakeFrames {
    fn read_frame(&mut self) -> Result<Option<Vec<i16>>, CaptureError> {
        let frame = self.frames.pop_front();
        if frame.is_some() {
            self.reads.fetch_add(1, Ordering::SeqCst);
        }
        Ok(frame)
    }
}

struct FakeTranscriber {
    reply: Result<String, &'static str>,
    calls: Mutex<Vec<(PathBuf, AudioTask)>>,
}

impl AudioTranscriber for FakeTranscriber {
    fn transcribe<'a>(
        &'a self,
        audio_path: &'a Path,
        task: AudioTask,
    ) -> BoxFuture<'a, ProviderResult<String>> {
        self.calls
            .lock()
            .unwrap()
            .push((audio_path.to_path_buf(), task));
        let reply = self.reply.clone();
        Box::pin(async move {
            reply.map_err(|body| ProviderError::TranscriptionStatus {
                stage: "test-transcribe",
                status: 500,
                body: body.to_string(),
            })
        })
    }
}

fn audio_hub(
    records_dir: &Path,
    reply: Result<String, &'static str>,
) -> (ChatHub, Arc<FakeTranscriber>, Arc<AtomicUsize>) {
    let reads = Arc::new(AtomicUsize::new(0));
    let transcriber = Arc::new(FakeTranscriber {
        reply,
        calls: Mutex::new(Vec::new()),
    });
    let config = HubConfig {
        records_dir: records_dir.to_path_buf(),
        ..HubConfig::default()
    };
    let hub = ChatHub::new(
        config,
        Arc::new(ScriptedBackends {
            remote: Some(ScriptedSource::replying(&["unused"])),
            local: None,
        }),
    )
    .with_transcriber(transcriber.clone())
    .with_audio_input(Arc::new(FakeInput {
        frames: vec![vec![1; 16], vec![2; 16], vec![3; 16]],
        reads: reads.clone(),
    }));
    (hub, transcriber, reads)
}

async fn wait_for_reads(reads: &AtomicUsize, expected: usize) {
    while reads.load(Ordering::SeqCst) < expected {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn recording_round_trip_emits_one_delta_per_line() {
    let dir = tempfile::tempdir().unwrap();
    let (mut hub, transcriber, reads) =
        audio_hub(dir.path(), Ok("line one\nline two".to_string()));
    let id = hub.open_session();

    assert_eq!(
        hub.toggle_recording(id, AudioTask::Transcribe).await.unwrap(),
        RecordingToggle::Started
    );
    assert_eq!(hub.session(id).unwrap().recording(), Some(AudioTask::Transcribe));
    assert!(matches!(
        hub.toggle_recording(id, AudioTask::Translate).await,
        Err(ChatError::CaptureAlreadyActive { .. })
    ));
    assert!(matches!(
        hub.begin_turn(id, "typed", TurnMode::Chat),
        Err(ChatError::RecordingActive { .. })
    ));

    wait_for_reads(&reads, 3).await;
    let toggle = hub.toggle_recording(id, AudioTask::Transcribe).await.unwrap();
    assert!(matches!(toggle, RecordingToggle::Stopped(_)));
    assert!(hub.session(id).unwrap().controls().all_disabled());

    let events = hub.drain_session(id).await;
    assert_eq!(
        events,
        vec![
            StreamEvent::UserEcho(VOICE_MESSAGE_ECHO.into()),
            StreamEvent::TranslationStart,
            StreamEvent::TranslationDelta("line one\n".into()),
            StreamEvent::TranslationDelta("line two".into()),
            StreamEvent::TranslationEnd,
        ]
    );
    assert!(history(&hub, id).is_empty());
    assert_eq!(hub.session(id).unwrap().recording(), None);
    assert_idle(&hub, id);

    let calls = transcriber.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1, AudioTask::Transcribe);
    let reader = hound::WavReader::open(&calls[0].0).unwrap();
    assert_eq!(reader.spec().sample_rate, 10_000);
    assert_eq!(reader.len(), 48);
}

#[tokio::test]
async fn failed_transcription_reports_error() {
    let dir = tempfile::tempdir().unwrap();
    let (mut hub, _transcriber, reads) = audio_hub(dir.path(), Err("bad audio"));
    let id = hub.open_session();

    hub.toggle_recording(id, AudioTask::Translate).await.unwrap();
    wait_for_reads(&reads, 3).await;
    hub.toggle_recording(id, AudioTask::Translate).await.unwrap();
    let events = hub.drain_session(id).await;

    assert_eq!(events.len(), 3);
    assert!(matches!(
        &events[2],
        StreamEvent::Error(message) if message.contains("bad audio")
    ));
    assert_idle(&hub, id);
}

#[tokio::test]
async fn recording_requires_configured_audio() {
    let source = ScriptedSource::replying(&["unused"]);
    let mut hub = hub(&source);
    let id = hub.open_session();

    let error = hub
        .toggle_recording(id, AudioTask::Transcribe)
        .await
        .unwrap_err();

    assert!(error.is_backend_unavailable());
    assert_eq!(hub.session(id).unwrap().recording(), None);
}
