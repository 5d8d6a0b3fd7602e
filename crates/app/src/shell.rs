use std::io::Write;
use std::path::PathBuf;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use transgpt_chat::{
    BackendChoice, ChatError, ChatHub, RecordingToggle, SessionId, StreamEvent, TurnMode,
    TurnOutcome,
};
use transgpt_llm::AudioTask;

use crate::commands::{self, Command, HELP};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Line-oriented front-end: one active tab is echoed to stdout, others stream silently.
pub struct Shell {
    hub: ChatHub,
    active: SessionId,
    export_dir: PathBuf,
    languages: Vec<String>,
}

impl Shell {
    pub fn new(mut hub: ChatHub, export_dir: PathBuf, languages: Vec<String>) -> Self {
        let active = hub.open_session();
        Self {
            hub,
            active,
            export_dir,
            languages,
        }
    }

    pub async fn run<R>(mut self, mut lines: Lines<R>) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        tracing::info!("input closed, shutting down");
                        break;
                    };
                    if self.handle_line(&line).await == Flow::Quit {
                        break;
                    }
                }
                Some((session_id, event)) = self.hub.next_event() => {
                    self.render(session_id, &event);
                }
            }
        }
        Ok(())
    }

    async fn handle_line(&mut self, line: &str) -> Flow {
        if line.trim().is_empty() {
            return Flow::Continue;
        }

        let command = match commands::parse(line) {
            Ok(command) => command,
            Err(usage) => {
                println!("{}", usage.0);
                return Flow::Continue;
            }
        };

        match self.execute(command).await {
            Ok(flow) => flow,
            Err(error) => {
                self.report(&error);
                Flow::Continue
            }
        }
    }

    async fn execute(&mut self, command: Command) -> Result<Flow, ChatError> {
        let id = self.active;
        match command {
            Command::Send(text) => self.start_turn(&text, TurnMode::Chat)?,
            Command::Turn { mode, text } => self.start_turn(&text, mode)?,
            Command::Languages => println!("{}", self.languages.join(", ")),
            Command::Models => {
                let current = self
                    .hub
                    .session(id)
                    .map(|session| session.backend().label())
                    .unwrap_or_default();
                for model in &self.hub.available_models().models {
                    let marker = if model.id == current { "*" } else { " " };
                    println!("{marker} {}", model.id);
                }
            }
            Command::Model(model_id) => {
                self.hub
                    .select_backend(id, BackendChoice::Remote(model_id.clone()))?;
                println!("using {model_id}");
            }
            Command::LoadModel(path) => {
                self.hub.load_local_model(id, &path)?;
                println!("loaded {}; /local to use it", path.display());
            }
            Command::Local => {
                self.hub.select_backend(id, BackendChoice::Local)?;
                println!("using the local model");
            }
            Command::Temperature(raw) => {
                let temperature = self.hub.set_temperature(id, &raw)?;
                println!("temperature = {temperature}");
            }
            Command::MaxTokens(raw) => match self.hub.set_max_tokens(id, &raw)? {
                Some(max_tokens) => println!("max tokens = {max_tokens}"),
                None => println!("max tokens = unlimited"),
            },
            Command::Record(task) => match self.hub.toggle_recording(id, task).await? {
                RecordingToggle::Started => println!("recording... repeat the command to stop"),
                RecordingToggle::Stopped(target) => {
                    tracing::debug!(turn_id = %target.turn_id, "recording sent");
                    if task == AudioTask::Translate {
                        println!("translating recording to English...");
                    }
                }
            },
            Command::New => {
                self.active = self.hub.open_session();
                println!("opened tab {}", self.active);
            }
            Command::Tabs => {
                for session_id in self.hub.session_ids() {
                    if let Some(session) = self.hub.session(session_id) {
                        let marker = if session_id == self.active { "*" } else { " " };
                        let state = if session.is_busy() { " (streaming)" } else { "" };
                        println!(
                            "{marker} {session_id}: {} [{}]{state}",
                            session.title(),
                            session.backend().label()
                        );
                    }
                }
            }
            Command::Switch(session_id) => {
                if self.hub.session(session_id).is_none() {
                    println!("no tab {session_id}");
                } else {
                    self.active = session_id;
                    self.print_transcript();
                }
            }
            Command::Close => {
                let remaining = self.hub.close_session(id)?;
                if remaining == 0 {
                    return Ok(Flow::Quit);
                }
                if let Some(next) = self.hub.session_ids().last().copied() {
                    self.active = next;
                    println!("switched to tab {next}");
                }
            }
            Command::Clear => {
                self.hub.clear(id)?;
                println!("cleared");
            }
            Command::Export(dir) => {
                let dir = dir.unwrap_or_else(|| self.export_dir.clone());
                let path = self.hub.export(id, &dir)?;
                println!("saved {}", path.display());
            }
            Command::Show => self.print_transcript(),
            Command::Help => println!("{HELP}"),
            Command::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    fn start_turn(&mut self, text: &str, mode: TurnMode) -> Result<(), ChatError> {
        if let TurnOutcome::Skipped = self.hub.begin_turn(self.active, text, mode)? {
            tracing::debug!(session_id = %self.active, "nothing to send");
        }
        Ok(())
    }

    fn render(&self, session_id: SessionId, event: &StreamEvent) {
        if session_id != self.active {
            return;
        }

        let mut stdout = std::io::stdout().lock();
        let result = match event {
            StreamEvent::UserEcho(text) => writeln!(stdout, "You: {text}"),
            StreamEvent::AssistantStart | StreamEvent::TranslationStart => {
                write!(stdout, "GPT: ")
            }
            StreamEvent::AssistantDelta(text) | StreamEvent::TranslationDelta(text) => {
                write!(stdout, "{text}")
            }
            StreamEvent::AssistantEnd | StreamEvent::TranslationEnd => writeln!(stdout, "\n"),
            StreamEvent::Error(message) => writeln!(stdout, "\nERROR: {message}\n"),
        };
        if let Err(error) = result.and_then(|()| stdout.flush()) {
            tracing::warn!(error = %error, "failed to write to stdout");
        }
    }

    fn print_transcript(&self) {
        if let Some(session) = self.hub.session(self.active) {
            println!("-- tab {} --", self.active);
            print!("{}", session.transcript().as_plain_text());
        }
    }

    fn report(&self, error: &ChatError) {
        if error.is_busy() {
            println!("busy: wait for the current response to finish");
        } else if error.is_validation() {
            println!("warning: {error}");
        } else {
            println!("error: {error}");
        }
        tracing::warn!(session_id = %self.active, error = %error, "command failed");
    }
}
