use std::path::PathBuf;

use transgpt_chat::{SessionId, TurnMode};
use transgpt_llm::AudioTask;

pub const HELP: &str = "\
commands:
  <text>                          send a chat message
  /translate <lang>[:<style>] <text>  translate text, e.g. /translate French:formal Hello
  /languages                      list translation languages
  /models                         list remote models
  /model <id>                     switch to a remote model
  /load-model <path>              import a local model file
  /local                          switch to the imported local model
  /temp <value>                   set temperature
  /max-tokens <value>             set max tokens (0 = no limit)
  /record | /record-translate     start or stop a voice recording
  /new | /tabs | /switch <n> | /close
  /clear | /export [dir] | /show
  /help | /quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    Turn { mode: TurnMode, text: String },
    Languages,
    Models,
    Model(String),
    LoadModel(PathBuf),
    Local,
    Temperature(String),
    MaxTokens(String),
    Record(AudioTask),
    New,
    Tabs,
    Switch(SessionId),
    Close,
    Clear,
    Export(Option<PathBuf>),
    Show,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageError(pub &'static str);

pub fn parse(line: &str) -> Result<Command, UsageError> {
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Send(line.to_string()));
    };

    let (name, argument) = match rest.split_once(char::is_whitespace) {
        Some((name, argument)) => (name, argument.trim()),
        None => (rest, ""),
    };

    let command = match name {
        "translate" => parse_translate(argument)?,
        "languages" => Command::Languages,
        "models" => Command::Models,
        "model" => Command::Model(required(argument, "usage: /model <id>")?.to_string()),
        "load-model" => Command::LoadModel(PathBuf::from(required(
            argument,
            "usage: /load-model <path>",
        )?)),
        "local" => Command::Local,
        "temp" => Command::Temperature(required(argument, "usage: /temp <value>")?.to_string()),
        "max-tokens" => {
            Command::MaxTokens(required(argument, "usage: /max-tokens <value>")?.to_string())
        }
        "record" => Command::Record(AudioTask::Transcribe),
        "record-translate" => Command::Record(AudioTask::Translate),
        "new" => Command::New,
        "tabs" => Command::Tabs,
        "switch" => {
            let raw = required(argument, "usage: /switch <n>")?;
            let index = raw
                .parse::<u64>()
                .map_err(|_| UsageError("usage: /switch <n>"))?;
            Command::Switch(SessionId::new(index))
        }
        "close" => Command::Close,
        "clear" => Command::Clear,
        "export" => Command::Export((!argument.is_empty()).then(|| PathBuf::from(argument))),
        "show" => Command::Show,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        _ => return Err(UsageError("unknown command, try /help")),
    };
    Ok(command)
}

fn parse_translate(argument: &str) -> Result<Command, UsageError> {
    const USAGE: &str = "usage: /translate <lang>[:<style>] <text>";
    let (target, text) = argument.split_once(char::is_whitespace).ok_or(UsageError(USAGE))?;

    let mode = match target.split_once(':') {
        Some((language, style)) if !language.is_empty() && !style.is_empty() => {
            TurnMode::translate_with_style(language, style)
        }
        Some(_) => return Err(UsageError(USAGE)),
        None => TurnMode::translate(target),
    };

    Ok(Command::Turn {
        mode,
        text: text.trim().to_string(),
    })
}

fn required<'a>(argument: &'a str, usage: &'static str) -> Result<&'a str, UsageError> {
    if argument.is_empty() {
        Err(UsageError(usage))
    } else {
        Ok(argument)
    }
}
