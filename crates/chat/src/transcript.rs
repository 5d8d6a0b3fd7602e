use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::events::StreamEvent;

pub const USER_LABEL: &str = "You: ";
pub const ASSISTANT_LABEL: &str = "GPT: ";
pub const ERROR_LABEL: &str = "ERROR: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryTag {
    User,
    Assistant,
    Translation,
    Error,
}

impl EntryTag {
    pub fn label(self) -> &'static str {
        match self {
            Self::User => USER_LABEL,
            Self::Assistant | Self::Translation => ASSISTANT_LABEL,
            Self::Error => ERROR_LABEL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub tag: EntryTag,
    pub text: String,
    pub open: bool,
}

/// Rendered log of one session. Consumes `StreamEvent`s in order.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
    events: Vec<StreamEvent>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    /// Every event applied since the last clear, in arrival order.
    pub fn events(&self) -> &[StreamEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn apply(&mut self, event: &StreamEvent) {
        self.events.push(event.clone());
        match event {
            StreamEvent::UserEcho(text) => self.push_closed(EntryTag::User, text),
            StreamEvent::AssistantStart => self.open(EntryTag::Assistant),
            StreamEvent::TranslationStart => self.open(EntryTag::Translation),
            StreamEvent::AssistantDelta(text) => self.append(EntryTag::Assistant, text),
            StreamEvent::TranslationDelta(text) => self.append(EntryTag::Translation, text),
            StreamEvent::AssistantEnd | StreamEvent::TranslationEnd => self.close_open(),
            StreamEvent::Error(text) => {
                self.close_open();
                self.push_closed(EntryTag::Error, text);
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.events.clear();
    }

    pub fn as_plain_text(&self) -> String {
        let mut output = String::new();
        for entry in &self.entries {
            output.push_str(entry.tag.label());
            output.push_str(&entry.text);
            output.push_str("\n\n");
        }
        output
    }

    fn push_closed(&mut self, tag: EntryTag, text: &str) {
        self.entries.push(TranscriptEntry {
            tag,
            text: text.to_string(),
            open: false,
        });
    }

    fn open(&mut self, tag: EntryTag) {
        self.close_open();
        self.entries.push(TranscriptEntry {
            tag,
            text: String::new(),
            open: true,
        });
    }

    fn append(&mut self, tag: EntryTag, text: &str) {
        match self.entries.last_mut() {
            Some(entry) if entry.open && entry.tag == tag => entry.text.push_str(text),
            _ => {
                tracing::warn!(tag = ?tag, "delta arrived without an open entry");
                self.entries.push(TranscriptEntry {
                    tag,
                    text: text.to_string(),
                    open: true,
                });
            }
        }
    }

    fn close_open(&mut self) {
        if let Some(entry) = self.entries.last_mut() {
            entry.open = false;
        }
    }
}

pub fn export_file_name(now: DateTime<Local>) -> String {
    format!("chat_{}.txt", now.format("%Y-%m-%d-%H-%M-%S"))
}

pub fn write_export(dir: &Path, contents: &str, now: DateTime<Local>) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(export_file_name(now));
    std::fs::write(&path, contents)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn streamed_turn_renders_with_labels() {
        let mut transcript = Transcript::new();
        for event in [
            StreamEvent::UserEcho("Hello".into()),
            StreamEvent::AssistantStart,
            StreamEvent::AssistantDelta("Hi".into()),
            StreamEvent::AssistantDelta(" there".into()),
            StreamEvent::AssistantEnd,
            StreamEvent::UserEcho("Again".into()),
            StreamEvent::AssistantStart,
            StreamEvent::Error("connection refused".into()),
        ] {
            transcript.apply(&event);
        }

        assert_eq!(
            transcript.as_plain_text(),
            "You: Hello\n\nGPT: Hi there\n\nYou: Again\n\nGPT: \n\nERROR: connection refused\n\n"
        );
        assert!(transcript.entries().iter().all(|entry| !entry.open));
        assert_eq!(transcript.events().len(), 8);
    }

    #[test]
    fn clear_drops_entries_and_events() {
        let mut transcript = Transcript::new();
        transcript.apply(&StreamEvent::UserEcho("x".into()));
        transcript.clear();
        assert!(transcript.is_empty());
        assert!(transcript.events().is_empty());
        assert_eq!(transcript.as_plain_text(), "");
    }

    #[test]
    fn export_writes_timestamped_file() {
        let dir = tempfile::tempdir().unwrap();
        let now = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();

        let path = write_export(dir.path(), "You: hi\n\n", now).unwrap();

        assert_eq!(
            path.file_name().and_then(|name| name.to_str()),
            Some("chat_2024-03-09-14-05-07.txt")
        );
        assert_eq!(std::fs::read_to_string(path).unwrap(), "You: hi\n\n");
    }
}
