use crate::message::StreamTarget;

/// Per-session busy flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GateState {
    #[default]
    Idle,
    Busy(StreamTarget),
}

/// Rejection reason for illegal gate transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateRejection {
    AlreadyBusy {
        active: StreamTarget,
        attempted: StreamTarget,
    },
    NotBusy,
    TargetMismatch {
        active: StreamTarget,
        attempted: StreamTarget,
    },
}

/// Interactive controls a session exposes while idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlSet {
    pub send: bool,
    pub clear: bool,
    pub export: bool,
    pub translate: bool,
    pub record_transcribe: bool,
    pub record_translate: bool,
    pub model_selector: bool,
}

impl ControlSet {
    pub const fn uniform(enabled: bool) -> Self {
        Self {
            send: enabled,
            clear: enabled,
            export: enabled,
            translate: enabled,
            record_transcribe: enabled,
            record_translate: enabled,
            model_selector: enabled,
        }
    }

    pub fn as_array(&self) -> [bool; 7] {
        [
            self.send,
            self.clear,
            self.export,
            self.translate,
            self.record_transcribe,
            self.record_translate,
            self.model_selector,
        ]
    }

    pub fn all_enabled(&self) -> bool {
        self.as_array().iter().all(|enabled| *enabled)
    }

    pub fn all_disabled(&self) -> bool {
        self.as_array().iter().all(|enabled| !*enabled)
    }
}

impl Default for ControlSet {
    fn default() -> Self {
        Self::uniform(true)
    }
}

/// Serializes turns within one session and drives its control set.
///
/// Controls are fully disabled exactly while the gate is `Busy`; both flip together on
/// every transition.
#[derive(Debug, Clone, Default)]
pub struct SyncGate {
    state: GateState,
    controls: ControlSet,
    busy_transitions: u64,
    idle_transitions: u64,
}

impl SyncGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.state, GateState::Busy(_))
    }

    pub fn active_target(&self) -> Option<StreamTarget> {
        match self.state {
            GateState::Busy(target) => Some(target),
            GateState::Idle => None,
        }
    }

    pub fn controls(&self) -> ControlSet {
        self.controls
    }

    /// Number of Idle→Busy and Busy→Idle transitions seen so far.
    pub fn transition_counts(&self) -> (u64, u64) {
        (self.busy_transitions, self.idle_transitions)
    }

    pub fn acquire(&mut self, target: StreamTarget) -> Result<(), GateRejection> {
        match self.state {
            GateState::Busy(active) => Err(GateRejection::AlreadyBusy {
                active,
                attempted: target,
            }),
            GateState::Idle => {
                self.state = GateState::Busy(target);
                self.controls = ControlSet::uniform(false);
                self.busy_transitions += 1;
                Ok(())
            }
        }
    }

    /// Releases the gate for the turn that holds it. Any other target is rejected.
    pub fn release(&mut self, target: StreamTarget) -> Result<(), GateRejection> {
        match self.state {
            GateState::Busy(active) if active == target => {
                self.state = GateState::Idle;
                self.controls = ControlSet::uniform(true);
                self.idle_transitions += 1;
                Ok(())
            }
            GateState::Busy(active) => Err(GateRejection::TargetMismatch {
                active,
                attempted: target,
            }),
            GateState::Idle => Err(GateRejection::NotBusy),
        }
    }
}
