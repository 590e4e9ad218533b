use super::error::CaptureError;
use super::recording_result::RecordingResult;

/// Recorder state machine.
///
/// State transitions:
/// ```text
/// idle → recording → stopping → completed / failed
///   ↑                               │
///   └───────────── start ───────────┘
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum RecorderState {
    Idle,
    Recording,
    Stopping,
    Completed(Box<RecordingResult>),
    Failed(CaptureError),
}

impl RecorderState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed(_))
    }

    /// Whether a new recording may start from this state.
    pub fn can_start(&self) -> bool {
        self.is_idle() || self.is_terminal()
    }
}
