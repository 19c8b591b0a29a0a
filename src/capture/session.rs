//! Live-feed buffer with the pause/resume capture toggle

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

use crate::capture::frame::CapturedFrame;

/// What a capture trigger did
#[derive(Debug, Clone)]
pub enum TriggerOutcome {
    /// Feed frozen; run detection on this snapshot
    Snapshot(CapturedFrame),
    /// Feed was paused and is now live again; no detection
    Resumed,
    /// No frame has arrived yet (camera error); no detection
    NoFrame,
    /// A detection for the previous snapshot is still running; nothing changed
    Busy,
}

impl TriggerOutcome {
    /// The snapshot to detect on, if any
    pub fn into_snapshot(self) -> Option<CapturedFrame> {
        match self {
            TriggerOutcome::Snapshot(frame) => Some(frame),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    paused: bool,
    detecting: bool,
    last_frame: Option<CapturedFrame>,
}

/// Holds the latest camera frame and the paused flag.
///
/// Cloning yields another handle to the same session. All state lives behind
/// one lock, so the ingestion loop and the trigger never observe each other
/// half-applied.
#[derive(Debug, Clone, Default)]
pub struct CaptureSession {
    state: Arc<Mutex<SessionState>>,
}

impl CaptureSession {
    /// Create an untouched session (live, no frame yet)
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a new camera frame. Returns false when the feed is paused or the
    /// frame is empty, and the frame was dropped.
    pub fn on_frame_arrived(&self, frame: CapturedFrame) -> bool {
        if frame.width() == 0 || frame.height() == 0 {
            debug!("Dropping empty camera frame");
            return false;
        }

        let mut state = self.state.lock();
        if state.paused {
            return false;
        }
        state.last_frame = Some(frame);
        true
    }

    /// Capture button: freeze and snapshot when live, resume when paused
    pub fn trigger(&self) -> TriggerOutcome {
        let mut state = self.state.lock();

        if state.detecting {
            debug!("Capture trigger ignored: detection still running");
            return TriggerOutcome::Busy;
        }

        if state.paused {
            state.paused = false;
            debug!("Capture session resumed");
            return TriggerOutcome::Resumed;
        }

        match state.last_frame.clone() {
            Some(frame) => {
                state.paused = true;
                state.detecting = true;
                debug!("Capture session paused on snapshot");
                TriggerOutcome::Snapshot(frame)
            }
            None => TriggerOutcome::NoFrame,
        }
    }

    /// Mark the in-flight detection as complete so the next trigger can resume
    pub fn finish_detection(&self) {
        self.state.lock().detecting = false;
    }

    /// Whether the live feed is frozen
    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /// Whether a detection is running for the current snapshot
    pub fn is_detecting(&self) -> bool {
        self.state.lock().detecting
    }

    /// Copy of the latest frame, for previews
    pub fn last_frame(&self) -> Option<CapturedFrame> {
        self.state.lock().last_frame.clone()
    }
}
