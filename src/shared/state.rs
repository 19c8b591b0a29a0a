//! Runtime state visible to the presentation layer

use crate::detect::{Backend, Mode};

/// Snapshot of what the workers are doing, updated as events happen
#[derive(Debug, Clone, Default)]
pub struct RuntimeState {
    /// Mode that the next capture will use
    pub mode: Mode,
    /// Whether the live feed is frozen on a snapshot
    pub paused: bool,
    /// Whether a detection is in flight
    pub detecting: bool,
    /// Whether the camera is still delivering frames
    pub camera_running: bool,
    /// Backend used by the most recent capture
    pub last_backend: Option<Backend>,
    /// Announcement of the most recent capture
    pub last_message: Option<String>,
    /// Completed captures since start
    pub captures_completed: u64,
    /// Last error message (if any)
    pub last_error: Option<String>,
}

impl RuntimeState {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            camera_running: true,
            ..Default::default()
        }
    }

    /// Clear any error state
    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// Set an error message
    pub fn set_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }

    /// One-line summary for status displays
    pub fn summary(&self) -> String {
        let activity = if self.detecting {
            "detecting"
        } else if self.paused {
            "paused"
        } else {
            "live"
        };

        let mut line = format!(
            "mode={} state={} captures={}",
            self.mode, activity, self.captures_completed
        );
        if let Some(backend) = self.last_backend {
            line.push_str(&format!(" last_backend={}", backend));
        }
        if !self.camera_running {
            line.push_str(" camera=stopped");
        }
        if let Some(error) = &self.last_error {
            line.push_str(&format!(" error={:?}", error));
        }
        line
    }
}
