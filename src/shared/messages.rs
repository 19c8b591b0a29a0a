//! Message types sent from the worker threads to the presentation layer

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::Arc;

use crate::detect::{DetectionResult, Mode};

/// Events kept for a front end that is not draining the queue
pub const EVENT_QUEUE_CAPACITY: usize = 64;

/// Status line shown while a capture is being analyzed
pub const STATUS_DETECTING: &str = "Detecting...";
/// Status line shown when the live feed resumes
pub const STATUS_READY: &str = "Ready";
/// Status line shown when a capture was requested before any frame arrived
pub const STATUS_CAMERA_ERROR: &str = "Camera error";

/// Events for whatever front end is attached
#[derive(Debug, Clone)]
pub enum UiEvent {
    /// Replace the status line
    Status(String),
    /// A capture finished; carries the annotated image and summary
    DetectionFinished(Arc<DetectionResult>),
    /// The operator changed the mode
    ModeChanged(Mode),
    /// The camera stopped delivering frames
    CameraStopped(String),
}

/// Sending half of the event queue.
///
/// The queue is bounded; when it is full the oldest event is discarded, so a
/// front end that only polls [`RuntimeState`](super::RuntimeState) never
/// accumulates captured frames.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Sender<UiEvent>,
    rx: Receiver<UiEvent>,
}

impl EventSender {
    /// Create a queue and its sender
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self { tx, rx }
    }

    /// A receiver for the queue; clones share one queue
    pub fn subscribe(&self) -> Receiver<UiEvent> {
        self.rx.clone()
    }

    /// Queue an event, evicting the oldest one if the queue is full
    pub fn send(&self, event: UiEvent) {
        let mut event = event;
        loop {
            match self.tx.try_send(event) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    let _ = self.rx.try_recv();
                    event = back;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_queue_drops_oldest() {
        let events = EventSender::new(3);
        let rx = events.subscribe();

        for i in 0..10 {
            events.send(UiEvent::Status(format!("status {}", i)));
        }

        assert_eq!(rx.len(), 3);
        let kept: Vec<String> = rx
            .try_iter()
            .map(|event| match event {
                UiEvent::Status(status) => status,
                other => panic!("unexpected event {:?}", other),
            })
            .collect();
        assert_eq!(kept, vec!["status 7", "status 8", "status 9"]);
    }

    #[test]
    fn test_receiver_ends_when_senders_drop() {
        let events = EventSender::new(4);
        let rx = events.subscribe();
        events.send(UiEvent::ModeChanged(Mode::Offline));
        drop(events);

        assert!(matches!(rx.recv(), Ok(UiEvent::ModeChanged(Mode::Offline))));
        assert!(rx.recv().is_err());
    }
}
