//! Speech Announcements
//!
//! Detection summaries reach the speech engine through an
//! [`AnnouncementChannel`]: a single slot where the newest message replaces
//! any message not yet picked up. A dedicated worker thread drains the slot
//! and speaks one utterance at a time.

pub mod engine;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

pub use engine::{CommandSpeech, LogSpeech, SpeechEngine};

/// Build the spoken summary: `Objects: a, b\nText: c` with `None` for empty lists
pub fn format_announcement<S: AsRef<str>>(objects: &[S], texts: &[S]) -> String {
    fn join<S: AsRef<str>>(items: &[S]) -> String {
        if items.is_empty() {
            "None".to_string()
        } else {
            items.iter().map(|s| s.as_ref()).collect::<Vec<_>>().join(", ")
        }
    }

    format!("Objects: {}\nText: {}", join(objects), join(texts))
}

/// What sits in the announcement slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Announcement {
    /// Speak this text
    Speak(String),
    /// Stop the speech consumer
    Shutdown,
}

/// Result of polling the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Consumed {
    /// A message to speak
    Message(String),
    /// Nothing pending
    Empty,
    /// Shutdown requested; stop polling
    Shutdown,
}

/// Single-slot, latest-wins handoff from detection to speech.
///
/// Clones share the same slot.
#[derive(Debug, Clone)]
pub struct AnnouncementChannel {
    tx: Sender<Announcement>,
    rx: Receiver<Announcement>,
    // Held across drain-then-send; true once shutdown was published
    shut_down: Arc<Mutex<bool>>,
}

impl Default for AnnouncementChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl AnnouncementChannel {
    pub fn new() -> Self {
        let (tx, rx) = bounded(1);
        Self {
            tx,
            rx,
            shut_down: Arc::new(Mutex::new(false)),
        }
    }

    /// Replace whatever is pending with `message`
    pub fn publish(&self, message: impl Into<String>) {
        self.put(Announcement::Speak(message.into()));
    }

    /// Replace whatever is pending with the shutdown sentinel. Later
    /// publishes are ignored.
    pub fn shutdown(&self) {
        self.put(Announcement::Shutdown);
    }

    /// Whether shutdown has been requested
    pub fn is_shut_down(&self) -> bool {
        *self.shut_down.lock()
    }

    fn put(&self, announcement: Announcement) {
        let mut shut_down = self.shut_down.lock();
        if *shut_down {
            debug!("Announcement dropped after shutdown");
            return;
        }
        if announcement == Announcement::Shutdown {
            *shut_down = true;
        }

        let mut pending = announcement;
        loop {
            while let Ok(stale) = self.rx.try_recv() {
                debug!("Superseded unspoken announcement: {:?}", stale);
            }
            match self.tx.try_send(pending) {
                Ok(()) => break,
                Err(TrySendError::Full(back)) => pending = back,
                Err(TrySendError::Disconnected(_)) => break,
            }
        }
    }

    /// Whether something is waiting to be consumed
    pub fn has_pending(&self) -> bool {
        !self.rx.is_empty()
    }

    /// Non-blocking poll: take the pending message, if any
    pub fn consume(&self) -> Consumed {
        match self.rx.try_recv() {
            Ok(announcement) => announcement.into(),
            Err(TryRecvError::Empty) => Consumed::Empty,
            Err(TryRecvError::Disconnected) => Consumed::Shutdown,
        }
    }

    /// Like [`consume`](Self::consume), but waits up to `timeout` for a message
    pub fn consume_timeout(&self, timeout: Duration) -> Consumed {
        match self.rx.recv_timeout(timeout) {
            Ok(announcement) => announcement.into(),
            Err(RecvTimeoutError::Timeout) => Consumed::Empty,
            Err(RecvTimeoutError::Disconnected) => Consumed::Shutdown,
        }
    }
}

impl From<Announcement> for Consumed {
    fn from(announcement: Announcement) -> Self {
        match announcement {
            Announcement::Speak(text) => Consumed::Message(text),
            Announcement::Shutdown => Consumed::Shutdown,
        }
    }
}

/// Speech consumer running on its own thread
pub struct SpeechWorker {
    handle: Option<JoinHandle<()>>,
    channel: AnnouncementChannel,
}

impl SpeechWorker {
    /// Spawn the worker. It polls `channel` every `poll_interval` and speaks
    /// each message to completion before taking the next.
    pub fn spawn(
        channel: AnnouncementChannel,
        mut engine: Box<dyn SpeechEngine>,
        poll_interval: Duration,
    ) -> std::io::Result<Self> {
        let rx = channel.clone();
        let handle = std::thread::Builder::new()
            .name("speech".to_string())
            .spawn(move || {
                info!("Speech worker started ({})", engine.name());
                loop {
                    match rx.consume_timeout(poll_interval) {
                        Consumed::Message(text) => {
                            debug!("Speaking: {:?}", text);
                            if let Err(e) = engine.speak(&text) {
                                warn!("Speech failed: {:#}", e);
                            }
                        }
                        Consumed::Empty => {}
                        Consumed::Shutdown => break,
                    }
                }
                info!("Speech worker exiting");
            })?;

        Ok(Self {
            handle: Some(handle),
            channel,
        })
    }

    /// Send the shutdown sentinel and wait for the current utterance to end
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.channel.shutdown();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Speech worker panicked");
            }
        }
    }
}

impl Drop for SpeechWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_format_announcement() {
        let none: [&str; 0] = [];
        assert_eq!(format_announcement(&none, &["A", "B"]), "Objects: None\nText: A, B");
        assert_eq!(format_announcement(&["DOG"], &none), "Objects: DOG\nText: None");
        assert_eq!(format_announcement(&["cat", "dog"], &["STOP"]), "Objects: cat, dog\nText: STOP");
    }

    #[test]
    fn test_latest_message_wins() {
        let channel = AnnouncementChannel::new();
        channel.publish("A");
        channel.publish("B");

        assert!(channel.has_pending());
        assert_eq!(channel.consume(), Consumed::Message("B".to_string()));
        assert_eq!(channel.consume(), Consumed::Empty);
        assert!(!channel.has_pending());
    }

    #[test]
    fn test_consume_on_fresh_channel_is_empty() {
        let channel = AnnouncementChannel::new();
        assert_eq!(channel.consume(), Consumed::Empty);
        assert_eq!(channel.consume_timeout(Duration::from_millis(10)), Consumed::Empty);
    }

    #[test]
    fn test_shutdown_supersedes_pending_and_sticks() {
        let channel = AnnouncementChannel::new();
        channel.publish("stale");
        channel.shutdown();
        channel.publish("too late");

        assert!(channel.is_shut_down());
        assert_eq!(channel.consume(), Consumed::Shutdown);
        assert_eq!(channel.consume(), Consumed::Empty);
    }

    /// Engine that blocks until released, recording what it spoke
    struct GatedSpeech {
        spoken: Arc<Mutex<Vec<String>>>,
        gate: Receiver<()>,
        started: Sender<()>,
    }

    impl SpeechEngine for GatedSpeech {
        fn name(&self) -> &'static str {
            "gated"
        }

        fn speak(&mut self, text: &str) -> anyhow::Result<()> {
            let _ = self.started.send(());
            let _ = self.gate.recv_timeout(Duration::from_secs(5));
            self.spoken.lock().push(text.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_publish_during_utterance_becomes_next_utterance() {
        let channel = AnnouncementChannel::new();
        let spoken = Arc::new(Mutex::new(Vec::new()));
        let (gate_tx, gate_rx) = bounded(0);
        let (started_tx, started_rx) = crossbeam_channel::unbounded();

        let worker = SpeechWorker::spawn(
            channel.clone(),
            Box::new(GatedSpeech {
                spoken: spoken.clone(),
                gate: gate_rx,
                started: started_tx,
            }),
            Duration::from_millis(5),
        )
        .unwrap();

        channel.publish("first");
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // Mid-utterance: these overwrite each other, only the last survives
        channel.publish("second");
        channel.publish("third");
        gate_tx.send(()).unwrap();

        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        gate_tx.send(()).unwrap();

        worker.shutdown();
        assert_eq!(*spoken.lock(), vec!["first".to_string(), "third".to_string()]);
    }

    struct FailingSpeech {
        attempted: Arc<AtomicBool>,
    }

    impl SpeechEngine for FailingSpeech {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn speak(&mut self, _text: &str) -> anyhow::Result<()> {
            self.attempted.store(true, Ordering::SeqCst);
            Err(anyhow::anyhow!("audio device missing"))
        }
    }

    #[test]
    fn test_speech_failure_is_swallowed() {
        let channel = AnnouncementChannel::new();
        let attempted = Arc::new(AtomicBool::new(false));
        let worker = SpeechWorker::spawn(
            channel.clone(),
            Box::new(FailingSpeech {
                attempted: attempted.clone(),
            }),
            Duration::from_millis(5),
        )
        .unwrap();

        channel.publish("hello");
        for _ in 0..200 {
            if attempted.load(Ordering::SeqCst) {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }

        // Worker survived the failure and still honors shutdown
        worker.shutdown();
        assert!(attempted.load(Ordering::SeqCst));
    }
}
