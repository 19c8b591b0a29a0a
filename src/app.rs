//! Application Coordinator
//!
//! Wires the camera, capture session, detection orchestrator and speech
//! worker together and owns their threads:
//!
//! - camera thread: polls the [`CameraSource`] into the [`CaptureSession`]
//! - detection thread: runs the orchestrator on each snapshot
//! - speech thread: speaks announcements (see [`SpeechWorker`])
//!
//! Front ends drive it through [`VisionApp::trigger`] and
//! [`VisionApp::toggle_mode`] and listen on [`VisionApp::events`].

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::capture::frame::CapturedFrame;
use crate::capture::{CameraSource, CaptureConfig, CaptureSession, FileCamera, TriggerOutcome};
use crate::cloud::build_online_backends;
use crate::config::{AppConfig, OverlaySettings};
use crate::detect::render::LabelFont;
use crate::detect::{DetectionOrchestrator, Mode, SharedMode, TcpProbe};
use crate::shared::messages::{
    EVENT_QUEUE_CAPACITY, STATUS_CAMERA_ERROR, STATUS_DETECTING, STATUS_READY,
};
use crate::shared::{EventSender, RuntimeState, UiEvent};
use crate::speech::{AnnouncementChannel, CommandSpeech, LogSpeech, SpeechEngine, SpeechWorker};
use crate::vision::build_offline_backends;

/// Worker cadence settings
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    /// Camera poll interval
    pub frame_interval: Duration,
    /// Speech worker poll interval
    pub speech_poll: Duration,
}

/// Main application coordinator
pub struct VisionApp {
    session: CaptureSession,
    mode: SharedMode,
    announcements: AnnouncementChannel,
    state: Arc<RwLock<RuntimeState>>,
    events: EventSender,
    snapshots: Option<Sender<CapturedFrame>>,
    stop: Arc<AtomicBool>,
    camera_handle: Option<JoinHandle<()>>,
    detection_handle: Option<JoinHandle<()>>,
    speech: Option<SpeechWorker>,
}

impl VisionApp {
    /// Build every component from configuration and start the workers
    pub fn from_config(config: &AppConfig, speak: bool) -> Result<Self> {
        let camera = FileCamera::open(&CaptureConfig::from(&config.capture))
            .context("Failed to open camera")?;

        let mode = SharedMode::new(config.detection.mode);
        let probe = TcpProbe::new(config.detection.probe_host.clone(), config.detection.probe_port);
        let orchestrator = DetectionOrchestrator::new(
            mode,
            Box::new(probe),
            build_online_backends(&config.cloud),
            build_offline_backends(&config.local),
        )
        .with_probe_timeout(Duration::from_millis(config.detection.probe_timeout_ms))
        .with_text_confidence_floor(config.detection.text_confidence_floor)
        .with_label_font(load_label_font(&config.overlay));

        let engine: Box<dyn SpeechEngine> = if speak && config.speech.enabled {
            Box::new(CommandSpeech::new(
                config.speech.command.clone(),
                config.speech.args.clone(),
            ))
        } else {
            Box::new(LogSpeech)
        };

        let timing = Timing {
            frame_interval: Duration::from_millis(config.capture.frame_interval_ms),
            speech_poll: Duration::from_millis(config.speech.poll_interval_ms),
        };

        Self::start(Box::new(camera), orchestrator, engine, timing)
    }

    /// Start the workers around already-built components
    pub fn start(
        camera: Box<dyn CameraSource>,
        orchestrator: DetectionOrchestrator,
        engine: Box<dyn SpeechEngine>,
        timing: Timing,
    ) -> Result<Self> {
        let session = CaptureSession::new();
        let mode = orchestrator.mode().clone();
        let announcements = AnnouncementChannel::new();
        let state = Arc::new(RwLock::new(RuntimeState::new(mode.get())));
        let events = EventSender::new(EVENT_QUEUE_CAPACITY);
        let (snapshot_tx, snapshot_rx) = unbounded();
        let stop = Arc::new(AtomicBool::new(false));

        let speech = SpeechWorker::spawn(announcements.clone(), engine, timing.speech_poll)
            .context("Failed to spawn speech worker")?;

        let camera_handle = spawn_camera_loop(
            camera,
            session.clone(),
            state.clone(),
            events.clone(),
            stop.clone(),
            timing.frame_interval,
        )?;

        let detection_handle = match spawn_detection_loop(
            orchestrator,
            snapshot_rx,
            session.clone(),
            state.clone(),
            events.clone(),
            announcements.clone(),
        ) {
            Ok(handle) => handle,
            Err(e) => {
                stop_camera(&stop, camera_handle);
                speech.shutdown();
                return Err(e);
            }
        };

        info!("Vision app started in {} mode", mode.get());

        Ok(Self {
            session,
            mode,
            announcements,
            state,
            events,
            snapshots: Some(snapshot_tx),
            stop,
            camera_handle: Some(camera_handle),
            detection_handle: Some(detection_handle),
            speech: Some(speech),
        })
    }

    /// Capture button: snapshot and detect when live, resume when paused
    pub fn trigger(&self) -> TriggerOutcome {
        let outcome = self.session.trigger();

        match &outcome {
            TriggerOutcome::Snapshot(frame) => {
                {
                    let mut state = self.state.write();
                    state.paused = true;
                    state.detecting = true;
                    state.clear_error();
                }
                self.emit(UiEvent::Status(STATUS_DETECTING.to_string()));

                let queued = self
                    .snapshots
                    .as_ref()
                    .map(|tx| tx.send(frame.clone()).is_ok())
                    .unwrap_or(false);
                if !queued {
                    warn!("Detection worker is gone; dropping snapshot");
                    self.session.finish_detection();
                    self.state.write().detecting = false;
                }
            }
            TriggerOutcome::Resumed => {
                self.state.write().paused = false;
                self.emit(UiEvent::Status(STATUS_READY.to_string()));
            }
            TriggerOutcome::NoFrame => {
                warn!("Capture requested before any camera frame arrived");
                self.state.write().set_error(STATUS_CAMERA_ERROR);
                self.emit(UiEvent::Status(STATUS_CAMERA_ERROR.to_string()));
            }
            TriggerOutcome::Busy => {}
        }

        outcome
    }

    /// Advance the mode; applies from the next capture on
    pub fn toggle_mode(&self) -> Mode {
        let mode = self.mode.toggle();
        self.state.write().mode = mode;
        self.emit(UiEvent::ModeChanged(mode));
        mode
    }

    pub fn mode(&self) -> Mode {
        self.mode.get()
    }

    /// Receiver for worker events; clones share one bounded queue
    pub fn events(&self) -> Receiver<UiEvent> {
        self.events.subscribe()
    }

    /// Snapshot of the runtime state
    pub fn state(&self) -> RuntimeState {
        self.state.read().clone()
    }

    pub fn session(&self) -> &CaptureSession {
        &self.session
    }

    pub fn announcements(&self) -> &AnnouncementChannel {
        &self.announcements
    }

    /// Stop all workers, releasing the camera
    pub fn shutdown(mut self) {
        self.stop_workers();
    }

    fn emit(&self, event: UiEvent) {
        self.events.send(event);
    }

    fn stop_workers(&mut self) {
        self.stop.store(true, Ordering::SeqCst);

        if let Some(handle) = self.camera_handle.take() {
            stop_camera(&self.stop, handle);
        }

        if let Some(speech) = self.speech.take() {
            speech.shutdown();
        }

        // Closing the snapshot queue ends the detection loop
        self.snapshots.take();
        if let Some(handle) = self.detection_handle.take() {
            if handle.join().is_err() {
                warn!("Detection thread panicked");
            }
        }

        debug!("All workers stopped");
    }
}

impl Drop for VisionApp {
    fn drop(&mut self) {
        self.stop_workers();
    }
}

/// Label font from the overlay settings; labels are skipped if it cannot load
fn load_label_font(settings: &OverlaySettings) -> Option<LabelFont> {
    let path = settings.font_path.as_ref()?;
    match LabelFont::load(path, settings.object_label_size, settings.text_label_size) {
        Ok(font) => {
            info!("Loaded label font {:?}", path);
            Some(font)
        }
        Err(e) => {
            warn!("Drawing detections without labels: {:#}", e);
            None
        }
    }
}

/// Signal the camera loop to stop and wait for it to release the camera
fn stop_camera(stop: &AtomicBool, handle: JoinHandle<()>) {
    stop.store(true, Ordering::SeqCst);
    if handle.join().is_err() {
        warn!("Camera thread panicked");
    }
}

/// Consecutive failed reads after which the feed is considered gone
const MAX_CONSECUTIVE_MISSES: u32 = 50;

fn spawn_camera_loop(
    mut camera: Box<dyn CameraSource>,
    session: CaptureSession,
    state: Arc<RwLock<RuntimeState>>,
    events: EventSender,
    stop: Arc<AtomicBool>,
    interval: Duration,
) -> Result<JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name("camera".to_string())
        .spawn(move || {
            info!("Camera thread starting...");
            let mut misses = 0u32;
            while !stop.load(Ordering::SeqCst) {
                match camera.read_frame() {
                    Ok(frame) => {
                        misses = 0;
                        session.on_frame_arrived(frame);
                    }
                    Err(e) => {
                        misses += 1;
                        debug!("Camera frame missed ({}): {:#}", misses, e);
                        if misses >= MAX_CONSECUTIVE_MISSES {
                            warn!("Camera read failed {} times in a row, stopping feed: {:#}", misses, e);
                            state.write().camera_running = false;
                            events.send(UiEvent::CameraStopped(format!("{:#}", e)));
                            break;
                        }
                    }
                }
                std::thread::sleep(interval);
            }
            camera.release();
            info!("Camera thread exiting...");
        })
        .context("Failed to spawn camera thread")?;
    Ok(handle)
}

fn spawn_detection_loop(
    mut orchestrator: DetectionOrchestrator,
    snapshots: Receiver<CapturedFrame>,
    session: CaptureSession,
    state: Arc<RwLock<RuntimeState>>,
    events: EventSender,
    announcements: AnnouncementChannel,
) -> Result<JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name("detection".to_string())
        .spawn(move || {
            info!("Detection thread starting...");
            for frame in snapshots {
                let run = panic::catch_unwind(AssertUnwindSafe(|| orchestrator.run(&frame)));
                session.finish_detection();
                let result = match run {
                    Ok(result) => result,
                    Err(_) => {
                        error!("Detection pipeline panicked; snapshot discarded");
                        state.write().detecting = false;
                        events.send(UiEvent::Status("Detection failed".to_string()));
                        continue;
                    }
                };
                let message = result.announcement();

                {
                    let mut state = state.write();
                    state.detecting = false;
                    state.last_backend = Some(result.backend_used);
                    state.last_message = Some(message.clone());
                    state.captures_completed += 1;
                }

                announcements.publish(message.clone());
                events.send(UiEvent::Status(message));
                events.send(UiEvent::DetectionFinished(Arc::new(result)));
            }
            info!("Detection thread exiting...");
        })
        .context("Failed to spawn detection thread")?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{
        Backend, BackendPair, BoundingBox, ConnectivityProbe, CoordinateSpace, DetectionResult,
        ObjectDetector, RawObject, RawText, TextDetector,
    };
    use image::{Rgba, RgbaImage};
    use parking_lot::Mutex;
    use std::time::Instant;

    struct FixedProbe(bool);

    impl ConnectivityProbe for FixedProbe {
        fn is_available(&self, _timeout: Duration) -> bool {
            self.0
        }
    }

    struct FixedObjects(&'static str);

    impl ObjectDetector for FixedObjects {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn detect(&mut self, _image: &RgbaImage) -> anyhow::Result<Vec<RawObject>> {
            Ok(vec![RawObject {
                label: self.0.to_string(),
                bbox: BoundingBox::new(0.1, 0.1, 0.5, 0.5),
                space: CoordinateSpace::Normalized,
                confidence: 0.9,
            }])
        }
    }

    struct NoTexts;

    impl TextDetector for NoTexts {
        fn name(&self) -> &'static str {
            "none"
        }

        fn detect(&mut self, _image: &RgbaImage) -> anyhow::Result<Vec<RawText>> {
            Ok(Vec::new())
        }
    }

    struct RecordingSpeech(Arc<Mutex<Vec<String>>>);

    impl SpeechEngine for RecordingSpeech {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn speak(&mut self, text: &str) -> anyhow::Result<()> {
            self.0.lock().push(text.to_string());
            Ok(())
        }
    }

    struct PanickingTexts;

    impl TextDetector for PanickingTexts {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn detect(&mut self, _image: &RgbaImage) -> anyhow::Result<Vec<RawText>> {
            panic!("attempt to subtract with overflow");
        }
    }

    /// Records each utterance, then blocks until the gate opens or closes
    struct GatedSpeech {
        spoken: Arc<Mutex<Vec<String>>>,
        gate: Receiver<()>,
    }

    impl SpeechEngine for GatedSpeech {
        fn name(&self) -> &'static str {
            "gated"
        }

        fn speak(&mut self, text: &str) -> anyhow::Result<()> {
            self.spoken.lock().push(text.to_string());
            let _ = self.gate.recv_timeout(Duration::from_secs(5));
            Ok(())
        }
    }

    fn start_app(mode: Mode, camera: FileCamera, spoken: Arc<Mutex<Vec<String>>>) -> VisionApp {
        start_app_with(mode, camera, Box::new(RecordingSpeech(spoken)), Box::new(NoTexts))
    }

    fn start_app_with(
        mode: Mode,
        camera: FileCamera,
        engine: Box<dyn SpeechEngine>,
        offline_texts: Box<dyn TextDetector>,
    ) -> VisionApp {
        let orchestrator = DetectionOrchestrator::new(
            SharedMode::new(mode),
            Box::new(FixedProbe(false)),
            BackendPair::new(Box::new(FixedObjects("CLOUD-DOG")), Box::new(NoTexts)),
            BackendPair::new(Box::new(FixedObjects("DOG")), offline_texts),
        );
        let timing = Timing {
            frame_interval: Duration::from_millis(2),
            speech_poll: Duration::from_millis(5),
        };
        VisionApp::start(Box::new(camera), orchestrator, engine, timing).unwrap()
    }

    fn camera() -> FileCamera {
        FileCamera::from_frames(vec![CapturedFrame::new(RgbaImage::from_pixel(
            20,
            10,
            Rgba([10, 10, 10, 255]),
        ))])
    }

    fn wait_for_frame(app: &VisionApp) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while app.session().last_frame().is_none() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    fn next_finished(events: &Receiver<UiEvent>) -> Arc<DetectionResult> {
        loop {
            match events.recv_timeout(Duration::from_secs(5)).unwrap() {
                UiEvent::DetectionFinished(result) => return result,
                _ => continue,
            }
        }
    }

    #[test]
    fn test_capture_cycle_end_to_end() {
        let spoken = Arc::new(Mutex::new(Vec::new()));
        let app = start_app(Mode::Auto, camera(), spoken.clone());
        let events = app.events();
        wait_for_frame(&app);

        assert!(matches!(app.trigger(), TriggerOutcome::Snapshot(_)));
        assert!(matches!(
            events.recv_timeout(Duration::from_secs(5)).unwrap(),
            UiEvent::Status(ref s) if s == STATUS_DETECTING
        ));

        let result = next_finished(&events);
        assert_eq!(result.backend_used, Backend::Offline);
        assert_eq!(result.announcement(), "Objects: DOG\nText: None");
        assert_eq!(result.objects.len(), 1);

        let state = app.state();
        assert!(state.paused);
        assert!(!state.detecting);
        assert_eq!(state.captures_completed, 1);
        assert_eq!(state.last_backend, Some(Backend::Offline));

        // Second press resumes the live feed without detecting
        assert!(matches!(app.trigger(), TriggerOutcome::Resumed));
        assert!(!app.session().is_paused());
        assert!(!app.session().is_detecting());
        std::thread::sleep(Duration::from_millis(100));
        assert!(events
            .try_iter()
            .all(|event| !matches!(event, UiEvent::DetectionFinished(_))));
        assert_eq!(app.state().captures_completed, 1);

        let deadline = Instant::now() + Duration::from_secs(5);
        while spoken.lock().is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        app.shutdown();
        assert_eq!(*spoken.lock(), vec!["Objects: DOG\nText: None".to_string()]);
    }

    #[test]
    fn test_toggle_mode_applies_to_next_capture() {
        let spoken = Arc::new(Mutex::new(Vec::new()));
        let app = start_app(Mode::Auto, camera(), spoken);
        let events = app.events();
        wait_for_frame(&app);

        assert_eq!(app.toggle_mode(), Mode::Online);
        assert_eq!(app.state().mode, Mode::Online);

        assert!(matches!(app.trigger(), TriggerOutcome::Snapshot(_)));
        let result = next_finished(&events);
        assert_eq!(result.backend_used, Backend::Online);
        assert_eq!(result.mode, Mode::Online);
        assert_eq!(result.object_labels(), vec!["CLOUD-DOG"]);
    }

    #[test]
    fn test_trigger_without_frame_reports_camera_error() {
        let spoken = Arc::new(Mutex::new(Vec::new()));
        let app = start_app(Mode::Offline, FileCamera::from_frames(Vec::new()), spoken);
        let events = app.events();

        assert!(matches!(app.trigger(), TriggerOutcome::NoFrame));
        assert!(!app.session().is_paused());
        assert_eq!(app.state().last_error.as_deref(), Some(STATUS_CAMERA_ERROR));

        let mut saw_camera_error = false;
        while let Ok(event) = events.recv_timeout(Duration::from_millis(200)) {
            match event {
                UiEvent::Status(ref s) if s == STATUS_CAMERA_ERROR => saw_camera_error = true,
                UiEvent::DetectionFinished(_) => panic!("detection ran without a frame"),
                _ => {}
            }
        }
        assert!(saw_camera_error);
        assert_eq!(app.state().captures_completed, 0);
        assert!(!app.session().is_detecting());
    }

    #[test]
    fn test_panicking_backend_does_not_block_capture() {
        let spoken = Arc::new(Mutex::new(Vec::new()));
        let app = start_app_with(
            Mode::Offline,
            camera(),
            Box::new(RecordingSpeech(spoken)),
            Box::new(PanickingTexts),
        );
        let events = app.events();
        wait_for_frame(&app);

        assert!(matches!(app.trigger(), TriggerOutcome::Snapshot(_)));
        let result = next_finished(&events);
        assert_eq!(result.object_labels(), vec!["DOG"]);
        assert!(result.texts.is_empty());

        assert!(matches!(app.trigger(), TriggerOutcome::Resumed));
        wait_for_frame(&app);
        assert!(matches!(app.trigger(), TriggerOutcome::Snapshot(_)));
        assert_eq!(next_finished(&events).object_labels(), vec!["DOG"]);
        assert_eq!(app.state().captures_completed, 2);
    }

    #[test]
    fn test_announcement_published_before_result_event() {
        let spoken = Arc::new(Mutex::new(Vec::new()));
        let (gate_tx, gate_rx) = crossbeam_channel::bounded(0);
        let engine = GatedSpeech {
            spoken: spoken.clone(),
            gate: gate_rx,
        };
        let app = start_app_with(Mode::Offline, camera(), Box::new(engine), Box::new(NoTexts));
        let events = app.events();
        wait_for_frame(&app);

        // First announcement keeps the speech worker busy
        assert!(matches!(app.trigger(), TriggerOutcome::Snapshot(_)));
        next_finished(&events);
        let deadline = Instant::now() + Duration::from_secs(5);
        while spoken.lock().is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(spoken.lock().len(), 1);

        assert!(matches!(app.trigger(), TriggerOutcome::Resumed));
        assert!(matches!(app.trigger(), TriggerOutcome::Snapshot(_)));
        next_finished(&events);
        assert!(app.announcements().has_pending());

        drop(gate_tx);
        app.shutdown();
    }

    struct ReleaseTracking {
        released: Arc<AtomicBool>,
    }

    impl CameraSource for ReleaseTracking {
        fn read_frame(&mut self) -> anyhow::Result<CapturedFrame> {
            Ok(CapturedFrame::new(RgbaImage::new(4, 4)))
        }

        fn release(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_stop_camera_joins_and_releases() {
        let released = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));
        let handle = spawn_camera_loop(
            Box::new(ReleaseTracking {
                released: released.clone(),
            }),
            CaptureSession::new(),
            Arc::new(RwLock::new(RuntimeState::new(Mode::Auto))),
            EventSender::new(4),
            stop.clone(),
            Duration::from_millis(2),
        )
        .unwrap();

        stop_camera(&stop, handle);

        assert!(stop.load(Ordering::SeqCst));
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_shutdown_releases_camera_and_stops_speech() {
        let spoken = Arc::new(Mutex::new(Vec::new()));
        let app = start_app(Mode::Offline, camera(), spoken);
        let announcements = app.announcements().clone();
        wait_for_frame(&app);

        app.shutdown();
        assert!(announcements.is_shut_down());
    }
}
