//! Application Configuration
//!
//! User settings stored in TOML format.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::detect::Mode;

/// Environment variable consulted when no cloud API key is configured
pub const API_KEY_ENV: &str = "VISION_CAPTURE_API_KEY";

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Backend selection and merging
    pub detection: DetectionSettings,
    /// Camera settings
    pub capture: CaptureSettings,
    /// Local (offline) backend settings
    pub local: LocalSettings,
    /// Cloud (online) backend settings
    pub cloud: CloudSettings,
    /// Speech settings
    pub speech: SpeechSettings,
    /// Annotated frame settings
    pub overlay: OverlaySettings,
}

/// Backend selection and merge settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// Mode at startup
    pub mode: Mode,
    /// Text detections must score strictly above this
    pub text_confidence_floor: f32,
    /// Host used by the connectivity probe
    pub probe_host: String,
    /// Port used by the connectivity probe
    pub probe_port: u16,
    /// Probe deadline in milliseconds
    pub probe_timeout_ms: u64,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            mode: Mode::Auto,
            text_confidence_floor: 0.4,
            probe_host: "google.com".to_string(),
            probe_port: 443,
            probe_timeout_ms: 2000,
        }
    }
}

/// Camera settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Image file or directory replayed as the camera feed
    pub source: Option<PathBuf>,
    /// Interval between frame reads
    pub frame_interval_ms: u64,
    /// Frame width (0 keeps the source width)
    pub width: u32,
    /// Frame height (0 keeps the source height)
    pub height: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            source: None,
            frame_interval_ms: 30,
            width: 640,
            height: 480,
        }
    }
}

/// Local backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSettings {
    /// YOLOv8 ONNX export used for object detection
    pub detector_model: Option<PathBuf>,
    /// Minimum object class score kept by the detector
    pub object_confidence: f32,
    /// IoU above which overlapping boxes of one class are suppressed
    pub iou_threshold: f32,
    /// Probability-map threshold for the OCR text detector
    pub det_threshold: f32,
    /// Minimum mean probability for an OCR text box
    pub box_threshold: f32,
    /// Try GPU execution providers
    pub use_gpu: bool,
    /// Override for the OCR model cache directory
    pub models_dir: Option<PathBuf>,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            detector_model: None,
            object_confidence: 0.25,
            iou_threshold: 0.45,
            det_threshold: 0.3,
            box_threshold: 0.6,
            use_gpu: false,
            models_dir: None,
        }
    }
}

/// Cloud backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudSettings {
    /// images:annotate endpoint
    pub endpoint: String,
    /// API key; falls back to the VISION_CAPTURE_API_KEY environment variable
    pub api_key: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// JPEG quality used for uploads
    pub jpeg_quality: u8,
}

impl Default for CloudSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://vision.googleapis.com/v1/images:annotate".to_string(),
            api_key: None,
            timeout_secs: 15,
            jpeg_quality: 85,
        }
    }
}

impl CloudSettings {
    /// Configured API key, or the one from the environment
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| std::env::var(API_KEY_ENV).ok().filter(|key| !key.trim().is_empty()))
    }
}

/// Speech settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechSettings {
    /// Speak announcements (otherwise they are only logged)
    pub enabled: bool,
    /// TTS program taking the utterance as its last argument
    pub command: String,
    /// Extra arguments placed before the utterance
    pub args: Vec<String>,
    /// How often the speech worker polls for a new announcement
    pub poll_interval_ms: u64,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            command: "espeak".to_string(),
            args: Vec::new(),
            poll_interval_ms: 100,
        }
    }
}

/// Annotated frame settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlaySettings {
    /// TrueType/OpenType font for detection labels; no labels when unset
    pub font_path: Option<PathBuf>,
    /// Object label height in pixels
    pub object_label_size: f32,
    /// Text label height in pixels
    pub text_label_size: f32,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            font_path: None,
            object_label_size: 18.0,
            text_label_size: 15.0,
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {:?}", path))?;
    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config {:?}", path))?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();

        assert_eq!(config.detection.mode, Mode::Auto);
        assert!((config.detection.text_confidence_floor - 0.4).abs() < 1e-6);
        assert_eq!(config.detection.probe_host, "google.com");
        assert_eq!(config.detection.probe_timeout_ms, 2000);

        assert!(config.capture.source.is_none());
        assert_eq!(config.capture.frame_interval_ms, 30);
        assert_eq!((config.capture.width, config.capture.height), (640, 480));

        assert!(config.local.detector_model.is_none());
        assert!((config.local.iou_threshold - 0.45).abs() < 1e-6);

        assert_eq!(config.cloud.jpeg_quality, 85);
        assert!(config.speech.enabled);
        assert_eq!(config.speech.poll_interval_ms, 100);

        assert!(config.overlay.font_path.is_none());
        assert!((config.overlay.object_label_size - 18.0).abs() < 1e-6);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: AppConfig = toml::from_str(
            r#"
            [detection]
            mode = "offline"

            [speech]
            command = "say"

            [overlay]
            font_path = "/usr/share/fonts/label.ttf"
            "#,
        )
        .unwrap();

        assert_eq!(parsed.detection.mode, Mode::Offline);
        assert_eq!(parsed.detection.probe_port, 443);
        assert_eq!(parsed.speech.command, "say");
        assert!(parsed.speech.enabled);
        assert_eq!(parsed.capture.frame_interval_ms, 30);
        assert_eq!(
            parsed.overlay.font_path,
            Some(PathBuf::from("/usr/share/fonts/label.ttf"))
        );
        assert!((parsed.overlay.text_label_size - 15.0).abs() < 1e-6);
    }

    #[test]
    fn test_save_and_load_config() {
        let mut config = AppConfig::default();
        config.detection.mode = Mode::Online;
        config.capture.source = Some(PathBuf::from("/tmp/frames"));

        let temp_file = NamedTempFile::new().unwrap();
        save_config(&config, temp_file.path()).unwrap();
        let loaded = load_config(temp_file.path()).unwrap();

        assert_eq!(loaded.detection.mode, Mode::Online);
        assert_eq!(loaded.capture.source, Some(PathBuf::from("/tmp/frames")));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();

        let result = load_config(temp_file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_configured_api_key_wins() {
        let settings = CloudSettings {
            api_key: Some("from-config".to_string()),
            ..Default::default()
        };
        assert_eq!(settings.resolved_api_key().as_deref(), Some("from-config"));
    }
}
