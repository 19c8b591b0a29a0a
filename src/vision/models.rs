//! Model management for ONNX Runtime
//!
//! Handles downloading, caching, and loading of the PaddleOCR models used by
//! the offline text backend. The object detector model is user-supplied and
//! loaded straight from its configured path.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

/// Set to refuse model downloads
pub const OFFLINE_ENV: &str = "VISION_CAPTURE_OFFLINE";

/// Downloadable PaddleOCR components
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    /// Text detection model (DBNet)
    Detection,
    /// Text recognition model (CRNN)
    Recognition,
    /// Character dictionary for recognition
    Dictionary,
}

impl ModelType {
    pub const ALL: [ModelType; 3] = [
        ModelType::Detection,
        ModelType::Recognition,
        ModelType::Dictionary,
    ];

    pub fn filename(&self) -> &'static str {
        match self {
            ModelType::Detection => "det.onnx",
            ModelType::Recognition => "rec.onnx",
            ModelType::Dictionary => "dict.txt",
        }
    }

    /// PaddleOCR exports on Hugging Face (monkt/paddleocr-onnx)
    pub fn download_url(&self) -> &'static str {
        match self {
            ModelType::Detection => {
                "https://huggingface.co/monkt/paddleocr-onnx/resolve/main/detection/v3/det.onnx"
            }
            ModelType::Recognition => {
                "https://huggingface.co/monkt/paddleocr-onnx/resolve/main/languages/english/rec.onnx"
            }
            ModelType::Dictionary => {
                "https://huggingface.co/monkt/paddleocr-onnx/resolve/main/languages/english/dict.txt"
            }
        }
    }

    /// Plausible file size bounds, used to reject truncated downloads
    pub fn expected_size_range(&self) -> (u64, u64) {
        match self {
            ModelType::Detection => (2_000_000, 5_000_000),    // ~2.43 MB
            ModelType::Recognition => (7_000_000, 10_000_000), // ~7.83 MB
            ModelType::Dictionary => (500, 10_000),            // ~1.42 KB
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ModelType::Detection => "Text Detection",
            ModelType::Recognition => "Text Recognition",
            ModelType::Dictionary => "Character Dictionary",
        }
    }
}

/// Record of downloaded models, kept next to them as manifest.json
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelManifest {
    pub version: String,
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelInfo {
    pub model_type: String,
    pub filename: String,
    pub size_bytes: u64,
    pub sha256: String,
    /// Unix seconds
    pub downloaded_at: u64,
}

impl Default for ModelManifest {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            models: Vec::new(),
        }
    }
}

/// Downloads and caches the OCR models
pub struct ModelManager {
    models_dir: PathBuf,
}

impl ModelManager {
    /// Use `<data dir>/models`
    pub fn new() -> Result<Self> {
        let models_dir = crate::storage::get_data_dir()?.join("models");
        Self::with_dir(models_dir)
    }

    pub fn with_dir(models_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&models_dir)
            .with_context(|| format!("Failed to create models dir {:?}", models_dir))?;
        Ok(Self { models_dir })
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn model_path(&self, model_type: ModelType) -> PathBuf {
        self.models_dir.join(model_type.filename())
    }

    /// Present on disk with a plausible size
    pub fn is_model_available(&self, model_type: ModelType) -> bool {
        match std::fs::metadata(self.model_path(model_type)) {
            Ok(metadata) => {
                let (min, max) = model_type.expected_size_range();
                (min..=max).contains(&metadata.len())
            }
            Err(_) => false,
        }
    }

    pub fn are_models_ready(&self) -> bool {
        ModelType::ALL.iter().all(|&m| self.is_model_available(m))
    }

    /// Download a model if not already available, returning its path
    pub fn ensure_model(&self, model_type: ModelType) -> Result<PathBuf> {
        let path = self.model_path(model_type);

        if self.is_model_available(model_type) {
            debug!("Model {:?} already available at {:?}", model_type, path);
            return Ok(path);
        }

        self.download_model(model_type)?;
        Ok(path)
    }

    fn download_model(&self, model_type: ModelType) -> Result<()> {
        let url = model_type.download_url();
        let path = self.model_path(model_type);

        if std::env::var(OFFLINE_ENV).is_ok() {
            anyhow::bail!(
                "Downloads disabled by {}: fetch {} and place it at {:?}",
                OFFLINE_ENV,
                url,
                path
            );
        }

        info!("Downloading {} model from {}", model_type.display_name(), url);

        let rt = Runtime::new().context("Failed to create tokio runtime")?;
        let sha256 = rt.block_on(download_file(url, &path))?;

        if !self.is_model_available(model_type) {
            anyhow::bail!(
                "Downloaded {} has an unexpected size",
                model_type.filename()
            );
        }

        self.record_download(model_type, sha256)?;
        info!("Downloaded {} model", model_type.display_name());
        Ok(())
    }

    fn record_download(&self, model_type: ModelType, sha256: String) -> Result<()> {
        let mut manifest = self.load_manifest().unwrap_or_else(|e| {
            warn!("Ignoring unreadable model manifest: {:#}", e);
            ModelManifest::default()
        });

        let size_bytes = std::fs::metadata(self.model_path(model_type))?.len();
        let downloaded_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let info = ModelInfo {
            model_type: format!("{:?}", model_type),
            filename: model_type.filename().to_string(),
            size_bytes,
            sha256,
            downloaded_at,
        };

        match manifest.models.iter_mut().find(|m| m.filename == info.filename) {
            Some(existing) => *existing = info,
            None => manifest.models.push(info),
        }

        self.save_manifest(&manifest)
    }

    pub fn load_manifest(&self) -> Result<ModelManifest> {
        let manifest_path = self.models_dir.join("manifest.json");
        if !manifest_path.exists() {
            return Ok(ModelManifest::default());
        }
        let content = std::fs::read_to_string(&manifest_path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save_manifest(&self, manifest: &ModelManifest) -> Result<()> {
        let content = serde_json::to_string_pretty(manifest)?;
        std::fs::write(self.models_dir.join("manifest.json"), content)?;
        Ok(())
    }
}

/// Stream `url` into `path` through a temp file, returning the SHA-256 hex digest
async fn download_file(url: &str, path: &Path) -> Result<String> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()
        .context("Failed to create HTTP client")?;

    let response = client
        .get(url)
        .send()
        .await
        .context("Failed to send download request")?;

    if !response.status().is_success() {
        anyhow::bail!("Download failed with status {}: {}", response.status(), url);
    }

    debug!("Download size: {:?} bytes", response.content_length());

    let temp_path = path.with_extension("tmp");
    let mut file = std::fs::File::create(&temp_path).context("Failed to create temp file")?;

    let mut hasher = Sha256::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Error reading download stream")?;
        file.write_all(&chunk).context("Failed to write to temp file")?;
        hasher.update(&chunk);
    }

    file.flush().context("Failed to flush temp file")?;
    drop(file);

    std::fs::rename(&temp_path, path)
        .context("Failed to move downloaded file to final location")?;

    Ok(format!("{:x}", hasher.finalize()))
}

/// Single-input, single-output ONNX Runtime session
pub struct OnnxSession {
    session: Session,
    input_name: String,
    output_name: String,
}

impl OnnxSession {
    /// Load a model, optionally trying GPU execution providers first
    pub fn new(model_path: &Path, use_gpu: bool) -> Result<Self> {
        info!("Loading ONNX model from {:?}", model_path);

        let builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?;

        #[cfg(target_os = "windows")]
        let builder = if use_gpu {
            use ort::execution_providers::DirectMLExecutionProvider;
            match builder.with_execution_providers([DirectMLExecutionProvider::default().build()]) {
                Ok(builder) => {
                    info!("DirectML GPU acceleration enabled");
                    builder
                }
                Err(e) => {
                    warn!("DirectML not available, using CPU: {}", e);
                    Session::builder()?
                        .with_optimization_level(GraphOptimizationLevel::Level3)?
                        .with_intra_threads(4)?
                }
            }
        } else {
            builder
        };

        #[cfg(not(target_os = "windows"))]
        if use_gpu {
            debug!("No GPU execution provider on this platform, using CPU");
        }

        let session = builder
            .commit_from_file(model_path)
            .with_context(|| format!("Failed to load ONNX model {:?}", model_path))?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .context("Model has no inputs")?;
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .context("Model has no outputs")?;

        debug!("Model loaded. Input: {}, Output: {}", input_name, output_name);

        Ok(Self {
            session,
            input_name,
            output_name,
        })
    }

    /// Run on an NCHW tensor, returning the first output's shape and data
    pub fn run(&mut self, input: ndarray::Array4<f32>) -> Result<(Vec<usize>, Vec<f32>)> {
        let shape: [usize; 4] = input.dim().into();
        let (data, _offset) = input.into_raw_vec_and_offset();
        let tensor = Tensor::from_array((shape, data))?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => tensor])?;
        let (shape, data) = outputs[self.output_name.as_str()].try_extract_tensor::<f32>()?;

        Ok((shape.iter().map(|&d| d.max(0) as usize).collect(), data.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_model_type_filenames() {
        assert_eq!(ModelType::Detection.filename(), "det.onnx");
        assert_eq!(ModelType::Recognition.filename(), "rec.onnx");
        assert_eq!(ModelType::Dictionary.filename(), "dict.txt");
    }

    #[test]
    fn test_availability_checks_size() {
        let dir = tempdir().unwrap();
        let manager = ModelManager::with_dir(dir.path().join("models")).unwrap();
        assert!(!manager.is_model_available(ModelType::Dictionary));

        // Too small to be a real dictionary
        std::fs::write(manager.model_path(ModelType::Dictionary), "a\nb\n").unwrap();
        assert!(!manager.is_model_available(ModelType::Dictionary));

        std::fs::write(manager.model_path(ModelType::Dictionary), "x\n".repeat(400)).unwrap();
        assert!(manager.is_model_available(ModelType::Dictionary));
        assert!(!manager.are_models_ready());
    }

    #[test]
    fn test_manifest_roundtrip_and_default() {
        let dir = tempdir().unwrap();
        let manager = ModelManager::with_dir(dir.path().to_path_buf()).unwrap();
        assert!(manager.load_manifest().unwrap().models.is_empty());

        let mut manifest = ModelManifest::default();
        manifest.models.push(ModelInfo {
            model_type: "Detection".to_string(),
            filename: "det.onnx".to_string(),
            size_bytes: 42,
            sha256: "abc".to_string(),
            downloaded_at: 1,
        });
        manager.save_manifest(&manifest).unwrap();

        let loaded = manager.load_manifest().unwrap();
        assert_eq!(loaded.models.len(), 1);
        assert_eq!(loaded.models[0].filename, "det.onnx");
    }
}
