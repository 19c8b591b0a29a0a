//! Cloud (online) Backend
//!
//! Object localization and text detection through the Cloud Vision
//! `images:annotate` REST endpoint. Frames are uploaded JPEG-encoded and
//! base64-wrapped, one request per feature.

pub mod types;

use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbaImage};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use crate::config::{CloudSettings, API_KEY_ENV};
use crate::detect::{
    BackendPair, BoundingBox, CoordinateSpace, ObjectDetector, RawObject, RawText, TextDetector,
    UnavailableBackend,
};
use types::{AnnotateImageResponse, AnnotateRequest, AnnotateResponse, FeatureType};

/// The cloud API supplies no per-word OCR confidence
pub const CLOUD_TEXT_CONFIDENCE: f32 = 1.0;

/// Failures at the cloud REST boundary
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("No API key configured (set cloud.api_key or {})", API_KEY_ENV)]
    MissingApiKey,
    #[error("Failed to start async runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("Failed to encode frame: {0}")]
    Encode(#[from] image::ImageError),
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("API error {code}: {message}")]
    Api { code: i32, message: String },
    #[error("Malformed response: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Response contained no results")]
    EmptyResponse,
}

/// Blocking client for `images:annotate`
pub struct CloudVisionClient {
    http: reqwest::Client,
    runtime: Runtime,
    endpoint: String,
    api_key: String,
    jpeg_quality: u8,
}

impl CloudVisionClient {
    pub fn new(settings: &CloudSettings) -> Result<Self, CloudError> {
        let api_key = settings.resolved_api_key().ok_or(CloudError::MissingApiKey)?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        Ok(Self {
            http,
            runtime,
            endpoint: settings.endpoint.clone(),
            api_key,
            jpeg_quality: settings.jpeg_quality,
        })
    }

    /// Run one feature on one image
    pub fn annotate(
        &self,
        image: &RgbaImage,
        feature: FeatureType,
    ) -> Result<AnnotateImageResponse, CloudError> {
        let jpeg = encode_jpeg(image, self.jpeg_quality)?;
        let content = base64::engine::general_purpose::STANDARD.encode(&jpeg);
        let request = AnnotateRequest::single(content, feature);

        debug!("Uploading {} byte JPEG for {:?}", jpeg.len(), feature);

        let body = self.runtime.block_on(async {
            let response = self
                .http
                .post(&self.endpoint)
                .query(&[("key", self.api_key.as_str())])
                .json(&request)
                .send()
                .await?;

            let status = response.status();
            let body = response.text().await?;
            if !status.is_success() {
                return Err(CloudError::Status {
                    status: status.as_u16(),
                    body,
                });
            }
            Ok::<_, CloudError>(body)
        })?;

        parse_response(&body)
    }
}

/// Extract the single image response, surfacing embedded API errors
pub fn parse_response(body: &str) -> Result<AnnotateImageResponse, CloudError> {
    let response: AnnotateResponse = serde_json::from_str(body)?;
    let image_response = response
        .responses
        .into_iter()
        .next()
        .ok_or(CloudError::EmptyResponse)?;

    if let Some(status) = &image_response.error {
        if status.code != 0 {
            return Err(CloudError::Api {
                code: status.code,
                message: status.message.clone(),
            });
        }
    }
    Ok(image_response)
}

/// JPEG-encode a frame; alpha is dropped
pub fn encode_jpeg(image: &RgbaImage, quality: u8) -> Result<Vec<u8>, CloudError> {
    let rgb = DynamicImage::ImageRgba8(image.clone()).into_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality).encode_image(&rgb)?;
    Ok(out)
}

/// Object annotations as normalized boxes
pub fn objects_from_response(response: &AnnotateImageResponse) -> Vec<RawObject> {
    response
        .localized_object_annotations
        .iter()
        .filter_map(|annotation| {
            let vertices = &annotation.bounding_poly.normalized_vertices;
            if vertices.len() < 4 {
                debug!("Skipping object {:?} with {} vertices", annotation.name, vertices.len());
                return None;
            }

            let min_x = vertices.iter().map(|v| v.x).fold(f32::INFINITY, f32::min);
            let min_y = vertices.iter().map(|v| v.y).fold(f32::INFINITY, f32::min);
            let max_x = vertices.iter().map(|v| v.x).fold(f32::NEG_INFINITY, f32::max);
            let max_y = vertices.iter().map(|v| v.y).fold(f32::NEG_INFINITY, f32::max);

            Some(RawObject {
                label: annotation.name.clone(),
                bbox: BoundingBox::new(min_x, min_y, max_x, max_y),
                space: CoordinateSpace::Normalized,
                confidence: annotation.score,
            })
        })
        .collect()
}

/// Word-level text annotations as pixel polygons. The first annotation is
/// the whole-image block and is skipped.
pub fn texts_from_response(response: &AnnotateImageResponse) -> Vec<RawText> {
    response
        .text_annotations
        .iter()
        .skip(1)
        .filter_map(|annotation| {
            let polygon: Vec<(f32, f32)> = annotation
                .bounding_poly
                .vertices
                .iter()
                .map(|v| (v.x as f32, v.y as f32))
                .collect();
            if polygon.len() < 4 {
                return None;
            }

            let text = annotation.description.trim();
            if text.is_empty() {
                return None;
            }

            Some(RawText {
                text: text.to_string(),
                polygon,
                space: CoordinateSpace::Pixels,
                confidence: CLOUD_TEXT_CONFIDENCE,
            })
        })
        .collect()
}

/// Online object backend
pub struct CloudDetector {
    client: Arc<CloudVisionClient>,
}

impl CloudDetector {
    pub fn new(client: Arc<CloudVisionClient>) -> Self {
        Self { client }
    }
}

impl ObjectDetector for CloudDetector {
    fn name(&self) -> &'static str {
        "cloud-objects"
    }

    fn detect(&mut self, image: &RgbaImage) -> anyhow::Result<Vec<RawObject>> {
        let response = self.client.annotate(image, FeatureType::ObjectLocalization)?;
        Ok(objects_from_response(&response))
    }
}

/// Online text backend
pub struct CloudOcr {
    client: Arc<CloudVisionClient>,
}

impl CloudOcr {
    pub fn new(client: Arc<CloudVisionClient>) -> Self {
        Self { client }
    }
}

impl TextDetector for CloudOcr {
    fn name(&self) -> &'static str {
        "cloud-ocr"
    }

    fn detect(&mut self, image: &RgbaImage) -> anyhow::Result<Vec<RawText>> {
        let response = self.client.annotate(image, FeatureType::TextDetection)?;
        Ok(texts_from_response(&response))
    }
}

/// Build the online object and text backends over one shared client
pub fn build_online_backends(settings: &CloudSettings) -> BackendPair {
    match CloudVisionClient::new(settings) {
        Ok(client) => {
            info!("Cloud backend ready ({})", settings.endpoint);
            let client = Arc::new(client);
            BackendPair::new(
                Box::new(CloudDetector::new(client.clone())),
                Box::new(CloudOcr::new(client)),
            )
        }
        Err(e) => {
            warn!("Cloud backend unavailable: {}", e);
            BackendPair::new(
                Box::new(UnavailableBackend::new("cloud-objects", e.to_string())),
                Box::new(UnavailableBackend::new("cloud-ocr", e.to_string())),
            )
        }
    }
}
