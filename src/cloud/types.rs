//! Wire types for the `images:annotate` REST endpoint

use serde::{Deserialize, Serialize};

/// Detection feature requested for an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeatureType {
    ObjectLocalization,
    TextDetection,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnnotateRequest {
    pub requests: Vec<AnnotateImageRequest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnnotateImageRequest {
    pub image: ImageContent,
    pub features: Vec<Feature>,
}

/// Base64-encoded image bytes
#[derive(Debug, Clone, Serialize)]
pub struct ImageContent {
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Feature {
    #[serde(rename = "type")]
    pub feature_type: FeatureType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_results: Option<u32>,
}

impl AnnotateRequest {
    /// Request a single feature for a single image
    pub fn single(content: String, feature_type: FeatureType) -> Self {
        Self {
            requests: vec![AnnotateImageRequest {
                image: ImageContent { content },
                features: vec![Feature {
                    feature_type,
                    max_results: None,
                }],
            }],
        }
    }
}

// Responses use proto3 JSON: zero values and empty lists are omitted, hence
// the blanket `default`.

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AnnotateResponse {
    pub responses: Vec<AnnotateImageResponse>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnnotateImageResponse {
    pub localized_object_annotations: Vec<LocalizedObjectAnnotation>,
    pub text_annotations: Vec<EntityAnnotation>,
    pub error: Option<ApiStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocalizedObjectAnnotation {
    pub mid: String,
    pub name: String,
    pub score: f32,
    pub bounding_poly: BoundingPoly,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntityAnnotation {
    pub locale: String,
    pub description: String,
    pub bounding_poly: BoundingPoly,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BoundingPoly {
    /// Pixel vertices
    pub vertices: Vec<Vertex>,
    /// Vertices as fractions of the image size
    pub normalized_vertices: Vec<NormalizedVertex>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Vertex {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct NormalizedVertex {
    pub x: f32,
    pub y: f32,
}

/// `google.rpc.Status` as embedded in a response
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApiStatus {
    pub code: i32,
    pub message: String,
}
