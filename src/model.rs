use std::sync::Arc;

use crate::error::ServiceError;
use crate::messages::{Stage1Detection, Summary, WbcClassification};

/// Detection confidence threshold sent with every analysis.
pub const DEFAULT_CONF_THRESHOLD: f32 = 0.25;
/// Overlap (IoU) threshold sent with every analysis.
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

/// A single image submitted for analysis.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub file_name: String,
    pub image: Arc<[u8]>,
    pub conf_threshold: f32,
    pub iou_threshold: f32,
}

impl AnalysisRequest {
    /// Builds a request with the fixed default thresholds.
    pub fn new(file_name: impl Into<String>, image: Arc<[u8]>) -> Self {
        Self {
            file_name: file_name.into(),
            image,
            conf_threshold: DEFAULT_CONF_THRESHOLD,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        }
    }

    /// Extracts lightweight metadata without copying the image bytes.
    pub fn metadata(&self) -> RequestMetadata {
        RequestMetadata {
            file_name: self.file_name.clone(),
            image_len: self.image.len(),
        }
    }
}

/// What the engine remembers about a request once the image has been handed off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMetadata {
    pub file_name: String,
    pub image_len: usize,
}

/// Parsed outcome of a successful analysis.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisResult {
    /// Input image overlaid with the detected cells, already decoded.
    pub annotated_image: Option<Vec<u8>>,
    pub summary: Summary,
    pub detections: Option<Stage1Detection>,
    /// Per-WBC classifications, in the order the service returned them.
    pub classifications: Vec<WbcClassification>,
}

/// The external analysis service.
///
/// Implementations perform one blocking round trip per call. The engine runs
/// them on its own worker thread.
pub trait AnalysisService {
    fn analyze(&mut self, request: AnalysisRequest) -> Result<AnalysisResult, ServiceError>;
}
