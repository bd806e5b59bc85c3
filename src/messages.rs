//! Wire types exchanged with the analysis service.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ServiceError;
use crate::model::AnalysisResult;

/// Body of a `POST /api/analyze` response.
///
/// Only `success` is required. Everything else is filled in by the service
/// when it applies.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AnalyzeResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotated_image: Option<String>,
    #[serde(default)]
    pub summary: Summary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage1_detection: Option<Stage1Detection>,
    #[serde(default)]
    pub stage2_classification: Vec<WbcClassification>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Summary {
    #[serde(default)]
    pub total_cells: u32,
    #[serde(default)]
    pub cell_counts: CellCounts,
    /// Leukemia subtype label to the number of WBCs classified as such.
    #[serde(default)]
    pub wbc_classifications: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct CellCounts {
    #[serde(rename = "RBC", default)]
    pub rbc: u32,
    #[serde(rename = "WBC", default)]
    pub wbc: u32,
    #[serde(rename = "Platelets", default)]
    pub platelets: u32,
}

/// Second-stage classification of a single white cell.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct WbcClassification {
    pub wbc_id: u32,
    pub classification: String,
    pub classification_confidence: f64,
    /// Every candidate label with its predicted probability. Display only.
    #[serde(default)]
    pub probabilities: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection_confidence: Option<f64>,
}

/// First-stage detection output.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Stage1Detection {
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub cells: Vec<CellDetection>,
    #[serde(default)]
    pub counts: CellCounts,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CellDetection {
    pub class: String,
    pub confidence: f64,
    pub bbox: [f64; 4],
}

/// Body of `GET /api/health`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub yolo_loaded: bool,
    #[serde(default)]
    pub convnext_loaded: bool,
    #[serde(default)]
    pub device: Option<String>,
}

/// Body of `GET /api/models/info`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ModelsInfo {
    pub yolo: DetectorInfo,
    pub convnext: ClassifierInfo,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DetectorInfo {
    pub loaded: bool,
    /// Class id (as a string key) to class name.
    #[serde(default)]
    pub classes: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ClassifierInfo {
    pub loaded: bool,
    #[serde(default)]
    pub classes: Option<Vec<String>>,
    #[serde(default)]
    pub device: Option<String>,
}

/// The part of a response read before trusting anything else in it.
#[derive(Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

impl AnalyzeResponse {
    /// Parses a raw response body. Anything that is not a JSON object with a
    /// boolean `success` is malformed.
    ///
    /// A failure body only needs `success` and, optionally, `error`; the rest
    /// of it is ignored.
    pub fn parse(body: &[u8]) -> Result<Self, ServiceError> {
        let value: serde_json::Value = serde_json::from_slice(body)?;
        let envelope = Envelope::deserialize(&value)?;
        if envelope.success {
            return Ok(serde_json::from_value(value)?);
        }

        let error = envelope.error.and_then(|error| match error {
            serde_json::Value::String(message) => Some(message),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        });
        Ok(AnalyzeResponse {
            success: false,
            error,
            ..Default::default()
        })
    }

    /// Converts the payload into a result, or the failure it reports.
    pub fn into_result(self) -> Result<AnalysisResult, ServiceError> {
        if !self.success {
            return Err(ServiceError::reported(self.error));
        }

        let annotated_image = match self.annotated_image.as_deref() {
            None | Some("") => None,
            Some(encoded) => Some(STANDARD.decode(encoded)?),
        };

        Ok(AnalysisResult {
            annotated_image,
            summary: self.summary,
            detections: self.stage1_detection,
            classifications: self.stage2_classification,
        })
    }
}
