//! The analysis service reached over HTTP.

use reqwest::blocking::{
    Client,
    multipart::{Form, Part},
};

use crate::config::ClientConfig;
use crate::error::ServiceError;
use crate::messages::{AnalyzeResponse, HealthStatus, ModelsInfo};
use crate::model::{AnalysisRequest, AnalysisResult, AnalysisService};

pub const ANALYZE_PATH: &str = "/api/analyze";
pub const HEALTH_PATH: &str = "/api/health";
pub const MODELS_INFO_PATH: &str = "/api/models/info";

pub struct HttpAnalysisService {
    client: Client,
    config: ClientConfig,
}

impl HttpAnalysisService {
    pub fn new(config: ClientConfig) -> Result<Self, ServiceError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Checks that the service is up and which models it loaded.
    pub fn health(&self) -> Result<HealthStatus, ServiceError> {
        let response = self.client.get(self.config.endpoint(HEALTH_PATH)).send()?;
        Ok(serde_json::from_slice(&response.bytes()?)?)
    }

    /// Lists the detector and classifier classes the service knows about.
    pub fn models_info(&self) -> Result<ModelsInfo, ServiceError> {
        let response = self
            .client
            .get(self.config.endpoint(MODELS_INFO_PATH))
            .send()?;
        Ok(serde_json::from_slice(&response.bytes()?)?)
    }

    fn form(request: AnalysisRequest) -> Result<Form, ServiceError> {
        let mut part = Part::bytes(request.image.to_vec()).file_name(request.file_name.clone());
        if let Some(mime) = guess_mime(&request.file_name) {
            part = part.mime_str(mime)?;
        }
        Ok(Form::new()
            .part("image", part)
            .text("conf_threshold", request.conf_threshold.to_string())
            .text("iou_threshold", request.iou_threshold.to_string()))
    }
}

impl AnalysisService for HttpAnalysisService {
    fn analyze(&mut self, request: AnalysisRequest) -> Result<AnalysisResult, ServiceError> {
        let url = self.config.endpoint(ANALYZE_PATH);
        log::debug!("POST {} ({} bytes)", url, request.image.len());

        let response = self.client.post(&url).multipart(Self::form(request)?).send()?;
        let status = response.status();
        let body = response.bytes()?;

        // Failures come back as JSON with a 4xx/5xx status, so the body is
        // parsed whatever the status says.
        let parsed = AnalyzeResponse::parse(&body).map_err(|err| match err {
            ServiceError::Malformed(reason) => {
                ServiceError::Malformed(format!("HTTP {status}: {reason}"))
            }
            other => other,
        })?;
        parsed.into_result()
    }
}

fn guess_mime(file_name: &str) -> Option<&'static str> {
    let (_, extension) = file_name.rsplit_once('.')?;
    match extension.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "bmp" => Some("image/bmp"),
        "tif" | "tiff" => Some("image/tiff"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guesses_common_image_types() {
        assert_eq!(guess_mime("smear.JPG"), Some("image/jpeg"));
        assert_eq!(guess_mime("a.b.png"), Some("image/png"));
        assert_eq!(guess_mime("noext"), None);
        assert_eq!(guess_mime("notes.txt"), None);
    }
}
