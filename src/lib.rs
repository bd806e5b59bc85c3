//! Client for a blood-smear analysis service.
//!
//! An [`AnalysisView`] holds the selected image and drives one request at a
//! time through an [`AnalysisEngine`], which runs the [`AnalysisService`] on a
//! worker thread. The view is a single tagged state ([`ViewState`]), and
//! [`render`] projects it into a displayable [`Panel`].
//!
//! ```no_run
//! use hemalyzer::{AnalysisView, ClientConfig, HttpAnalysisService, RenderOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let service = HttpAnalysisService::new(ClientConfig::from_env()?)?;
//! let mut view = AnalysisView::new(service);
//!
//! view.select_image("smear.jpg", std::fs::read("smear.jpg")?);
//! view.submit()?;
//! view.wait(None);
//! print!("{}", view.render(RenderOptions::default()));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod messages;
pub mod model;
pub mod preview;
pub mod render;
pub mod view;

pub use config::ClientConfig;
pub use engine::{AnalysisEngine, AnalysisOutcome, EngineResult, EngineState};
pub use error::{ClientError, ServiceError, SubmitError};
pub use http::HttpAnalysisService;
pub use model::{
    AnalysisRequest, AnalysisResult, AnalysisService, DEFAULT_CONF_THRESHOLD,
    DEFAULT_IOU_THRESHOLD, RequestMetadata,
};
pub use preview::{Preview, PreviewStore};
pub use render::{Panel, RenderOptions, render};
pub use view::{AnalysisView, ErrorState, SelectedImage, SubmitOutcome, ViewState};
