use argh::FromArgs;
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use hemalyzer::messages::{
    AnalyzeResponse, CellCounts, ClassifierInfo, DetectorInfo, HealthStatus, ModelsInfo, Summary,
    WbcClassification,
};
use serde_json::json;
use std::collections::BTreeMap;

// defaults for the server
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 5000;

const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

const CLASS_NAMES: [&str; 5] = [
    "Normal",
    "Acute Lymphoblastic Leukemia",
    "Acute Myeloid Leukemia",
    "Chronic Lymphocytic Leukemia",
    "Chronic Myeloid Leukemia",
];

#[derive(FromArgs)]
/// Stand-in analysis service that answers with canned results.
struct MockArgs {
    /// the host to run the server on
    #[argh(option, short = 'h', default = "DEFAULT_HOST.to_string()")]
    host: String,

    /// the port to run the server on
    #[argh(option, short = 'p', default = "DEFAULT_PORT")]
    port: u16,
}

async fn health() -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "healthy".to_string(),
        yolo_loaded: true,
        convnext_loaded: true,
        device: Some("cpu".to_string()),
    })
}

async fn models_info() -> Json<ModelsInfo> {
    let detector_classes = ["Platelets", "RBC", "WBC"]
        .iter()
        .enumerate()
        .map(|(id, name)| (id.to_string(), name.to_string()))
        .collect();

    Json(ModelsInfo {
        yolo: DetectorInfo {
            loaded: true,
            classes: Some(detector_classes),
        },
        convnext: ClassifierInfo {
            loaded: true,
            classes: Some(CLASS_NAMES.iter().map(|name| name.to_string()).collect()),
            device: Some("cpu".to_string()),
        },
    })
}

async fn analyze(mut multipart: Multipart) -> impl IntoResponse {
    let mut image: Option<Vec<u8>> = None;
    let mut conf_threshold = 0.25f32;
    let mut iou_threshold = 0.45f32;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return failure(StatusCode::BAD_REQUEST, e.to_string()),
        };
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => match field.bytes().await {
                Ok(bytes) => image = Some(bytes.to_vec()),
                Err(e) => return failure(StatusCode::BAD_REQUEST, e.to_string()),
            },
            "conf_threshold" | "iou_threshold" => {
                let value = field
                    .text()
                    .await
                    .ok()
                    .and_then(|text| text.parse::<f32>().ok());
                match (name.as_str(), value) {
                    ("conf_threshold", Some(v)) => conf_threshold = v,
                    ("iou_threshold", Some(v)) => iou_threshold = v,
                    _ => return failure(StatusCode::BAD_REQUEST, format!("Invalid {name}")),
                }
            }
            _ => {}
        }
    }

    let Some(image) = image else {
        return failure(StatusCode::BAD_REQUEST, "No image file provided".to_string());
    };
    if image.is_empty() {
        return failure(StatusCode::BAD_REQUEST, "Empty image".to_string());
    }

    log::info!(
        "Analyzing {} bytes (conf={}, iou={})",
        image.len(),
        conf_threshold,
        iou_threshold
    );

    (StatusCode::OK, Json(canned_analysis(&image)))
}

fn failure(status: StatusCode, error: String) -> (StatusCode, Json<AnalyzeResponse>) {
    log::warn!("Rejecting analysis: {}", error);
    (
        status,
        Json(AnalyzeResponse {
            success: false,
            error: Some(error),
            ..Default::default()
        }),
    )
}

fn canned_analysis(image: &[u8]) -> AnalyzeResponse {
    let probabilities = |winner: usize, confidence: f64| -> BTreeMap<String, f64> {
        let rest = (1.0 - confidence) / (CLASS_NAMES.len() - 1) as f64;
        CLASS_NAMES
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_string(), if i == winner { confidence } else { rest }))
            .collect()
    };

    let classifications = vec![
        WbcClassification {
            wbc_id: 1,
            classification: CLASS_NAMES[0].to_string(),
            classification_confidence: 0.97,
            probabilities: probabilities(0, 0.97),
            bbox: Some([120.0, 88.0, 190.0, 160.0]),
            detection_confidence: Some(0.91),
        },
        WbcClassification {
            wbc_id: 2,
            classification: CLASS_NAMES[2].to_string(),
            classification_confidence: 0.82,
            probabilities: probabilities(2, 0.82),
            bbox: Some([300.0, 240.0, 372.0, 309.0]),
            detection_confidence: Some(0.87),
        },
    ];

    let mut subtypes = BTreeMap::new();
    for wbc in &classifications {
        *subtypes.entry(wbc.classification.clone()).or_insert(0) += 1;
    }

    AnalyzeResponse {
        success: true,
        error: None,
        // echo the upload in place of a drawn-on image
        annotated_image: Some(STANDARD.encode(image)),
        summary: Summary {
            total_cells: 42,
            cell_counts: CellCounts {
                rbc: 37,
                wbc: 2,
                platelets: 3,
            },
            wbc_classifications: subtypes,
        },
        stage1_detection: None,
        stage2_classification: classifications,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: MockArgs = argh::from_env();

    // format the host and port
    let addr = format!("{}:{}", args.host, args.port);

    let app = Router::new()
        .route("/", get(|| async { Json(json!({ "service": "hemalyzer-mock" })) }))
        .route("/api/health", get(health))
        .route("/api/models/info", get(models_info))
        .route("/api/analyze", post(analyze))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES));

    log::info!("Starting the mock analysis service");
    log::info!("Listening on: {}", addr);
    log::info!("Press Ctrl+C to stop the server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
