//! Pure projection of a [`ViewState`] into something displayable.

use std::fmt;

use crate::messages::WbcClassification;
use crate::model::AnalysisResult;
use crate::view::ViewState;

pub const PROMPT_MESSAGE: &str = "Upload an image and click Analyze to see results";
pub const ANALYZING_MESSAGE: &str = "Analyzing...";
pub const NO_WBC_MESSAGE: &str = "No WBCs detected for classification";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderOptions {
    /// Expand each WBC's full probability breakdown.
    pub show_probabilities: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Panel {
    Prompt,
    Analyzing,
    Error(String),
    Report(Report),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    /// Size of the annotated image, when the service returned one.
    pub annotated_image_len: Option<usize>,
    pub total_cells: u32,
    /// Raw first-stage detection count, when the service sent it.
    pub detected_cells: Option<u32>,
    pub rbc: u32,
    pub wbc: u32,
    pub platelets: u32,
    pub wbc_section: WbcSection,
    /// Present only when at least one subtype was counted.
    pub subtypes: Option<Vec<(String, u32)>>,
    pub show_probabilities: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WbcSection {
    NoneDetected,
    Entries(Vec<WbcEntry>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct WbcEntry {
    pub id: u32,
    pub label: String,
    /// e.g. `97.0%`
    pub confidence: String,
    /// Label and probability (e.g. `97.00%`), most likely first.
    pub probabilities: Vec<(String, String)>,
    /// First-stage detection confidence, e.g. `91.0%`.
    pub detection_confidence: Option<String>,
    /// `[x1, y1, x2, y2]` in image pixels.
    pub bbox: Option<[f64; 4]>,
}

/// Formats a fraction in `[0, 1]` as a percentage.
pub fn format_percent(fraction: f64, decimals: usize) -> String {
    format!("{:.*}%", decimals, fraction * 100.0)
}

pub fn render(state: &ViewState, options: RenderOptions) -> Panel {
    match state {
        ViewState::Idle | ViewState::Ready { .. } => Panel::Prompt,
        ViewState::Pending { .. } => Panel::Analyzing,
        ViewState::Failed { error, .. } => Panel::Error(error.message.clone()),
        ViewState::Succeeded { result, .. } => Panel::Report(report(result, options)),
    }
}

fn report(result: &AnalysisResult, options: RenderOptions) -> Report {
    let summary = &result.summary;

    let wbc_section = if result.classifications.is_empty() {
        WbcSection::NoneDetected
    } else {
        WbcSection::Entries(result.classifications.iter().map(wbc_entry).collect())
    };

    let subtypes = (!summary.wbc_classifications.is_empty()).then(|| {
        let mut subtypes: Vec<(String, u32)> = summary
            .wbc_classifications
            .iter()
            .map(|(label, count)| (label.clone(), *count))
            .collect();
        subtypes.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        subtypes
    });

    Report {
        annotated_image_len: result.annotated_image.as_ref().map(Vec::len),
        total_cells: summary.total_cells,
        detected_cells: result.detections.as_ref().map(|d| d.total),
        rbc: summary.cell_counts.rbc,
        wbc: summary.cell_counts.wbc,
        platelets: summary.cell_counts.platelets,
        wbc_section,
        subtypes,
        show_probabilities: options.show_probabilities,
    }
}

fn wbc_entry(classification: &WbcClassification) -> WbcEntry {
    let mut probabilities: Vec<(&String, f64)> = classification
        .probabilities
        .iter()
        .map(|(label, p)| (label, *p))
        .collect();
    probabilities.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    WbcEntry {
        id: classification.wbc_id,
        label: classification.classification.clone(),
        confidence: format_percent(classification.classification_confidence, 1),
        probabilities: probabilities
            .into_iter()
            .map(|(label, p)| (label.clone(), format_percent(p, 2)))
            .collect(),
        detection_confidence: classification
            .detection_confidence
            .map(|c| format_percent(c, 1)),
        bbox: classification.bbox,
    }
}

impl fmt::Display for Panel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Panel::Prompt => writeln!(f, "{PROMPT_MESSAGE}"),
            Panel::Analyzing => writeln!(f, "{ANALYZING_MESSAGE}"),
            Panel::Error(message) => writeln!(f, "Error: {message}"),
            Panel::Report(report) => fmt::Display::fmt(report, f),
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(len) = self.annotated_image_len {
            writeln!(f, "Annotated image: {len} bytes")?;
        }

        writeln!(f, "Cell Counts")?;
        writeln!(f, "  Total Cells: {}", self.total_cells)?;
        if let Some(detected) = self.detected_cells {
            writeln!(f, "  Detected (before WBC size check): {detected}")?;
        }
        writeln!(f, "  RBC: {}", self.rbc)?;
        writeln!(f, "  WBC: {}", self.wbc)?;
        writeln!(f, "  Platelets: {}", self.platelets)?;

        writeln!(f, "WBC Classifications")?;
        match &self.wbc_section {
            WbcSection::NoneDetected => writeln!(f, "  {NO_WBC_MESSAGE}")?,
            WbcSection::Entries(entries) => {
                for entry in entries {
                    writeln!(f, "  WBC #{}: {} ({})", entry.id, entry.label, entry.confidence)?;
                    if self.show_probabilities {
                        if let Some(confidence) = &entry.detection_confidence {
                            writeln!(f, "      detection: {confidence}")?;
                        }
                        if let Some([x1, y1, x2, y2]) = entry.bbox {
                            writeln!(f, "      box: [{x1:.0}, {y1:.0}, {x2:.0}, {y2:.0}]")?;
                        }
                        for (label, p) in &entry.probabilities {
                            writeln!(f, "      {label}: {p}")?;
                        }
                    }
                }
            }
        }

        if let Some(subtypes) = &self.subtypes {
            writeln!(f, "Leukemia Classification Summary")?;
            for (label, count) in subtypes {
                writeln!(f, "  {label}: {count}")?;
            }
        }
        Ok(())
    }
}
