use crate::catalog::ClassCatalog;
use crate::config::DetectionSettings;
use serde::Serialize;

/// Raw box emitted by the model adapter for one image. Class and confidence
/// are optional at this seam; candidates missing either are skipped by the
/// filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub class_id: Option<i64>,
    pub confidence: Option<f32>,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// A candidate that survived the filtering policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub class: String,
    pub bbox: [i32; 4],
    pub confidence: f32,
}

impl Detection {
    pub fn is_violation(&self) -> bool {
        self.class.starts_with("NO-")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResponse {
    pub detected_objects: Vec<Detection>,
}

/// The detection filtering policy: class allow/deny plus a strict confidence
/// threshold.
#[derive(Debug, Clone)]
pub struct DetectionFilter {
    min_confidence: f32,
    excluded_classes: Vec<String>,
}

impl DetectionFilter {
    pub fn new(settings: &DetectionSettings) -> Self {
        Self {
            min_confidence: settings.min_confidence,
            excluded_classes: settings.excluded_classes.clone(),
        }
    }

    /// Applies the filtering policy to raw candidates:
    ///
    /// 1. candidates missing a class or confidence are skipped
    /// 2. class ids resolve through the catalog, unresolved ids to "Unknown"
    /// 3. excluded labels are skipped regardless of confidence
    /// 4. confidence must be strictly above the threshold
    /// 5. survivors keep their confidence rounded to 2 decimal places and
    ///    their coordinates truncated to integer pixels
    pub fn apply(&self, catalog: &ClassCatalog, candidates: &[Candidate]) -> Vec<Detection> {
        candidates
            .iter()
            .filter_map(|candidate| self.keep(catalog, candidate))
            .collect()
    }

    fn keep(&self, catalog: &ClassCatalog, candidate: &Candidate) -> Option<Detection> {
        let (class_id, confidence) = match (candidate.class_id, candidate.confidence) {
            (Some(class_id), Some(confidence)) => (class_id, confidence),
            _ => return None,
        };

        let label = catalog.resolve(class_id);
        if self.excluded_classes.iter().any(|c| c == label) {
            return None;
        }

        if confidence <= self.min_confidence {
            return None;
        }

        Some(Detection {
            class: label.to_string(),
            bbox: [
                candidate.x1 as i32,
                candidate.y1 as i32,
                candidate.x2 as i32,
                candidate.y2 as i32,
            ],
            confidence: round_confidence(confidence),
        })
    }
}

fn round_confidence(confidence: f32) -> f32 {
    (confidence * 100.0).round() / 100.0
}
