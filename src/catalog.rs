use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
};

pub const UNKNOWN_LABEL: &str = "Unknown";

/// Id-to-label table for the detection model, loaded once at startup and
/// read-only afterwards.
#[derive(Debug)]
pub struct ClassCatalog {
    labels: Vec<String>,
}

impl ClassCatalog {
    pub fn from_labels(labels: Vec<String>) -> Self {
        Self { labels }
    }

    /// Loads a labels file with one label per line; the line index is the
    /// class id.
    pub fn load(filepath: &Path) -> io::Result<Self> {
        let file = File::open(filepath)?;
        let reader = io::BufReader::new(file);
        let mut labels = Vec::new();

        for line_result in reader.lines() {
            let line = line_result?;
            let label = line.trim();
            if label.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Empty label at line {}", labels.len() + 1),
                ));
            }
            labels.push(label.to_string());
        }

        if labels.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Labels file contains no labels",
            ));
        }

        Ok(Self { labels })
    }

    /// Resolves a class id to its label. Ids outside the table resolve to
    /// `"Unknown"`.
    pub fn resolve(&self, class_id: i64) -> &str {
        usize::try_from(class_id)
            .ok()
            .and_then(|id| self.labels.get(id))
            .map(|label| label.as_str())
            .unwrap_or(UNKNOWN_LABEL)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
