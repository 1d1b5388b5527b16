use crate::{
    annotate::Annotator,
    catalog::ClassCatalog,
    detection::{DetectionFilter, DetectionResponse},
    model_service::{ModelError, ModelService},
};
use image::{DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("invalid image upload: {0}")]
    InvalidImage(String),
    #[error("model inference failed: {0}")]
    Model(#[from] ModelError),
    #[error("failed to encode response image: {0}")]
    ImageEncoding(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputMode {
    Json,
    AnnotatedImage,
}

pub enum DetectOutcome {
    Detections(DetectionResponse),
    Jpeg(Vec<u8>),
}

/// Runs one full detection cycle: decode, infer, filter, and either collect
/// the surviving detections or render them back onto the image.
#[derive(Clone)]
pub struct DetectionService<M: ModelService> {
    model_service: Arc<M>,
    catalog: Arc<ClassCatalog>,
    filter: DetectionFilter,
    annotator: Arc<Annotator>,
}

impl<M: ModelService> DetectionService<M> {
    pub fn new(model_service: M, catalog: ClassCatalog, filter: DetectionFilter) -> Self {
        Self {
            model_service: Arc::new(model_service),
            catalog: Arc::new(catalog),
            filter,
            annotator: Arc::new(Annotator::new()),
        }
    }

    pub async fn detect(
        &self,
        image_bytes: &[u8],
        mode: OutputMode,
    ) -> Result<DetectOutcome, DetectionError> {
        let image = decode_image(image_bytes)?;

        let candidates = self.model_service.predict(&image).await?;
        let detections = self.filter.apply(&self.catalog, &candidates);

        tracing::debug!("{} candidates, {} kept", candidates.len(), detections.len());

        match mode {
            OutputMode::Json => Ok(DetectOutcome::Detections(DetectionResponse {
                detected_objects: detections,
            })),
            OutputMode::AnnotatedImage => {
                let mut annotated = image.to_rgb8();
                self.annotator.annotate(&mut annotated, &detections);
                Ok(DetectOutcome::Jpeg(encode_jpeg(&annotated)?))
            }
        }
    }
}

fn decode_image(image_bytes: &[u8]) -> Result<DynamicImage, DetectionError> {
    let reader = image::ImageReader::new(Cursor::new(image_bytes))
        .with_guessed_format()
        .map_err(|e| DetectionError::InvalidImage(e.to_string()))?;

    reader
        .decode()
        .map_err(|e| DetectionError::InvalidImage(e.to_string()))
}

fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>, DetectionError> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Jpeg)
        .map_err(|e| DetectionError::ImageEncoding(e.to_string()))?;

    Ok(buffer.into_inner())
}
