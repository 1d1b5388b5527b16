use crate::detection::Candidate;
use async_trait::async_trait;
use image::DynamicImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("invalid model output: {0}")]
    InvalidOutput(String),
    #[error("session unavailable: {0}")]
    SessionUnavailable(String),
}

/// Produces raw candidate boxes for a decoded image. Implementations must be
/// shareable across concurrent requests.
#[async_trait]
pub trait ModelService: Send + Sync + Clone + 'static {
    async fn predict(&self, image: &DynamicImage) -> Result<Vec<Candidate>, ModelError>;
}
