use crate::{
    config::ModelSettings,
    detection::Candidate,
    model_service::{ModelError, ModelService},
};
use async_trait::async_trait;
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use ndarray::{Array, Axis, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

const INPUT_SIZE: u32 = 640;
const IOU_THRESHOLD: f32 = 0.7;

#[derive(Debug, Clone, Copy)]
struct RawBox {
    class_id: usize,
    confidence: f32,
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
}

fn intersection(box1: &RawBox, box2: &RawBox) -> f32 {
    let width = (box1.x2.min(box2.x2) - box1.x1.max(box2.x1)).max(0.0);
    let height = (box1.y2.min(box2.y2) - box1.y1.max(box2.y1)).max(0.0);
    width * height
}

fn union(box1: &RawBox, box2: &RawBox) -> f32 {
    ((box1.x2 - box1.x1) * (box1.y2 - box1.y1)) + ((box2.x2 - box2.x1) * (box2.y2 - box2.y1))
        - intersection(box1, box2)
}

/// Resizes the image to the model input size and fills a normalized NCHW
/// float tensor. Returns the tensor plus the original dimensions for
/// coordinate scale-back.
fn preprocess(image: &DynamicImage) -> (Array<f32, Ix4>, u32, u32) {
    let (img_width, img_height) = image.dimensions();
    let img = image.resize_exact(INPUT_SIZE, INPUT_SIZE, FilterType::CatmullRom);

    let mut input = Array::zeros((1, 3, INPUT_SIZE as usize, INPUT_SIZE as usize));
    for pixel in img.pixels() {
        let x = pixel.0 as _;
        let y = pixel.1 as _;
        let [r, g, b, _] = pixel.2 .0;
        input[[0, 0, y, x]] = (r as f32) / 255.;
        input[[0, 1, y, x]] = (g as f32) / 255.;
        input[[0, 2, y, x]] = (b as f32) / 255.;
    }

    (input, img_width, img_height)
}

/// ONNX-Runtime-backed model service. Holds a pool of sessions dispatched
/// round-robin so concurrent requests do not serialize on a single session.
#[derive(Clone)]
pub struct OrtModelService {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    min_probability: f32,
}

impl OrtModelService {
    pub fn new(model_settings: &ModelSettings) -> Result<Self, Box<dyn std::error::Error>> {
        ort::init().commit();

        let num_instances = model_settings.num_instances;
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(model_settings.get_model_path())?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        tracing::info!("Created {} ONNX sessions", num_instances);

        Ok(Self {
            sessions: Arc::new(sessions),
            counter: Arc::new(AtomicUsize::new(0)),
            min_probability: model_settings.min_probability,
        })
    }

    fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<ndarray::ArrayD<f32>, ModelError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let session_arc = &self.sessions[index];
        let mut session = session_arc
            .lock()
            .map_err(|e| ModelError::SessionUnavailable(format!("session mutex poisoned: {}", e)))?;

        tracing::debug!("Handling request with session {}", index);

        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| ModelError::Inference(format!("failed to build tensor: {}", e)))?;

        let input_tensor = ort::inputs![tensor_ref];

        let outputs = session
            .run(input_tensor)
            .map_err(|e| ModelError::Inference(e.to_string()))?;

        let (shape, data) = outputs["output0"]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::InvalidOutput(format!("failed to extract tensor: {}", e)))?;

        let ix = shape.to_ixdyn();
        let array = ndarray::ArrayD::from_shape_vec(ix, data.to_vec())
            .map_err(|e| ModelError::InvalidOutput(format!("invalid tensor shape: {}", e)))?;

        Ok(array)
    }

    /// Parses the `(1, 4 + num_classes, anchors)` YOLO output into boxes in
    /// original-image coordinates, keeping the best class per anchor.
    fn parse_output(
        &self,
        outputs: &ndarray::ArrayD<f32>,
        img_width: u32,
        img_height: u32,
    ) -> Result<Vec<RawBox>, ModelError> {
        let shape = outputs.shape();
        if shape.len() != 3 || shape[1] <= 4 {
            return Err(ModelError::InvalidOutput(format!(
                "unexpected output shape: {:?}",
                shape
            )));
        }

        let output = outputs.index_axis(Axis(0), 0);
        let num_classes = shape[1] - 4;
        let num_anchors = shape[2];

        let mut boxes = Vec::new();
        for anchor in 0..num_anchors {
            let (class_id, prob) = (0..num_classes)
                .map(|class| (class, output[[4 + class, anchor]]))
                .reduce(|best, current| if current.1 > best.1 { current } else { best })
                .unwrap_or((0, 0.0));

            if prob < self.min_probability {
                continue;
            }

            let xc = output[[0, anchor]] / INPUT_SIZE as f32 * (img_width as f32);
            let yc = output[[1, anchor]] / INPUT_SIZE as f32 * (img_height as f32);
            let w = output[[2, anchor]] / INPUT_SIZE as f32 * (img_width as f32);
            let h = output[[3, anchor]] / INPUT_SIZE as f32 * (img_height as f32);

            boxes.push(RawBox {
                class_id,
                confidence: prob,
                x1: xc - w / 2.,
                y1: yc - h / 2.,
                x2: xc + w / 2.,
                y2: yc + h / 2.,
            });
        }

        Ok(non_max_suppression(boxes))
    }
}

fn non_max_suppression(mut boxes: Vec<RawBox>) -> Vec<RawBox> {
    boxes.sort_by(|box1, box2| box2.confidence.total_cmp(&box1.confidence));

    let mut result = Vec::new();
    while !boxes.is_empty() {
        let best = boxes[0];
        result.push(best);
        boxes.retain(|candidate| {
            intersection(&best, candidate) / union(&best, candidate) < IOU_THRESHOLD
        });
    }

    result
}

#[async_trait]
impl ModelService for OrtModelService {
    async fn predict(&self, image: &DynamicImage) -> Result<Vec<Candidate>, ModelError> {
        let (input, img_width, img_height) = preprocess(image);

        let outputs = self.run_inference(&input)?;
        let boxes = self.parse_output(&outputs, img_width, img_height)?;

        Ok(boxes
            .into_iter()
            .map(|raw| Candidate {
                class_id: Some(raw.class_id as i64),
                confidence: Some(raw.confidence),
                x1: raw.x1,
                y1: raw.y1,
                x2: raw.x2,
                y2: raw.y2,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    #[test]
    fn preprocess_builds_a_normalized_nchw_tensor() {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(100, 50, Rgb([255, 0, 0]));
        let image = DynamicImage::ImageRgb8(img);

        let (input, img_width, img_height) = preprocess(&image);

        assert_eq!(input.shape(), &[1, 3, 640, 640]);
        assert_eq!(img_width, 100);
        assert_eq!(img_height, 50);
        assert_eq!(input[[0, 0, 0, 0]], 1.0);
        assert_eq!(input[[0, 1, 0, 0]], 0.0);
    }

    #[test]
    fn nms_suppresses_overlapping_boxes() {
        let make = |confidence, x1| RawBox {
            class_id: 0,
            confidence,
            x1,
            y1: 0.0,
            x2: x1 + 100.0,
            y2: 100.0,
        };

        // near-identical boxes collapse to the most confident one
        let result = non_max_suppression(vec![make(0.8, 0.0), make(0.9, 5.0), make(0.7, 2.0)]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].confidence, 0.9);

        // disjoint boxes survive
        let result = non_max_suppression(vec![make(0.9, 0.0), make(0.8, 500.0)]);
        assert_eq!(result.len(), 2);
    }
}
