mod detect;
mod health;
mod metrics;

use crate::{model_service::ModelService, server::SharedState};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

pub fn api_routes<M: ModelService>(max_upload_bytes: usize) -> Router<SharedState<M>> {
    Router::new()
        .route("/", get(health::home))
        .route("/health", get(health::healthcheck))
        .route("/metrics", get(metrics::metrics_handler::<M>))
        .route(
            "/api/detect",
            post(detect::detect::<M>).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        catalog::ClassCatalog,
        config::DetectionSettings,
        detection::{Candidate, DetectionFilter},
        detection_service::DetectionService,
        model_service::{ModelError, ModelService},
        telemetry::Metrics,
    };
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
    use std::io::Cursor;
    use std::sync::Arc;
    use tower::ServiceExt;

    #[derive(Clone)]
    struct MockModelService {
        candidates: Vec<Candidate>,
    }

    #[async_trait]
    impl ModelService for MockModelService {
        async fn predict(&self, _image: &DynamicImage) -> Result<Vec<Candidate>, ModelError> {
            Ok(self.candidates.clone())
        }
    }

    fn test_router(candidates: Vec<Candidate>) -> Router {
        let catalog = ClassCatalog::from_labels(
            [
                "Hardhat",
                "Mask",
                "NO-Hardhat",
                "NO-Mask",
                "NO-Safety Vest",
                "Person",
                "Safety Cone",
                "Safety Vest",
                "machinery",
                "vehicle",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        );
        let detection_service = Arc::new(DetectionService::new(
            MockModelService { candidates },
            catalog,
            DetectionFilter::new(&DetectionSettings::default()),
        ));
        let state = SharedState {
            detection_service,
            metrics: Arc::new(Metrics::new()),
        };

        Router::new()
            .merge(api_routes(10 * 1024 * 1024))
            .with_state(state)
    }

    fn png_fixture() -> Vec<u8> {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(100, 100, Rgb([120, 130, 140]));
        let mut buffer = Cursor::new(Vec::new());
        img.write_to(&mut buffer, ImageFormat::Png).unwrap();
        buffer.into_inner()
    }

    fn multipart_request(uri: &str, field_name: &str, payload: &[u8]) -> Request<Body> {
        let boundary = "test-boundary";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; \
                 name=\"{field_name}\"; filename=\"upload.png\"\r\n\
                 Content-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(payload);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn home_reports_the_server_is_running() {
        let response = test_router(vec![])
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_bytes(response).await;
        assert_eq!(
            String::from_utf8(body).unwrap(),
            r#"{"message":"Server is running"}"#
        );
    }

    #[tokio::test]
    async fn healthcheck_reports_available() {
        let response = test_router(vec![])
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn detect_with_return_json_returns_the_detection_list() {
        let candidates = vec![Candidate {
            class_id: Some(2),
            confidence: Some(0.87),
            x1: 10.0,
            y1: 10.0,
            x2: 50.0,
            y2: 50.0,
        }];

        let response = test_router(candidates)
            .oneshot(multipart_request(
                "/api/detect?return_json=true",
                "file",
                &png_fixture(),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_bytes(response).await;
        assert_eq!(
            String::from_utf8(body).unwrap(),
            r#"{"detected_objects":[{"class":"NO-Hardhat","bbox":[10,10,50,50],"confidence":0.87}]}"#
        );
    }

    #[tokio::test]
    async fn detect_defaults_to_an_annotated_jpeg() {
        let response = test_router(vec![])
            .oneshot(multipart_request("/api/detect", "file", &png_fixture()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            Some("image/jpeg")
        );

        let body = body_bytes(response).await;
        let decoded = image::load_from_memory(&body).unwrap();
        assert_eq!(decoded.to_rgb8().dimensions(), (100, 100));
    }

    #[tokio::test]
    async fn malformed_uploads_are_rejected_with_400() {
        let response = test_router(vec![])
            .oneshot(multipart_request(
                "/api/detect?return_json=true",
                "file",
                b"definitely not an image",
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn uploads_without_a_file_part_are_rejected_with_400() {
        let response = test_router(vec![])
            .oneshot(multipart_request(
                "/api/detect?return_json=true",
                "attachment",
                &png_fixture(),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
