use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures_util::StreamExt;
use tracing::Instrument;
use uuid::Uuid;

use crate::detector::{contains_label, Detector};
use crate::errors::PredictError;
use crate::models::PredictionResponse;

/// Multipart field that carries the uploaded image.
const UPLOAD_FIELD: &str = "file";

/// Class label that flips `pothole_detected` to true.
#[derive(Debug, Clone)]
pub struct TargetLabel(pub String);

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/predict").route(web::post().to(predict)));
}

pub async fn predict(
    payload: Multipart,
    detector: web::Data<dyn Detector>,
    target: web::Data<TargetLabel>,
) -> Result<HttpResponse, PredictError> {
    let span = tracing::info_span!("predict", request_id = %Uuid::new_v4());
    detect_upload(payload, detector, target).instrument(span).await
}

async fn detect_upload(
    mut payload: Multipart,
    detector: web::Data<dyn Detector>,
    target: web::Data<TargetLabel>,
) -> Result<HttpResponse, PredictError> {
    let upload = read_upload(&mut payload).await?;
    tracing::debug!(bytes = upload.len(), "Upload received");

    let worker = detector.clone();
    let results = web::block(move || -> Result<_, PredictError> {
        let image = image::load_from_memory(&upload)?;
        Ok(worker.detect(&image)?)
    })
    .await
    .map_err(|_| PredictError::Blocking)?
    .map_err(|e| {
        tracing::error!(error = %e, "Prediction failed");
        e
    })?;

    let pothole_detected = contains_label(&results, detector.class_names(), &target.0);
    tracing::info!(
        regions = results.iter().map(|r| r.detections.len()).sum::<usize>(),
        pothole_detected,
        "Prediction complete"
    );

    Ok(HttpResponse::Ok().json(PredictionResponse { pothole_detected }))
}

/// Reads the `file` field into memory. Every other field is drained and
/// dropped; only the first `file` field counts.
async fn read_upload(payload: &mut Multipart) -> Result<Vec<u8>, PredictError> {
    let mut upload: Option<Vec<u8>> = None;

    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|e| PredictError::Multipart(e.to_string()))?;
        let name = field.content_disposition().get_name();
        let wanted = upload.is_none() && name == Some(UPLOAD_FIELD);

        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| PredictError::Multipart(e.to_string()))?;
            if wanted {
                data.extend_from_slice(&chunk);
            }
        }

        if wanted {
            upload = Some(data);
        }
    }

    upload.ok_or(PredictError::MissingFile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{ClassNames, DetectError};
    use crate::models::{BoundingBox, Detection, ImageDetections};
    use actix_web::{dev::ServiceResponse, http::header, http::StatusCode, test, App};
    use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use std::sync::Arc;

    const BOUNDARY: &str = "pothole-test-boundary";

    struct FakeDetector {
        names: ClassNames,
        classes: Vec<usize>,
    }

    impl Detector for FakeDetector {
        fn detect(&self, _image: &DynamicImage) -> Result<Vec<ImageDetections>, DetectError> {
            let detections = self
                .classes
                .iter()
                .map(|&class_id| Detection {
                    class_id,
                    confidence: 0.8,
                    bbox: BoundingBox {
                        x1: 1.0,
                        y1: 1.0,
                        x2: 5.0,
                        y2: 5.0,
                    },
                })
                .collect();
            Ok(vec![ImageDetections { detections }])
        }

        fn class_names(&self) -> &ClassNames {
            &self.names
        }
    }

    struct FailingDetector(ClassNames);

    impl Detector for FailingDetector {
        fn detect(&self, _image: &DynamicImage) -> Result<Vec<ImageDetections>, DetectError> {
            Err(DetectError::Inference("out of memory".into()))
        }

        fn class_names(&self) -> &ClassNames {
            &self.0
        }
    }

    fn png() -> Vec<u8> {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 6, Rgb([90, 90, 90])));
        let mut buf = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
            .unwrap();
        buf
    }

    fn multipart(parts: &[(&str, Vec<u8>)]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, data) in parts {
            let head = format!(
                "--{BOUNDARY}\r\n\
                 Content-Disposition: form-data; name=\"{name}\"; filename=\"road.png\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n"
            );
            body.extend_from_slice(head.as_bytes());
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    async fn call_with(
        detector: Arc<dyn Detector>,
        content_type: &str,
        body: Vec<u8>,
    ) -> ServiceResponse {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::from(detector))
                .app_data(web::Data::new(TargetLabel("pothole".into())))
                .configure(configure),
        )
        .await;
        let req = test::TestRequest::post()
            .uri("/predict")
            .insert_header((header::CONTENT_TYPE, content_type))
            .set_payload(body)
            .to_request();
        test::call_service(&app, req).await
    }

    async fn call(detector: Arc<dyn Detector>, body: Vec<u8>) -> ServiceResponse {
        let content_type = format!("multipart/form-data; boundary={BOUNDARY}");
        call_with(detector, &content_type, body).await
    }

    fn fake(names: &[&str], classes: &[usize]) -> Arc<dyn Detector> {
        Arc::new(FakeDetector {
            names: ClassNames::from_list(names.iter().copied()),
            classes: classes.to_vec(),
        })
    }

    #[actix_rt::test]
    async fn reports_pothole_when_label_matches() {
        let detector = fake(&["crack", "Pothole"], &[0, 1]);
        let resp = call(detector, multipart(&[("file", png())])).await;

        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body, serde_json::json!({ "pothole_detected": true }));
    }

    #[actix_rt::test]
    async fn reports_false_for_other_labels() {
        let detector = fake(&["crack", "pothole"], &[0, 0, 0]);
        let resp = call(detector, multipart(&[("file", png())])).await;

        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body, serde_json::json!({ "pothole_detected": false }));
    }

    #[actix_rt::test]
    async fn reports_false_when_nothing_detected() {
        let resp = call(fake(&["pothole"], &[]), multipart(&[("file", png())])).await;

        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body, serde_json::json!({ "pothole_detected": false }));
    }

    #[actix_rt::test]
    async fn ignores_fields_other_than_file() {
        let body = multipart(&[("note", b"left lane".to_vec()), ("file", png())]);
        let resp = call(fake(&["pothole"], &[0]), body).await;

        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body, serde_json::json!({ "pothole_detected": true }));
    }

    #[actix_rt::test]
    async fn undecodable_upload_is_a_server_error() {
        let body = multipart(&[("file", b"not an image".to_vec())]);
        let resp = call(fake(&["pothole"], &[0]), body).await;

        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert!(body.get("pothole_detected").is_none());
    }

    #[actix_rt::test]
    async fn missing_file_field_is_rejected() {
        let resp = call(fake(&["pothole"], &[0]), multipart(&[("image", png())])).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[actix_rt::test]
    async fn malformed_multipart_body_is_a_bad_request() {
        let body = b"this is not a multipart body".to_vec();
        let resp = call(fake(&["pothole"], &[0]), body).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        let detail = body["detail"].as_str().unwrap();
        assert!(detail.starts_with("malformed multipart body"));
    }

    #[actix_rt::test]
    async fn non_multipart_content_type_is_a_bad_request() {
        let resp = call_with(fake(&["pothole"], &[0]), "image/png", png()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_rt::test]
    async fn detector_failure_is_a_server_error() {
        let names = ClassNames::from_list(["pothole"]);
        let detector: Arc<dyn Detector> = Arc::new(FailingDetector(names));
        let resp = call(detector, multipart(&[("file", png())])).await;

        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["detail"], "inference failed: out of memory");
    }
}
