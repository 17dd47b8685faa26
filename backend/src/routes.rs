use actix_files::{Files, NamedFile};
use actix_multipart::{Field, Multipart};
use actix_web::{HttpResponse, web};
use futures_util::TryStreamExt;
use log::{error, info, warn};
use sha2::{Digest, Sha256};
use shared::{HealthResponse, PredictionResponse};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{ServiceConfig, ValidationConfig};
use crate::error::ApiError;
use crate::inference::Classifier;
use crate::inference::decision::Prediction;
use crate::inference::preprocess::Preprocessor;
use crate::inference::validate::{ValidationError, check_size, validate_image};

const UPLOAD_FIELD: &str = "file";

/// Everything a request handler needs; built once and shared by all workers.
pub struct AppState {
    classifier: Arc<dyn Classifier>,
    preprocessor: Preprocessor,
    validation: ValidationConfig,
}

impl AppState {
    pub fn new(classifier: Arc<dyn Classifier>, config: &ServiceConfig) -> Self {
        Self {
            classifier,
            preprocessor: Preprocessor::new(&config.preprocessing),
            validation: config.validation.clone(),
        }
    }

    /// Validation, preprocessing and inference for one upload. Blocking.
    fn classify(&self, bytes: &[u8]) -> Result<Prediction, ApiError> {
        validate_image(bytes, &self.validation).inspect_err(|e| {
            warn!("Rejected upload: {}", e);
        })?;

        let tensor = self.preprocessor.process(bytes).map_err(|e| {
            error!("Error processing image: {}", e);
            ApiError::from(e)
        })?;

        self.classifier.predict(&tensor).map_err(|e| {
            error!("Error during prediction: {}", e);
            ApiError::from(e)
        })
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig, static_dir: Option<PathBuf>) {
    cfg.service(web::resource("/health").route(web::get().to(health)))
        .service(web::resource("/model/info").route(web::get().to(model_info)))
        .service(web::resource("/predict").route(web::post().to(predict)));

    if let Some(dir) = static_dir {
        let index = dir.join("index.html");
        cfg.service(web::resource("/").route(web::get().to(move || {
            let index = index.clone();
            async move { NamedFile::open_async(index).await }
        })))
        .service(Files::new("/static", dir));
    }
}

async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        model_loaded: state.classifier.is_loaded(),
        message: "Art Detection API is running".to_string(),
    })
}

async fn model_info(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let info = state.classifier.info().ok_or(ApiError::ModelUnavailable)?;
    Ok(HttpResponse::Ok().json(info))
}

struct Upload {
    filename: String,
    bytes: Vec<u8>,
}

async fn predict(
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let Upload { filename, bytes } = read_upload(&mut payload, &state.validation).await?;

    info!(
        "Processing image: {} ({} bytes, sha256 {})",
        filename,
        bytes.len(),
        short_digest(&bytes)
    );

    let worker_state = state.clone();
    let prediction = web::block(move || worker_state.classify(&bytes))
        .await
        .map_err(|e| {
            error!("Blocking inference task failed: {}", e);
            ApiError::Internal(e.to_string())
        })??;

    info!(
        "Prediction: {} with confidence: {:.4}",
        prediction.label, prediction.confidence
    );

    Ok(HttpResponse::Ok().json(PredictionResponse {
        prediction: prediction.label,
        confidence: prediction.confidence,
        probabilities: prediction.probabilities,
        filename,
    }))
}

/// Pulls the `file` field out of the form, enforcing the image content type
/// and the size ceiling while streaming.
async fn read_upload(
    payload: &mut Multipart,
    limits: &ValidationConfig,
) -> Result<Upload, ApiError> {
    while let Some(mut field) = payload.try_next().await.map_err(malformed)? {
        if field.name() != Some(UPLOAD_FIELD) {
            drain(&mut field).await?;
            continue;
        }

        let is_image = field
            .content_type()
            .is_some_and(|mime| mime.essence_str().starts_with("image/"));
        if !is_image {
            warn!(
                "Rejected upload with content type {:?}",
                field.content_type().map(|mime| mime.to_string())
            );
            return Err(ApiError::BadRequest(
                "File must be an image (JPEG, PNG, or JPG)".to_string(),
            ));
        }

        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .unwrap_or_default()
            .to_string();

        let mut bytes = Vec::new();
        while let Some(chunk) = field.try_next().await.map_err(malformed)? {
            bytes.extend_from_slice(&chunk);
            check_size(bytes.len(), limits).map_err(|e: ValidationError| {
                warn!("Rejected upload {}: {}", filename, e);
                ApiError::from(e)
            })?;
        }

        return Ok(Upload { filename, bytes });
    }

    Err(ApiError::BadRequest("No file uploaded".to_string()))
}

async fn drain(field: &mut Field) -> Result<(), ApiError> {
    while field.try_next().await.map_err(malformed)?.is_some() {}
    Ok(())
}

fn malformed(err: actix_multipart::MultipartError) -> ApiError {
    ApiError::BadRequest(format!("Malformed multipart body: {}", err))
}

fn short_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(12);
    digest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::ImageTensor;
    use crate::inference::model::ModelError;
    use actix_web::http::{StatusCode, header};
    use actix_web::{App, test};
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use shared::{Label, ModelInfo, Probabilities};
    use std::io::Cursor;

    /// Loaded, but every forward pass yields an unusable output.
    struct BrokenClassifier;

    impl Classifier for BrokenClassifier {
        fn is_loaded(&self) -> bool {
            true
        }

        fn predict(&self, _input: &ImageTensor) -> Result<Prediction, ModelError> {
            Err(ModelError::OutputArity(7))
        }

        fn info(&self) -> Option<ModelInfo> {
            None
        }
    }

    struct FixedClassifier {
        loaded: bool,
        probabilities: Probabilities,
    }

    impl Classifier for FixedClassifier {
        fn is_loaded(&self) -> bool {
            self.loaded
        }

        fn predict(&self, input: &ImageTensor) -> Result<Prediction, ModelError> {
            if !self.loaded {
                return Err(ModelError::NotLoaded);
            }
            assert_eq!(input.shape(), &[1, 3, 224, 224]);
            Ok(Prediction::from(self.probabilities))
        }

        fn info(&self) -> Option<ModelInfo> {
            self.loaded.then(|| ModelInfo {
                model_name: "EfficientNet-B0 with FFT".to_string(),
                backbone: "EfficientNet-B0".to_string(),
                input_shape: "224x224x3".to_string(),
                classes: vec!["Real Painting".to_string(), "AI-Generated".to_string()],
                framework: "PyTorch (libtorch via tch)".to_string(),
                preprocessing: "fft-magnitude-spectrum".to_string(),
                checkpoint: "finalModel.pt".to_string(),
                device: "Cpu".to_string(),
            })
        }
    }

    fn state(loaded: bool, config: &ServiceConfig) -> web::Data<AppState> {
        let classifier = FixedClassifier {
            loaded,
            probabilities: Probabilities { real: 0.2, ai: 0.8 },
        };
        web::Data::new(AppState::new(Arc::new(classifier), config))
    }

    fn small_jpeg() -> Vec<u8> {
        let img = RgbImage::from_fn(40, 30, |x, y| Rgb([(x * 6) as u8, (y * 8) as u8, 120]));
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
            .unwrap();
        buf
    }

    fn multipart_body(
        field: &str,
        filename: &str,
        content_type: &str,
        data: &[u8],
    ) -> (String, Vec<u8>) {
        let boundary = "artdetect-test-boundary";
        let mut body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
        (format!("multipart/form-data; boundary={boundary}"), body)
    }

    fn upload(field: &str, filename: &str, content_type: &str, data: &[u8]) -> test::TestRequest {
        let (header_value, body) = multipart_body(field, filename, content_type, data);
        test::TestRequest::post()
            .uri("/predict")
            .insert_header((header::CONTENT_TYPE, header_value))
            .set_payload(body)
    }

    fn get(uri: &str) -> test::TestRequest {
        test::TestRequest::get().uri(uri)
    }

    macro_rules! service {
        ($state:expr) => {
            service!($state, None)
        };
        ($state:expr, $static_dir:expr) => {
            test::init_service(
                App::new()
                    .app_data($state)
                    .configure(|cfg| configure_routes(cfg, $static_dir)),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn health_reports_model_state() {
        let app = service!(state(true, &ServiceConfig::default()));
        let resp = test::call_service(&app, get("/health").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: HealthResponse = test::read_body_json(resp).await;
        assert_eq!(body.status, "healthy");
        assert!(body.model_loaded);
    }

    #[actix_web::test]
    async fn model_info_requires_a_loaded_model() {
        let app = service!(state(false, &ServiceConfig::default()));
        let resp = test::call_service(&app, get("/model/info").to_request()).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        let app = service!(state(true, &ServiceConfig::default()));
        let resp = test::call_service(&app, get("/model/info").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let info: ModelInfo = test::read_body_json(resp).await;
        assert_eq!(info.classes, vec!["Real Painting", "AI-Generated"]);
    }

    #[actix_web::test]
    async fn jpeg_upload_is_classified() {
        let app = service!(state(true, &ServiceConfig::default()));
        let req = upload("file", "canvas.jpg", "image/jpeg", &small_jpeg()).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: PredictionResponse = test::read_body_json(resp).await;
        assert_eq!(body.prediction, Label::Ai);
        assert!((0.0..=1.0).contains(&body.confidence));
        assert_eq!(body.confidence, 0.8);
        assert!((body.probabilities.real + body.probabilities.ai - 1.0).abs() < 1e-6);
        assert_eq!(body.filename, "canvas.jpg");
    }

    #[actix_web::test]
    async fn text_upload_is_a_bad_request() {
        let app = service!(state(true, &ServiceConfig::default()));
        let req = upload("file", "test.txt", "text/plain", b"This is not an image").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: shared::ErrorResponse = test::read_body_json(resp).await;
        assert_eq!(body.error, "File must be an image (JPEG, PNG, or JPG)");
    }

    #[actix_web::test]
    async fn image_content_type_with_garbage_bytes_is_a_bad_request() {
        let app = service!(state(true, &ServiceConfig::default()));
        let req = upload("file", "fake.png", "image/png", b"definitely not a png").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn oversized_upload_is_a_bad_request() {
        let mut config = ServiceConfig::default();
        config.validation.max_file_size = 256;
        let app = service!(state(true, &config));
        let req = upload("file", "big.jpg", "image/jpeg", &small_jpeg()).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: shared::ErrorResponse = test::read_body_json(resp).await;
        assert!(body.error.starts_with("File size exceeds maximum allowed size"));
    }

    #[actix_web::test]
    async fn missing_file_field_is_a_bad_request() {
        let app = service!(state(true, &ServiceConfig::default()));
        let req = upload("picture", "canvas.jpg", "image/jpeg", &small_jpeg()).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn prediction_without_model_is_unavailable() {
        let app = service!(state(false, &ServiceConfig::default()));
        let req = upload("file", "canvas.jpg", "image/jpeg", &small_jpeg()).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[actix_web::test]
    async fn inference_failure_is_an_opaque_server_error() {
        let state = web::Data::new(AppState::new(
            Arc::new(BrokenClassifier),
            &ServiceConfig::default(),
        ));
        let app = service!(state);
        let req = upload("file", "canvas.jpg", "image/jpeg", &small_jpeg()).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body: shared::ErrorResponse = test::read_body_json(resp).await;
        assert_eq!(body.error, "Internal server error while processing the image");
        assert!(!body.error.contains("output"));
    }

    #[actix_web::test]
    async fn static_front_end_is_served_when_configured() {
        let dir = std::env::temp_dir().join(format!("artdetect-static-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("index.html"), "<h1>Art Detection</h1>").unwrap();
        std::fs::write(dir.join("app.js"), "console.log('ready');").unwrap();

        let app = service!(state(true, &ServiceConfig::default()), Some(dir.clone()));

        let resp = test::call_service(&app, get("/").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = test::read_body(resp).await;
        assert_eq!(body.as_ref(), b"<h1>Art Detection</h1>");

        let resp = test::call_service(&app, get("/static/app.js").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let resp = test::call_service(&app, get("/static/missing.css").to_request()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        // The API routes stay in place alongside the front-end.
        let resp = test::call_service(&app, get("/health").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[actix_web::test]
    async fn front_end_routes_are_absent_by_default() {
        let app = service!(state(true, &ServiceConfig::default()));
        let resp = test::call_service(&app, get("/").to_request()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[::core::prelude::v1::test]
    fn classify_maps_validation_failures_to_client_errors() {
        let state = AppState::new(
            Arc::new(FixedClassifier {
                loaded: true,
                probabilities: Probabilities { real: 0.9, ai: 0.1 },
            }),
            &ServiceConfig::default(),
        );
        assert!(matches!(state.classify(b"plain text"), Err(ApiError::Validation(_))));

        let prediction = state.classify(&small_jpeg()).unwrap();
        assert_eq!(prediction.label, Label::Real);
    }

    #[::core::prelude::v1::test]
    fn digest_is_short_and_stable() {
        assert_eq!(short_digest(b"abc"), "ba7816bf8f01");
    }
}
