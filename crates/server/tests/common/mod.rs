#![allow(dead_code)]

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode};
use axum::Router;
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use http_body_util::BodyExt;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use neuropixel_common::config::{InferenceConfig, ModelConfig};
use neuropixel_common::{LocalBlobStore, NeuroPixelConfig};
use neuropixel_engine::{DropoutAutoencoder, InferenceEngine};
use neuropixel_server::{
    build_app_router, spawn_workers, AppState, InMemoryJobStore, JobQueue, Orchestrator,
};

pub const MODEL_SIZE: usize = 16;
const BOUNDARY: &str = "neuropixel-test-boundary";

/// Options for a test application.
pub struct TestOptions {
    pub max_queue_size: usize,
    pub workers: usize,
    pub max_upload_bytes: usize,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            max_queue_size: 16,
            workers: 1,
            max_upload_bytes: 1024 * 1024,
        }
    }
}

/// A running application with its scratch directory.
pub struct TestApp {
    pub router: Router,
    pub orchestrator: Arc<Orchestrator>,
    _dir: TempDir,
}

/// Build the full application with a small random model.
///
/// `workers: 0` leaves queued jobs untouched, which keeps their status
/// stable for assertions.
pub fn build_test_app(options: TestOptions) -> TestApp {
    let dir = tempfile::tempdir().unwrap();

    let mut config = NeuroPixelConfig::default();
    config.server.upload_dir = dir.path().join("uploads");
    config.server.max_upload_bytes = options.max_upload_bytes;
    config.model = ModelConfig {
        image_size: MODEL_SIZE,
        channels: vec![4, 8],
        ..ModelConfig::default()
    };
    config.inference = InferenceConfig {
        num_mc_samples: 3,
        ..InferenceConfig::default()
    };
    config.worker.max_queue_size = options.max_queue_size;

    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = DropoutAutoencoder::from_var_builder(&config.model, vb, &device).unwrap();

    let blobs = Arc::new(LocalBlobStore::new(&config.server.upload_dir).unwrap());
    let engine = InferenceEngine::new(Arc::new(model), blobs.clone(), &config.inference).unwrap();
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(InMemoryJobStore::new()),
        blobs,
        Arc::new(JobQueue::new(options.max_queue_size)),
        Arc::new(engine),
        config.server.clone(),
    ));
    if options.workers > 0 {
        spawn_workers(orchestrator.clone(), options.workers);
    }

    let router = build_app_router(AppState::new(orchestrator.clone(), config));
    TestApp {
        router,
        orchestrator,
        _dir: dir,
    }
}

/// Encode a solid-colour image in the given format.
pub fn test_image(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([200, 120, 40]));
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut buffer, format)
        .unwrap();
    buffer.into_inner()
}

/// Build a multipart body with a single file field.
pub fn multipart_body(field: &str, filename: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// POST a multipart upload.
pub async fn upload(app: Router, content_type: &str, data: &[u8]) -> Response<Body> {
    upload_field(app, "file", content_type, data).await
}

pub async fn upload_field(
    app: Router,
    field: &str,
    content_type: &str,
    data: &[u8],
) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/files/upload")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(field, "input", content_type, data)))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri).await
}

pub async fn post(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::POST, uri).await
}

pub async fn delete(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::DELETE, uri).await
}

async fn send(app: Router, method: Method, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Upload an image and return its job id.
pub async fn upload_ok(app: &TestApp) -> String {
    let response = upload(
        app.router.clone(),
        "image/png",
        &test_image(40, 30, ImageFormat::Png),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    body_json(response).await["file_id"]
        .as_str()
        .unwrap()
        .to_string()
}

/// Poll the status endpoint until the job reaches a terminal state.
pub async fn wait_for_terminal(app: &TestApp, id: &str) -> Value {
    let uri = format!("/api/v1/files/status/{id}");
    for _ in 0..200 {
        let json = body_json(get(app.router.clone(), &uri).await).await;
        if json["status"] == "completed" || json["status"] == "failed" {
            return json;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {id} did not finish in time");
}
