use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use base64::{prelude::BASE64_STANDARD, Engine};
use easel_core::{
    ComputeTarget, DeviceMap, GenerationEngine, Loader, ModelDescriptor, ModelLike,
    SeededGenerator, SynthesisParams,
};
use http_body_util::BodyExt;
use image::{DynamicImage, Rgb, RgbImage};
use serde_json::{json, Value};
use tower::ServiceExt; // for `app.oneshot()`

use crate::routes::create_router;
use crate::state::AppState;
use crate::types::{GenerationResponse, ModelsResponse};

#[derive(Default)]
struct StubLoader {
    loads: Arc<AtomicUsize>,
}

struct StubPipeline;

impl ModelLike for StubPipeline {
    fn run(
        &mut self,
        params: &SynthesisParams<'_>,
        generator: &mut SeededGenerator,
    ) -> anyhow::Result<DynamicImage> {
        let pixel = Rgb([generator.seed() as u8, params.steps as u8, 0]);
        Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 8, pixel)))
    }
}

impl Loader for StubLoader {
    type Model = StubPipeline;

    fn load(&mut self, model: &ModelDescriptor, _target: &ComputeTarget) -> anyhow::Result<StubPipeline> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if model.display_name == "Kandinsky 2.2" {
            anyhow::bail!("architecture not supported");
        }
        Ok(StubPipeline)
    }
}

fn app() -> (Router, Arc<AtomicUsize>) {
    let loader = StubLoader::default();
    let loads = loader.loads.clone();
    let engine = GenerationEngine::new(loader, DeviceMap::ForceCpu);
    (create_router(Arc::new(AppState::new(engine))), loads)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

#[tokio::test]
async fn health_check_responds_ok() {
    let (app, _) = app();
    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"OK");
}

#[tokio::test]
async fn lists_registered_models() {
    let (app, _) = app();
    let response = app.oneshot(get("/v1/models")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let models: ModelsResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(models.models.len(), 3);
    assert_eq!(models.default, "Stable Diffusion v1.5");
    assert_eq!(models.models[1].identifier, "stabilityai/stable-diffusion-xl-base-1.0");
}

#[tokio::test]
async fn generates_with_fixed_seed() {
    let (app, loads) = app();
    let body = json!({
        "prompt": "a red cube",
        "negative_prompt": "",
        "model": "Stable Diffusion v1.5",
        "steps": 25,
        "guidance_scale": 7.5,
        "seed": 42
    });
    let response = app.oneshot(post_json("/v1/images/generations", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let generated: GenerationResponse =
        serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(generated.seed, 42);
    assert_eq!(generated.model, "Stable Diffusion v1.5");
    assert_eq!((generated.width, generated.height), (16, 8));

    let png = BASE64_STANDARD.decode(generated.image).unwrap();
    let decoded = image::load_from_memory(&png).unwrap().to_rgb8();
    assert_eq!(decoded.get_pixel(0, 0).0, [42, 25, 0]);
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn omitted_fields_take_defaults() {
    let (app, _) = app();
    let response = app
        .oneshot(post_json("/v1/images/generations", json!({ "prompt": "a lighthouse" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let generated: GenerationResponse =
        serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(generated.model, "Stable Diffusion v1.5");
    let png = BASE64_STANDARD.decode(generated.image).unwrap();
    let decoded = image::load_from_memory(&png).unwrap().to_rgb8();
    assert_eq!(decoded.get_pixel(0, 0).0[1], 25);
}

#[tokio::test]
async fn empty_prompt_is_a_bad_request() {
    let (app, loads) = app();
    let response = app
        .oneshot(post_json("/v1/images/generations", json!({ "prompt": "  " })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let error: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(error["category"], "ValidationError");
    assert_eq!(loads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_model_is_a_bad_request() {
    let (app, _) = app();
    let body = json!({ "prompt": "a cat", "model": "Imagen" });
    let response = app.oneshot(post_json("/v1/images/generations", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let error: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(error["category"], "UnknownModelError");
}

#[tokio::test]
async fn load_failure_is_reported_and_server_stays_usable() {
    let (app, loads) = app();
    let failing = json!({ "prompt": "a cat", "model": "Kandinsky 2.2", "seed": 1 });
    let response = app
        .clone()
        .oneshot(post_json("/v1/images/generations", failing))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let error: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(error["category"], "LoadError");
    assert!(error["error"].as_str().unwrap().contains("architecture not supported"));

    let working = json!({ "prompt": "a cat", "seed": 1 });
    let response = app
        .oneshot(post_json("/v1/images/generations", working))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(loads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn latest_image_downloads_as_png() {
    let (app, _) = app();
    let response = app.clone().oneshot(get("/v1/images/latest.png")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = json!({ "prompt": "a red cube", "seed": 7 });
    let response = app
        .clone()
        .oneshot(post_json("/v1/images/generations", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(get("/v1/images/latest.png")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"generated_image.png\""
    );
    let png = body_bytes(response).await;
    let decoded = image::load_from_memory(&png).unwrap().to_rgb8();
    assert_eq!(decoded.get_pixel(0, 0).0[0], 7);
}
