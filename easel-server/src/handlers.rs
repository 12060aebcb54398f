use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::header,
    response::IntoResponse,
};
use base64::{prelude::BASE64_STANDARD, Engine};
use easel_core::{GeneratedImage, Loader, ModelRegistry};

use crate::error::ApiError;
use crate::state::AppState;
use crate::types::{GenerationBody, GenerationResponse, ModelInfo, ModelsResponse};

const DOWNLOAD_FILE_NAME: &str = "generated_image.png";

pub async fn health_check() -> &'static str {
    "OK"
}

pub async fn list_models() -> Json<ModelsResponse> {
    Json(ModelsResponse {
        models: ModelRegistry::all().iter().map(ModelInfo::from).collect(),
        default: ModelRegistry::default_descriptor().display_name.to_string(),
    })
}

/// Runs one generation to completion before responding.
pub async fn generate_image<L: Loader + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Json(body): Json<GenerationBody>,
) -> Result<Json<GenerationResponse>, ApiError> {
    let request = body.into_request()?;
    let model = request.model.display_name.to_string();

    let worker_state = state.clone();
    let image = tokio::task::spawn_blocking(move || {
        let mut engine = worker_state.engine();
        engine.generate(&request, &mut |_| {})
    })
    .await??;

    let encoded = encode_png(&image)?;
    let response = GenerationResponse {
        image: BASE64_STANDARD.encode(encoded),
        seed: image.seed,
        model,
        width: image.width(),
        height: image.height(),
    };
    state.set_latest(image);
    Ok(Json(response))
}

/// The most recent image as a PNG download.
pub async fn latest_image<L: Loader + 'static>(
    State(state): State<Arc<AppState<L>>>,
) -> Result<impl IntoResponse, ApiError> {
    let image = state.latest().ok_or(ApiError::NoImage)?;
    let bytes = encode_png(&image)?;
    Ok((
        [
            (header::CONTENT_TYPE, "image/png".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{DOWNLOAD_FILE_NAME}\""),
            ),
        ],
        bytes,
    ))
}

fn encode_png(image: &GeneratedImage) -> Result<Vec<u8>, ApiError> {
    image
        .to_png_bytes()
        .map_err(|e| ApiError::Encode(format!("{e:#}")))
}
