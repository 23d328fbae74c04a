//! OpenAI-compatible image generation.

use aigw_core::images::response_field_name;
use aigw_core::{ImageGenerationBody, validate_image_request};
use axum::Json;
use axum::extract::State;
use serde_json::{Map, Value, json};

use crate::error::HttpError;
use crate::state::AppState;

/// `POST /v1/images/generations`
pub async fn generations(
    State(state): State<AppState>,
    Json(body): Json<ImageGenerationBody>,
) -> Result<Json<Value>, HttpError> {
    let request = validate_image_request(
        &body,
        state.images.catalog(),
        &state.settings.imagine.model_id,
    )?;
    let field = response_field_name(&request.response_format);
    let images = state.images.generate(request).await?;

    let data: Vec<Value> = images
        .into_iter()
        .map(|image| {
            let mut entry = Map::new();
            entry.insert(field.to_string(), Value::String(image));
            Value::Object(entry)
        })
        .collect();
    Ok(Json(json!({
        "created": chrono::Utc::now().timestamp(),
        "data": data,
    })))
}
