//! OpenAI-compatible one-shot image generation.

use std::sync::Arc;

use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;

use crate::error::CoreError;
use crate::imagine::params::{SIZE_TO_ASPECT, resolve_aspect_ratio};
use crate::ports::{
    GenerationOutput, GenerationService, ImageRequest, ModelCatalog, TokenManager, acquire_token,
};

pub const MAX_IMAGES_PER_REQUEST: u32 = 10;
const DEFAULT_SIZE: &str = "1024x1024";

/// Body of `POST /v1/images/generations`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageGenerationBody {
    #[serde(default)]
    pub prompt: String,
    pub model: Option<String>,
    pub n: Option<i64>,
    pub size: Option<String>,
    pub response_format: Option<String>,
}

/// Accepted response formats; `base64` is an alias of `b64_json`.
pub fn normalize_response_format(raw: Option<&str>) -> Result<&'static str, CoreError> {
    let value = raw.map_or_else(|| "b64_json".to_string(), |s| s.trim().to_lowercase());
    match value.as_str() {
        "b64_json" | "base64" => Ok("b64_json"),
        "url" => Ok("url"),
        _ => Err(CoreError::invalid_param(
            "response_format must be one of b64_json, base64, url",
            "invalid_response_format",
            "response_format",
        )),
    }
}

/// JSON key each image is returned under.
pub fn response_field_name(format: &str) -> &'static str {
    if format == "url" {
        "url"
    } else {
        "b64_json"
    }
}

/// Validate the body into a generation request.
pub fn validate_image_request(
    body: &ImageGenerationBody,
    catalog: &dyn ModelCatalog,
    default_model: &str,
) -> Result<ImageRequest, CoreError> {
    let prompt = body.prompt.trim();
    if prompt.is_empty() {
        return Err(CoreError::invalid_param(
            "Prompt cannot be empty",
            "empty_prompt",
            "prompt",
        ));
    }

    let n = body.n.unwrap_or(1);
    let n = u32::try_from(n)
        .ok()
        .filter(|n| (1..=MAX_IMAGES_PER_REQUEST).contains(n))
        .ok_or_else(|| CoreError::invalid_param("n must be between 1 and 10", "invalid_n", "n"))?;

    let size = body.size.as_deref().map_or(DEFAULT_SIZE, str::trim);
    if !SIZE_TO_ASPECT.iter().any(|(allowed, _)| *allowed == size) {
        let allowed: Vec<&str> = SIZE_TO_ASPECT.iter().map(|(s, _)| *s).collect();
        return Err(CoreError::invalid_param(
            format!("size must be one of {allowed:?}"),
            "invalid_size",
            "size",
        ));
    }

    let model_id = body.model.as_deref().unwrap_or(default_model);
    if !catalog.get(model_id).is_some_and(|m| m.is_image) {
        return Err(CoreError::invalid_param(
            format!(
                "The model `{model_id}` is not supported for image generation. Supported: {:?}",
                catalog.image_models()
            ),
            "model_not_supported",
            "model",
        ));
    }

    let response_format = normalize_response_format(body.response_format.as_deref())?;

    Ok(ImageRequest {
        model_id: model_id.to_string(),
        prompt: prompt.to_string(),
        n,
        aspect_ratio: resolve_aspect_ratio(size).to_string(),
        size: size.to_string(),
        response_format: response_format.to_string(),
        stream: false,
        nsfw: None,
    })
}

/// One-shot image generation against the token pool.
pub struct ImageService {
    tokens: Arc<dyn TokenManager>,
    generation: Arc<dyn GenerationService>,
    models: Arc<dyn ModelCatalog>,
}

impl std::fmt::Debug for ImageService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageService").finish_non_exhaustive()
    }
}

impl ImageService {
    pub fn new(
        tokens: Arc<dyn TokenManager>,
        generation: Arc<dyn GenerationService>,
        models: Arc<dyn ModelCatalog>,
    ) -> Self {
        Self {
            tokens,
            generation,
            models,
        }
    }

    pub fn catalog(&self) -> &dyn ModelCatalog {
        self.models.as_ref()
    }

    /// Generate images, returning at most `request.n` non-empty results.
    pub async fn generate(&self, request: ImageRequest) -> Result<Vec<String>, CoreError> {
        let candidates = self
            .models
            .get(&request.model_id)
            .map(|m| m.pool_candidates)
            .unwrap_or_default();
        let token = acquire_token(self.tokens.as_ref(), &candidates)
            .await
            .ok_or(CoreError::NoToken)?;

        let limit = request.n as usize;
        let images = match self.generation.generate(&token, request).await? {
            GenerationOutput::Images(images) => images,
            GenerationOutput::Stream(stream) => {
                let events: Vec<_> = stream.collect().await;
                let mut images = Vec::new();
                for event in events {
                    let event = event?;
                    if event.is_final_image()
                        && let Some(image) = ["b64_json", "url", "image"]
                            .iter()
                            .find_map(|k| event.0.get(*k).and_then(Value::as_str))
                    {
                        images.push(image.to_string());
                    }
                }
                images
            }
        };

        let images: Vec<String> = images
            .into_iter()
            .filter(|img| !img.is_empty() && img != "error")
            .take(limit)
            .collect();
        if images.is_empty() {
            return Err(CoreError::EmptyImage);
        }
        Ok(images)
    }
}
