//! `GenerationService` over the upstream `/v1/images/generations` endpoint.

use aigw_core::ports::{GenerationError, GenerationOutput, GenerationService, ImageRequest};
use aigw_core::transport::TransportError;
use async_trait::async_trait;
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;

use crate::client::UpstreamClient;
use crate::sse::provider_events;

pub const IMAGES_PATH: &str = "/v1/images/generations";

#[derive(Debug, Serialize)]
struct GenerationBody<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
    size: &'a str,
    aspect_ratio: &'a str,
    response_format: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    nsfw: Option<bool>,
}

impl<'a> From<&'a ImageRequest> for GenerationBody<'a> {
    fn from(request: &'a ImageRequest) -> Self {
        Self {
            model: &request.model_id,
            prompt: &request.prompt,
            n: request.n,
            size: &request.size,
            aspect_ratio: &request.aspect_ratio,
            response_format: &request.response_format,
            stream: request.stream,
            nsfw: request.nsfw,
        }
    }
}

/// Map a transport failure onto the generation error taxonomy.
///
/// 400 and 422 mean the upstream refused the request itself, so retrying
/// the same parameters cannot succeed.
pub(crate) fn generation_error(error: TransportError) -> GenerationError {
    match error {
        TransportError::Status {
            status: 400 | 422,
            body,
        } => GenerationError::Rejected(body),
        TransportError::Status { status, body } => GenerationError::Upstream {
            status,
            message: body,
        },
        TransportError::Request(message) => GenerationError::Transport(message),
        TransportError::Decode(message) => GenerationError::Decode(message),
    }
}

/// Pull the encoded images out of an OpenAI-style `{data: [...]}` body.
///
/// Each entry contributes its `b64_json`, else its `url`, else an empty
/// string so positions stay aligned with the request.
fn images_from_body(body: &Value) -> Result<Vec<String>, GenerationError> {
    let data = body
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| GenerationError::Decode("response has no data array".to_string()))?;
    Ok(data
        .iter()
        .map(|item| {
            ["b64_json", "url"]
                .iter()
                .find_map(|k| item.get(*k).and_then(Value::as_str))
                .unwrap_or_default()
                .to_string()
        })
        .collect())
}

#[async_trait]
impl GenerationService for UpstreamClient {
    async fn generate(
        &self,
        token: &str,
        request: ImageRequest,
    ) -> Result<GenerationOutput, GenerationError> {
        let body = serde_json::to_value(GenerationBody::from(&request))
            .map_err(|e| GenerationError::Decode(e.to_string()))?;

        let response = self
            .send(Method::POST, IMAGES_PATH, token, Some(&body), request.stream)
            .await
            .map_err(generation_error)?;

        if request.stream {
            return Ok(GenerationOutput::Stream(provider_events(
                response.bytes_stream(),
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| GenerationError::Decode(e.to_string()))?;
        images_from_body(&body).map(GenerationOutput::Images)
    }
}
