use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::info;

use crate::consts::{GEMINI_API_BASE_URL, GOOGLE_API_KEY_HEADER, VEO3_MODEL_ID};
use crate::error::VideoGenError;
use crate::videogen::api::{ByteStream, VideoGenApi};
use crate::videogen::types::{ApiKey, GeneratedAsset, GenerationRequest, JobHandle, JobOutcome};

/// Where to reach Veo 3; the key is supplied per client.
#[derive(Debug, Clone)]
pub struct Veo3Config {
    pub base_url: String,
    pub model_id: String,
    pub request_timeout: Duration,
}

impl Default for Veo3Config {
    fn default() -> Self {
        Self {
            base_url: GEMINI_API_BASE_URL.to_string(),
            model_id: VEO3_MODEL_ID.to_string(),
            request_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Serialize)]
struct Veo3Request<'a> {
    instances: Vec<Veo3Instance<'a>>,
    parameters: Veo3Parameters<'a>,
}

#[derive(Serialize)]
struct Veo3Instance<'a> {
    prompt: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Veo3Parameters<'a> {
    aspect_ratio: &'a str,
    person_generation: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<&'a str>,
}

#[derive(Deserialize, Debug)]
struct Veo3OperationResponse {
    name: String,
    done: Option<bool>,
    response: Option<Value>,
    error: Option<Veo3OperationError>,
}

#[derive(Deserialize, Debug)]
struct Veo3OperationError {
    code: i32,
    message: String,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct Veo3PredictResponse {
    generate_video_response: Option<Veo3GenerateVideoResponse>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct Veo3GenerateVideoResponse {
    #[serde(default)]
    generated_samples: Vec<Veo3Sample>,
    #[serde(default)]
    rai_media_filtered_reasons: Vec<String>,
}

#[derive(Deserialize, Debug)]
struct Veo3Sample {
    video: Option<Veo3Video>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Veo3Video {
    uri: String,
    mime_type: Option<String>,
}

#[derive(Deserialize)]
struct GoogleErrorEnvelope {
    error: GoogleError,
}

#[derive(Deserialize)]
struct GoogleError {
    message: String,
}

/// Gemini API client for Veo 3 long-running video operations
pub struct Veo3Client {
    http: reqwest::Client,
    config: Veo3Config,
    api_key: ApiKey,
}

impl Veo3Client {
    pub fn new(http: reqwest::Client, config: Veo3Config, api_key: ApiKey) -> Self {
        Self {
            http,
            config,
            api_key,
        }
    }

    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn submit_url(&self) -> String {
        format!(
            "{}/models/{}:predictLongRunning",
            self.base_url(),
            self.config.model_id
        )
    }

    fn operation_url(&self, operation_name: &str) -> String {
        format!("{}/{}", self.base_url(), operation_name.trim_start_matches('/'))
    }

    async fn read_operation(
        &self,
        response: reqwest::Response,
    ) -> Result<JobHandle, VideoGenError> {
        let response = check_status(response).await?;

        let resjson = response
            .json::<Value>()
            .await
            .map_err(|e| network_error("Failed to read operation response", e))?;

        log::debug!("Operation status response: {resjson:?}");

        let operation: Veo3OperationResponse = serde_json::from_value(resjson).map_err(|e| {
            VideoGenError::FatalService(format!("Failed to parse operation response: {e}"))
        })?;

        operation_to_handle(operation)
    }
}

#[async_trait]
impl VideoGenApi for Veo3Client {
    async fn submit(&self, request: &GenerationRequest) -> Result<JobHandle, VideoGenError> {
        let body = Veo3Request {
            instances: vec![Veo3Instance {
                prompt: request.prompt(),
            }],
            parameters: Veo3Parameters {
                aspect_ratio: request.aspect_ratio().as_str(),
                person_generation: request.person_policy().as_str(),
                negative_prompt: request.negative_prompt(),
            },
        };

        let response = self
            .http
            .post(self.submit_url())
            .header(GOOGLE_API_KEY_HEADER, self.api_key.expose())
            .header("Content-Type", "application/json; charset=utf-8")
            .timeout(self.config.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| network_error("Failed to submit generation", e))?;

        let handle = self.read_operation(response).await?;

        info!(
            "Video generation started with operation: {}",
            handle.name
        );

        Ok(handle)
    }

    async fn refresh(&self, handle: &JobHandle) -> Result<JobHandle, VideoGenError> {
        let response = self
            .http
            .get(self.operation_url(&handle.name))
            .header(GOOGLE_API_KEY_HEADER, self.api_key.expose())
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|e| network_error("Failed to poll operation", e))?;

        self.read_operation(response).await
    }

    async fn download(&self, asset: &GeneratedAsset) -> Result<ByteStream, VideoGenError> {
        // Video files take longer than a status call, so no per-request timeout here
        let response = self
            .http
            .get(&asset.uri)
            .header(GOOGLE_API_KEY_HEADER, self.api_key.expose())
            .send()
            .await
            .map_err(|e| network_error("Failed to download video", e))?;

        let response = check_status(response).await?;

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| network_error("Failed to read video bytes", e)))
            .boxed())
    }
}

fn operation_to_handle(operation: Veo3OperationResponse) -> Result<JobHandle, VideoGenError> {
    if operation.done != Some(true) {
        return Ok(JobHandle::pending(operation.name));
    }

    if let Some(error) = operation.error {
        return Ok(JobHandle::completed(
            operation.name,
            JobOutcome::Failed {
                code: error.code,
                message: error.message,
            },
        ));
    }

    let Some(result_value) = operation.response else {
        return Ok(JobHandle::completed(
            operation.name,
            JobOutcome::Failed {
                code: 0,
                message: "Operation completed but no response data found".to_string(),
            },
        ));
    };

    let predict: Veo3PredictResponse = serde_json::from_value(result_value).map_err(|e| {
        VideoGenError::FatalService(format!("Failed to parse video generation response: {e}"))
    })?;
    let video_response = predict.generate_video_response.unwrap_or_default();

    let assets = video_response
        .generated_samples
        .into_iter()
        .filter_map(|sample| sample.video)
        .map(|video| GeneratedAsset {
            uri: video.uri,
            mime_type: video.mime_type,
        })
        .collect();

    Ok(JobHandle::completed(
        operation.name,
        JobOutcome::Succeeded {
            assets,
            filtered_reasons: video_response.rai_media_filtered_reasons,
        },
    ))
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, VideoGenError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());

    Err(classify_error_response(status, &error_text))
}

/// Map a non-2xx vendor reply onto our error categories, keeping the vendor's message.
fn classify_error_response(status: StatusCode, body: &str) -> VideoGenError {
    let message = serde_json::from_str::<GoogleErrorEnvelope>(body)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| body.to_string());
    let message = format!("{} {}", status.as_u16(), message);

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            VideoGenError::Authentication(message)
        }
        StatusCode::BAD_REQUEST if body.contains("API_KEY_INVALID") => {
            VideoGenError::Authentication(message)
        }
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            VideoGenError::Validation(message)
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            VideoGenError::TransientService(message)
        }
        s if s.is_server_error() => VideoGenError::TransientService(message),
        _ => VideoGenError::FatalService(message),
    }
}

fn network_error(context: &str, e: reqwest::Error) -> VideoGenError {
    if e.is_decode() || e.is_builder() {
        VideoGenError::FatalService(format!("{context}: {e}"))
    } else {
        VideoGenError::TransientService(format!("{context}: {e}"))
    }
}
