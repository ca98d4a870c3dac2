/// Client for OpenAI-compatible chat completion and embedding endpoints.
///
/// Every call is a single attempt with a bounded timeout. Retry policy belongs to the caller
/// (see `crate::retry`).
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Clone, Debug)]
pub struct OpenAiClientConfig {
    pub base_url: String,
    /// Sent as a bearer token when present. Local OpenAI-compatible hosts usually need none.
    pub api_key: Option<String>,
    pub default_timeout: Duration,
    pub max_error_body_bytes: usize,
}

impl Default for OpenAiClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            default_timeout: Duration::from_secs(60),
            max_error_body_bytes: 8 * 1024,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OpenAiClientError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid response JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("upstream returned error: status={status} message={message}")]
    Upstream { status: StatusCode, message: String },

    #[error("upstream returned non-JSON error: status={status} body={body}")]
    UpstreamBody { status: StatusCode, body: String },

    #[error("response contained no {0}")]
    EmptyResponse(&'static str),
}

#[derive(Clone)]
pub struct OpenAiClient {
    config: OpenAiClientConfig,
    http: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(mut config: OpenAiClientConfig) -> Result<Self, OpenAiClientError> {
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .user_agent("tender-generator")
            .timeout(config.default_timeout)
            .build()?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &OpenAiClientConfig {
        &self.config
    }

    pub async fn chat_completions(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, OpenAiClientError> {
        let url = format!("{}/chat/completions", self.config.base_url);
        debug!(model = %request.model, messages = request.messages.len(), "chat completion request");
        let resp = self.post(&url).json(request).send().await?;
        Self::parse_json_response(resp, self.config.max_error_body_bytes).await
    }

    pub async fn embeddings(
        &self,
        request: &EmbeddingRequest,
    ) -> Result<EmbeddingResponse, OpenAiClientError> {
        let url = format!("{}/embeddings", self.config.base_url);
        debug!(model = %request.model, input_chars = request.input.len(), "embedding request");
        let resp = self.post(&url).json(request).send().await?;
        Self::parse_json_response(resp, self.config.max_error_body_bytes).await
    }

    fn post(&self, url: &str) -> reqwest::RequestBuilder {
        let req = self.http.post(url).timeout(self.config.default_timeout);
        match &self.config.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    async fn parse_json_response<T: for<'de> Deserialize<'de>>(
        resp: reqwest::Response,
        max_error_body_bytes: usize,
    ) -> Result<T, OpenAiClientError> {
        if resp.status().is_success() {
            let bytes = resp.bytes().await?;
            return Ok(serde_json::from_slice(&bytes)?);
        }
        Err(Self::to_upstream_error(resp, max_error_body_bytes).await)
    }

    async fn to_upstream_error(
        resp: reqwest::Response,
        max_error_body_bytes: usize,
    ) -> OpenAiClientError {
        let status = resp.status();
        let body = read_limited_text(resp, max_error_body_bytes).await;
        if let Ok(parsed) = serde_json::from_str::<OpenAiErrorEnvelope>(&body) {
            let message = parsed
                .error
                .message
                .unwrap_or_else(|| "unknown upstream error".to_string());
            return OpenAiClientError::Upstream { status, message };
        }
        OpenAiClientError::UpstreamBody { status, body }
    }
}

async fn read_limited_text(resp: reqwest::Response, max_bytes: usize) -> String {
    match resp.bytes().await {
        Ok(mut b) => {
            if b.len() > max_bytes {
                b.truncate(max_bytes);
            }
            String::from_utf8_lossy(&b).to_string()
        }
        Err(e) => {
            warn!(error = %e, "failed to read upstream error body");
            "<failed to read error body>".to_string()
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorEnvelope {
    error: OpenAiErrorObject,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorObject {
    message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: Option<String>,
    pub choices: Vec<ChatCompletionChoice>,
    pub usage: Option<ChatCompletionUsage>,
}

impl ChatCompletionResponse {
    /// Content of the first choice, if the upstream returned any.
    pub fn first_content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.content.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionChoice {
    pub index: Option<u32>,
    pub message: ChatCompletionMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionMessage {
    pub role: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingRequest {
    pub model: String,
    pub input: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingResponse {
    pub data: Vec<EmbeddingData>,
}

impl EmbeddingResponse {
    /// Take the vector for the single input, ignoring any extra entries.
    pub fn into_first(self) -> Result<Vec<f32>, OpenAiClientError> {
        self.data
            .into_iter()
            .min_by_key(|d| d.index.unwrap_or(0))
            .map(|d| d.embedding)
            .ok_or(OpenAiClientError::EmptyResponse("embedding"))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingData {
    pub index: Option<u32>,
    pub embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_omits_unset_options() {
        let req = ChatCompletionRequest {
            model: "gpt-4".to_string(),
            messages: vec![Message::user("hi")],
            temperature: None,
            max_tokens: Some(10),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("temperature").is_none());
        assert_eq!(json["max_tokens"], 10);
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn embedding_response_takes_lowest_index() {
        let raw = r#"{"data":[{"index":1,"embedding":[2.0]},{"index":0,"embedding":[1.0,0.5]}]}"#;
        let resp: EmbeddingResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.into_first().unwrap(), vec![1.0, 0.5]);
    }

    #[test]
    fn empty_embedding_response_is_an_error() {
        let resp: EmbeddingResponse = serde_json::from_str(r#"{"data":[]}"#).unwrap();
        assert!(matches!(
            resp.into_first(),
            Err(OpenAiClientError::EmptyResponse("embedding"))
        ));
    }

    #[test]
    fn first_content_reads_first_choice() {
        let raw = r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"Hello"},"finish_reason":"stop"}],"usage":null}"#;
        let resp: ChatCompletionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.first_content(), Some("Hello"));
    }

    #[test]
    fn client_strips_trailing_slash() {
        let client = OpenAiClient::new(OpenAiClientConfig {
            base_url: "http://localhost:8001/v1/".to_string(),
            ..OpenAiClientConfig::default()
        })
        .unwrap();
        assert_eq!(client.config().base_url, "http://localhost:8001/v1");
    }
}
