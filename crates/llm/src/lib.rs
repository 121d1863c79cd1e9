use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::{header::HeaderValue, Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::env;
use std::path::Path;
use tokio::runtime::Runtime;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    OpenAi,
    Anthropic,
    Local,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "openai",
            LlmProvider::Anthropic => "anthropic",
            LlmProvider::Local => "local",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "openai" | "openai-compatible" | "dashscope" => Some(LlmProvider::OpenAi),
            "anthropic" => Some(LlmProvider::Anthropic),
            "local" | "offline" => Some(LlmProvider::Local),
            _ => None,
        }
    }

    fn default_base_url(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "https://api.openai.com/v1",
            LlmProvider::Anthropic => "https://api.anthropic.com/v1",
            LlmProvider::Local => "",
        }
    }

    fn api_key_var(&self) -> Option<&'static str> {
        match self {
            LlmProvider::OpenAi => Some("OPENAI_API_KEY"),
            LlmProvider::Anthropic => Some("ANTHROPIC_API_KEY"),
            LlmProvider::Local => None,
        }
    }
}

/// Model endpoint settings. API keys are read from the environment when
/// the client is built and never stored here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub model: String,
    pub base_url: Option<String>,
    pub max_tokens: u32,
    pub max_retries: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::OpenAi,
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            max_tokens: 2048,
            max_retries: 6,
        }
    }
}

impl LlmConfig {
    /// Overlays `FORMFILL_LLM_PROVIDER`, `FORMFILL_LLM_MODEL`,
    /// `FORMFILL_LLM_BASE_URL` and `FORMFILL_LLM_MAX_TOKENS`.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(value) = env::var("FORMFILL_LLM_PROVIDER") {
            self.provider = LlmProvider::from_str(&value)
                .ok_or_else(|| anyhow!("unknown FORMFILL_LLM_PROVIDER '{value}'"))?;
        }
        if let Ok(value) = env::var("FORMFILL_LLM_MODEL") {
            self.model = value;
        }
        if let Ok(value) = env::var("FORMFILL_LLM_BASE_URL") {
            self.base_url = Some(value);
        }
        if let Ok(value) = env::var("FORMFILL_LLM_MAX_TOKENS") {
            self.max_tokens = value
                .parse()
                .with_context(|| format!("invalid FORMFILL_LLM_MAX_TOKENS '{value}'"))?;
        }
        Ok(self)
    }
}

/// An image sent alongside the prompt, e.g. a rendered document page.
#[derive(Debug, Clone)]
pub struct ImageAttachment {
    pub media_type: String,
    pub data: Vec<u8>,
}

impl ImageAttachment {
    pub fn from_path(path: &Path) -> Result<Self> {
        let media_type = match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("png") => "image/png",
            Some("jpg" | "jpeg") => "image/jpeg",
            Some("webp") => "image/webp",
            _ => return Err(anyhow!("unsupported image type {}", path.display())),
        };
        let data =
            std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        Ok(Self {
            media_type: media_type.to_string(),
            data,
        })
    }

    fn base64(&self) -> String {
        STANDARD.encode(&self.data)
    }

    fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.base64())
    }
}

#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub system: Option<String>,
    pub user: String,
    pub images: Vec<ImageAttachment>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl LlmResponse {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    config: LlmConfig,
    provider: ProviderConfig,
}

#[derive(Clone)]
enum ProviderConfig {
    OpenAi(EndpointConfig),
    Anthropic(EndpointConfig),
    Local,
}

#[derive(Clone)]
struct EndpointConfig {
    api_key: String,
    base_url: String,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let endpoint = |provider: LlmProvider| -> Result<EndpointConfig> {
            let var = provider
                .api_key_var()
                .ok_or_else(|| anyhow!("{} needs no api key", provider.as_str()))?;
            Ok(EndpointConfig {
                api_key: read_api_key(var)?,
                base_url: config
                    .base_url
                    .clone()
                    .unwrap_or_else(|| provider.default_base_url().to_string()),
            })
        };
        let provider = match config.provider {
            LlmProvider::OpenAi => ProviderConfig::OpenAi(endpoint(LlmProvider::OpenAi)?),
            LlmProvider::Anthropic => ProviderConfig::Anthropic(endpoint(LlmProvider::Anthropic)?),
            LlmProvider::Local => ProviderConfig::Local,
        };
        Ok(Self {
            http: Client::new(),
            config,
            provider,
        })
    }

    pub fn provider(&self) -> LlmProvider {
        self.config.provider
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub async fn chat(&self, req: &LlmRequest) -> Result<LlmResponse> {
        debug!(
            provider = self.config.provider.as_str(),
            model = %self.config.model,
            images = req.images.len(),
            prompt_chars = req.user.len(),
            "sending chat request"
        );
        match &self.provider {
            ProviderConfig::OpenAi(cfg) => self.chat_openai(cfg, req).await,
            ProviderConfig::Anthropic(cfg) => self.chat_anthropic(cfg, req).await,
            ProviderConfig::Local => Ok(chat_local(req)),
        }
    }

    pub fn chat_blocking(&self, req: &LlmRequest) -> Result<LlmResponse> {
        let rt = Runtime::new().context("failed to create tokio runtime")?;
        rt.block_on(self.chat(req))
    }

    async fn chat_openai(&self, cfg: &EndpointConfig, req: &LlmRequest) -> Result<LlmResponse> {
        let url = format!("{}/chat/completions", cfg.base_url.trim_end_matches('/'));
        let payload = openai_payload(&self.config, req);
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let response = match self
                .http
                .post(&url)
                .bearer_auth(&cfg.api_key)
                .json(&payload)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(err) => {
                    if attempt > self.config.max_retries {
                        return Err(err).with_context(|| "openai request failed");
                    }
                    sleep(backoff_delay(attempt, None)).await;
                    continue;
                }
            };
            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                if attempt > self.config.max_retries {
                    return Err(anyhow!(
                        "openai rate limited after {} retries",
                        self.config.max_retries
                    ));
                }
                let wait = backoff_delay(attempt, response.headers().get("retry-after"));
                warn!(attempt, wait_secs = wait.as_secs(), "rate limited, backing off");
                sleep(wait).await;
                continue;
            }
            let value = decode_body("openai", response).await?;
            let content = extract_openai_text(&value)
                .ok_or_else(|| anyhow!("missing text in OpenAI response"))?;
            let usage: OpenAiUsage = value
                .get("usage")
                .and_then(|value| serde_json::from_value(value.clone()).ok())
                .unwrap_or_default();
            return Ok(LlmResponse {
                content,
                prompt_tokens: usage.prompt_tokens.unwrap_or(0),
                completion_tokens: usage.completion_tokens.unwrap_or(0),
            });
        }
    }

    async fn chat_anthropic(&self, cfg: &EndpointConfig, req: &LlmRequest) -> Result<LlmResponse> {
        let url = format!("{}/messages", cfg.base_url.trim_end_matches('/'));
        let payload = anthropic_payload(&self.config, req);
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let response = self
                .http
                .post(&url)
                .header("x-api-key", &cfg.api_key)
                .header("anthropic-version", "2023-06-01")
                .json(&payload)
                .send()
                .await
                .with_context(|| "anthropic request failed")?;
            if response.status() == StatusCode::TOO_MANY_REQUESTS
                && attempt <= self.config.max_retries
            {
                let wait = backoff_delay(attempt, response.headers().get("retry-after"));
                warn!(attempt, wait_secs = wait.as_secs(), "rate limited, backing off");
                sleep(wait).await;
                continue;
            }
            let value = decode_body("anthropic", response).await?;
            let response: AnthropicResponse =
                serde_json::from_value(value).context("failed to decode anthropic response")?;
            let text = response
                .content
                .into_iter()
                .find_map(|part| part.text)
                .ok_or_else(|| anyhow!("missing text in Anthropic response"))?;
            let usage = response.usage.unwrap_or_default();
            return Ok(LlmResponse {
                content: text,
                prompt_tokens: usage.input_tokens.unwrap_or(0),
                completion_tokens: usage.output_tokens.unwrap_or(0),
            });
        }
    }
}

fn openai_payload(config: &LlmConfig, req: &LlmRequest) -> Value {
    let mut messages = Vec::new();
    if let Some(system) = &req.system {
        messages.push(json!({ "role": "system", "content": system }));
    }
    if req.images.is_empty() {
        messages.push(json!({ "role": "user", "content": req.user }));
    } else {
        let mut parts = vec![json!({ "type": "text", "text": req.user })];
        for image in &req.images {
            parts.push(json!({
                "type": "image_url",
                "image_url": { "url": image.data_url() },
            }));
        }
        messages.push(json!({ "role": "user", "content": parts }));
    }
    let mut payload = json!({
        "model": config.model,
        "messages": messages,
        "max_tokens": config.max_tokens,
    });
    if let Some(temperature) = req.temperature {
        payload["temperature"] = json!(temperature);
    }
    payload
}

fn anthropic_payload(config: &LlmConfig, req: &LlmRequest) -> Value {
    let mut parts = Vec::new();
    for image in &req.images {
        parts.push(json!({
            "type": "image",
            "source": {
                "type": "base64",
                "media_type": image.media_type,
                "data": image.base64(),
            },
        }));
    }
    parts.push(json!({ "type": "text", "text": req.user }));
    let mut payload = json!({
        "model": config.model,
        "max_tokens": config.max_tokens,
        "messages": [ { "role": "user", "content": parts } ],
    });
    if let Some(system) = &req.system {
        payload["system"] = json!(system);
    }
    if let Some(temperature) = req.temperature {
        payload["temperature"] = json!(temperature);
    }
    payload
}

/// Offline stand-in: answers JSON prompts with an empty object and
/// everything else with a short summary of the prompt.
fn chat_local(req: &LlmRequest) -> LlmResponse {
    let wants_json = req
        .system
        .iter()
        .chain(std::iter::once(&req.user))
        .any(|text| text.contains("JSON"));
    let content = if wants_json {
        "{}".to_string()
    } else {
        summarize_text(&req.user, 40)
    };
    LlmResponse {
        content,
        prompt_tokens: 0,
        completion_tokens: 0,
    }
}

fn backoff_delay(attempt: usize, retry_after: Option<&HeaderValue>) -> Duration {
    if let Some(value) = retry_after {
        if let Ok(text) = value.to_str() {
            if let Ok(secs) = text.parse::<u64>() {
                return Duration::from_secs(secs.max(1));
            }
        }
    }
    let capped = attempt.min(6) as u32;
    Duration::from_secs(1u64 << capped)
}

async fn decode_body(provider: &str, response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(anyhow!(
            "{provider} returned error (status {status}): {body}"
        ));
    }
    serde_json::from_str(&body).with_context(|| format!("failed to decode {provider} response"))
}

fn summarize_text(text: &str, max_words: usize) -> String {
    if max_words == 0 {
        return String::new();
    }
    text.split_whitespace()
        .take(max_words)
        .collect::<Vec<&str>>()
        .join(" ")
}

fn read_api_key(var: &str) -> Result<String> {
    let value = env::var(var).map_err(|_| anyhow!("{var} is not set"))?;
    if value.trim().is_empty() {
        return Err(anyhow!("{var} is empty"));
    }
    Ok(value)
}

fn extract_openai_text(value: &Value) -> Option<String> {
    let choice = value.get("choices")?.as_array()?.first()?;
    if let Some(text) = choice.get("text").and_then(|t| t.as_str()) {
        return Some(text.to_string());
    }
    let content = choice.get("message")?.get("content")?;
    if let Some(text) = content.as_str() {
        return Some(text.to_string());
    }
    content
        .as_array()?
        .iter()
        .find_map(|part| part.get("text").and_then(|t| t.as_str()))
        .map(str::to_string)
}

#[derive(Default, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct AnthropicContent {
    text: Option<String>,
}

#[derive(Default, Deserialize)]
struct AnthropicUsage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> ImageAttachment {
        ImageAttachment {
            media_type: "image/png".into(),
            data: vec![1, 2, 3],
        }
    }

    #[test]
    fn openai_payload_inlines_images_as_data_urls() {
        let req = LlmRequest {
            system: Some("sys".into()),
            user: "describe".into(),
            images: vec![image()],
            temperature: Some(0.1),
        };
        let payload = openai_payload(&LlmConfig::default(), &req);
        assert_eq!(payload["messages"][0]["role"], "system");
        let parts = payload["messages"][1]["content"].as_array().unwrap();
        assert_eq!(parts[0]["text"], "describe");
        assert_eq!(parts[1]["image_url"]["url"], "data:image/png;base64,AQID");
        assert!(payload["temperature"].as_f64().is_some());
    }

    #[test]
    fn anthropic_payload_puts_images_before_text() {
        let req = LlmRequest {
            system: None,
            user: "describe".into(),
            images: vec![image()],
            temperature: None,
        };
        let payload = anthropic_payload(&LlmConfig::default(), &req);
        let parts = payload["messages"][0]["content"].as_array().unwrap();
        assert_eq!(parts[0]["source"]["data"], "AQID");
        assert_eq!(parts[1]["text"], "describe");
        assert!(payload.get("system").is_none());
    }

    #[test]
    fn extracts_text_from_chat_choices() {
        let value = json!({"choices": [{"message": {"content": "hello"}}]});
        assert_eq!(extract_openai_text(&value).as_deref(), Some("hello"));
        let parts = json!({"choices": [{"message": {"content": [{"type": "text", "text": "hi"}]}}]});
        assert_eq!(extract_openai_text(&parts).as_deref(), Some("hi"));
        assert!(extract_openai_text(&json!({"choices": []})).is_none());
    }

    #[test]
    fn backoff_honours_retry_after() {
        let header = HeaderValue::from_static("3");
        assert_eq!(backoff_delay(1, Some(&header)), Duration::from_secs(3));
        assert_eq!(backoff_delay(2, None), Duration::from_secs(4));
        assert_eq!(backoff_delay(20, None), Duration::from_secs(64));
    }

    #[test]
    fn local_provider_answers_offline() {
        let client = LlmClient::new(LlmConfig {
            provider: LlmProvider::Local,
            ..LlmConfig::default()
        })
        .unwrap();
        let json_reply = client
            .chat_blocking(&LlmRequest {
                user: "Return JSON only".into(),
                ..LlmRequest::default()
            })
            .unwrap();
        assert_eq!(json_reply.content, "{}");
        let text_reply = client
            .chat_blocking(&LlmRequest {
                user: "short   prompt\ntext".into(),
                ..LlmRequest::default()
            })
            .unwrap();
        assert_eq!(text_reply.content, "short prompt text");
    }

    #[test]
    fn image_type_follows_extension() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("page_1.png");
        std::fs::write(&png, [0u8; 4]).unwrap();
        assert_eq!(ImageAttachment::from_path(&png).unwrap().media_type, "image/png");
        let gif = dir.path().join("page.gif");
        std::fs::write(&gif, [0u8; 4]).unwrap();
        assert!(ImageAttachment::from_path(&gif).is_err());
    }
}
