use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::GenerateError;
use crate::extract::extract_json;
use crate::models::{ChartSpec, ChatMessage, DynamicData, ProviderConfig};
use crate::prompt::{build_suggestions_prompt, build_system_prompt};
use crate::validation::validate_chart;

/** \brief Ceiling for hosted providers. */
pub const CLOUD_TIMEOUT: Duration = Duration::from_secs(60);
/** \brief Ceiling for the local daemon. */
pub const LOCAL_TIMEOUT: Duration = Duration::from_secs(30);

pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
pub const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com";
pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_MAX_TOKENS: u32 = 4096;

/**
 * \brief Vendor-neutral request: optional system prompt plus one user turn.
 */
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub user: String,
    /** \brief Ask the vendor for JSON-only output where it supports that */
    pub json_mode: bool,
}

impl CompletionRequest {
    /**
     * \brief Message-list form used by OpenAI-shaped endpoints.
     */
    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut out = Vec::with_capacity(2);
        if let Some(sys) = &self.system {
            out.push(ChatMessage::system(sys.clone()));
        }
        out.push(ChatMessage::user(self.user.clone()));
        out
    }

    /**
     * \brief Single-block form for vendors without a separate system role here.
     */
    pub fn merged_text(&self) -> String {
        match &self.system {
            Some(sys) => format!("{}\n\nUser Query: {}", sys, self.user),
            None => self.user.clone(),
        }
    }
}

/**
 * \brief Uniform adapter surface. Vendors implement `check_config` and `complete`;
 * `generate` and `generate_suggestions` are shared on top of them.
 */
#[async_trait]
pub trait ChartGenerator: Send + Sync {
    fn name(&self) -> &'static str;

    /**
     * \brief Rejects configs missing what this vendor needs (`GenerateError::Config`).
     */
    fn check_config(&self, config: &ProviderConfig) -> Result<(), GenerateError>;

    /**
     * \brief One bounded round trip; returns the model's raw text.
     */
    async fn complete(
        &self,
        config: &ProviderConfig,
        request: &CompletionRequest,
    ) -> Result<String, GenerateError>;

    async fn generate(
        &self,
        prompt: &str,
        system_prompt_template: &str,
        config: &ProviderConfig,
        dynamic_data: Option<&DynamicData>,
    ) -> Result<ChartSpec, GenerateError> {
        self.check_config(config)?;
        let data = dynamic_data
            .ok_or_else(|| GenerateError::Input("Please upload a dataset first".to_string()))?;
        let system = build_system_prompt(system_prompt_template, data)?;
        let request = CompletionRequest {
            system: Some(system),
            user: prompt.to_string(),
            json_mode: true,
        };
        let raw = self.complete(config, &request).await?;
        parse_chart(&raw)
    }

    /**
     * \brief Soft path: any failure is logged and yields an empty list.
     *
     * The chart template is accepted for parity with `generate`; this path sends its
     * own built-in prompt.
     */
    async fn generate_suggestions(
        &self,
        _system_prompt_template: &str,
        config: &ProviderConfig,
        dynamic_data: &DynamicData,
    ) -> Vec<String> {
        match suggestions_once(self, config, dynamic_data).await {
            Ok(list) => list,
            Err(e) => {
                warn!(provider = self.name(), kind = e.kind(), "suggestion generation failed: {}", e);
                Vec::new()
            }
        }
    }
}

async fn suggestions_once<G>(
    generator: &G,
    config: &ProviderConfig,
    data: &DynamicData,
) -> Result<Vec<String>, GenerateError>
where
    G: ChartGenerator + ?Sized,
{
    generator.check_config(config)?;
    let request = CompletionRequest {
        system: None,
        user: build_suggestions_prompt(data)?,
        json_mode: true,
    };
    let raw = generator.complete(config, &request).await?;
    parse_suggestions(&raw)
}

/**
 * \brief Raw model text → extracted JSON → validated chart.
 */
pub fn parse_chart(raw: &str) -> Result<ChartSpec, GenerateError> {
    let value = extract_json(raw)?;
    validate_chart(value).map_err(GenerateError::invalid_chart)
}

/**
 * \brief Reads `{"suggestions": [...]}`, keeping only non-blank strings.
 */
pub fn parse_suggestions(raw: &str) -> Result<Vec<String>, GenerateError> {
    let value = extract_json(raw)?;
    let list = value
        .get("suggestions")
        .and_then(|s| s.as_array())
        .ok_or_else(|| GenerateError::Parse("Response did not contain a suggestions list".into()))?;
    Ok(list
        .iter()
        .filter_map(|s| s.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}

/**
 * \brief Shared HTTP client; honours `CHARTPILOT_HTTP_PROXY` when set.
 */
pub fn build_http_client() -> Result<reqwest::Client, GenerateError> {
    let proxy = std::env::var("CHARTPILOT_HTTP_PROXY").ok();
    http_client_with_proxy(proxy.as_deref())
}

fn http_client_with_proxy(proxy: Option<&str>) -> Result<reqwest::Client, GenerateError> {
    let mut builder = reqwest::Client::builder();
    if let Some(proxy_url) = proxy.map(str::trim).filter(|p| !p.is_empty()) {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| GenerateError::Config(format!("invalid proxy: {}", e.without_url())))?;
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|e| GenerateError::Config(format!("http client init failed: {}", e)))
}

// ---------------------------------------------------------------------------
// Gemini
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GeminiAdapter {
    client: reqwest::Client,
    api_base: String,
}

impl GeminiAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_api_base(client, GEMINI_API_BASE)
    }

    pub fn with_api_base(client: reqwest::Client, api_base: impl Into<String>) -> Self {
        Self {
            client,
            api_base: api_base.into(),
        }
    }
}

#[async_trait]
impl ChartGenerator for GeminiAdapter {
    fn name(&self) -> &'static str {
        "Google Gemini"
    }

    fn check_config(&self, config: &ProviderConfig) -> Result<(), GenerateError> {
        if config.api_key().is_none() {
            return Err(GenerateError::Config("Google API Key is required".to_string()));
        }
        Ok(())
    }

    async fn complete(
        &self,
        config: &ProviderConfig,
        request: &CompletionRequest,
    ) -> Result<String, GenerateError> {
        self.check_config(config)?;
        let key = config.api_key().unwrap_or_default();
        let base = normalize_gemini_base(&self.api_base);
        let url = format!("{}/models/{}:generateContent", base, config.model);

        let mut body = json!({
            "contents": [{
                "role": "user",
                "parts": [{"text": request.merged_text()}]
            }],
        });
        if request.json_mode {
            body["generationConfig"] = json!({"responseMimeType": "application/json"});
        }

        debug!("calling Gemini model {}", config.model);
        let builder = self.client.post(url).query(&[("key", key)]).json(&body);
        let v = send_json(self.name(), CLOUD_TIMEOUT, builder).await?;
        non_empty(self.name(), extract_gemini_content(&v))
    }
}

// ---------------------------------------------------------------------------
// OpenAI-shaped (OpenAI, OpenAI-compatible, Ollama)
// ---------------------------------------------------------------------------

/**
 * \brief Where an OpenAI-shaped endpoint lives.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseUrlSource {
    Fixed(String),
    /** \brief Taken from `ProviderConfig::base_url`; optionally forced to end in `/v1` */
    FromConfig { ensure_v1: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    BearerRequired,
    BearerIfPresent,
    None,
}

/**
 * \brief Everything that differs between the OpenAI-shaped variants.
 */
#[derive(Debug, Clone)]
pub struct OpenAiProfile {
    pub label: &'static str,
    pub base: BaseUrlSource,
    pub auth: AuthScheme,
    pub timeout: Duration,
}

impl OpenAiProfile {
    pub fn openai() -> Self {
        Self {
            label: "OpenAI",
            base: BaseUrlSource::Fixed(OPENAI_API_BASE.to_string()),
            auth: AuthScheme::BearerRequired,
            timeout: CLOUD_TIMEOUT,
        }
    }

    pub fn compatible() -> Self {
        Self {
            label: "OpenAI Compatible",
            base: BaseUrlSource::FromConfig { ensure_v1: false },
            auth: AuthScheme::BearerIfPresent,
            timeout: CLOUD_TIMEOUT,
        }
    }

    pub fn ollama() -> Self {
        Self {
            label: "Ollama",
            base: BaseUrlSource::FromConfig { ensure_v1: true },
            auth: AuthScheme::None,
            timeout: LOCAL_TIMEOUT,
        }
    }

    pub fn with_fixed_base(mut self, base: impl Into<String>) -> Self {
        self.base = BaseUrlSource::Fixed(base.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn resolve_base(&self, config: &ProviderConfig) -> Option<String> {
        match &self.base {
            BaseUrlSource::Fixed(base) => Some(base.trim_end_matches('/').to_string()),
            BaseUrlSource::FromConfig { ensure_v1 } => config.base_url().map(|raw| {
                if *ensure_v1 {
                    normalize_v1_base(raw)
                } else {
                    raw.trim_end_matches('/').to_string()
                }
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiShapedAdapter {
    client: reqwest::Client,
    profile: OpenAiProfile,
}

impl OpenAiShapedAdapter {
    pub fn new(client: reqwest::Client, profile: OpenAiProfile) -> Self {
        Self { client, profile }
    }

    pub fn profile(&self) -> &OpenAiProfile {
        &self.profile
    }
}

#[async_trait]
impl ChartGenerator for OpenAiShapedAdapter {
    fn name(&self) -> &'static str {
        self.profile.label
    }

    fn check_config(&self, config: &ProviderConfig) -> Result<(), GenerateError> {
        if self.profile.auth == AuthScheme::BearerRequired && config.api_key().is_none() {
            return Err(GenerateError::Config(format!(
                "{} API Key is required",
                self.profile.label
            )));
        }
        if self.profile.resolve_base(config).is_none() {
            return Err(GenerateError::Config(format!(
                "Base URL is required for {}",
                self.profile.label
            )));
        }
        Ok(())
    }

    async fn complete(
        &self,
        config: &ProviderConfig,
        request: &CompletionRequest,
    ) -> Result<String, GenerateError> {
        self.check_config(config)?;
        let base = self.profile.resolve_base(config).unwrap_or_default();
        let url = format!("{}/chat/completions", base);

        let mut body = json!({
            "model": config.model,
            "messages": request.messages(),
        });
        if request.json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }

        let mut builder = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .json(&body);
        if self.profile.auth != AuthScheme::None {
            if let Some(key) = config.api_key() {
                builder = builder.bearer_auth(key);
            }
        }

        debug!(
            "calling {} endpoint {} with model {}",
            self.profile.label, base, config.model
        );
        let v = send_json(self.profile.label, self.profile.timeout, builder).await?;
        non_empty(self.profile.label, extract_openai_content(&v))
    }
}

// ---------------------------------------------------------------------------
// Anthropic
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AnthropicAdapter {
    client: reqwest::Client,
    api_base: String,
}

impl AnthropicAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_api_base(client, ANTHROPIC_API_BASE)
    }

    pub fn with_api_base(client: reqwest::Client, api_base: impl Into<String>) -> Self {
        Self {
            client,
            api_base: api_base.into(),
        }
    }
}

#[async_trait]
impl ChartGenerator for AnthropicAdapter {
    fn name(&self) -> &'static str {
        "Anthropic"
    }

    fn check_config(&self, config: &ProviderConfig) -> Result<(), GenerateError> {
        if config.api_key().is_none() {
            return Err(GenerateError::Config(
                "Anthropic API Key is required".to_string(),
            ));
        }
        Ok(())
    }

    async fn complete(
        &self,
        config: &ProviderConfig,
        request: &CompletionRequest,
    ) -> Result<String, GenerateError> {
        self.check_config(config)?;
        let key = config.api_key().unwrap_or_default();
        let url = format!("{}/v1/messages", self.api_base.trim_end_matches('/'));

        let mut body = json!({
            "model": config.model,
            "max_tokens": ANTHROPIC_MAX_TOKENS,
            "messages": [{"role": "user", "content": request.user}],
        });
        if let Some(sys) = &request.system {
            body["system"] = json!(sys);
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(key).map_err(|_| {
                GenerateError::Config("Anthropic API Key contains invalid characters".to_string())
            })?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );

        debug!("calling Anthropic model {}", config.model);
        let builder = self.client.post(url).headers(headers).json(&body);
        let v = send_json(self.name(), CLOUD_TIMEOUT, builder).await?;
        non_empty(self.name(), extract_anthropic_content(&v))
    }
}

// ---------------------------------------------------------------------------
// Shared transport
// ---------------------------------------------------------------------------

/**
 * \brief Sends a request under a deadline and returns the decoded JSON envelope.
 *
 * The deadline covers the send and the body read. When it fires the in-flight
 * future is dropped, which aborts the request and frees the timer.
 */
async fn send_json(
    provider: &'static str,
    timeout: Duration,
    builder: reqwest::RequestBuilder,
) -> Result<Value, GenerateError> {
    let started = Instant::now();
    let exchange = async {
        let resp = builder
            .send()
            .await
            .map_err(|e| transport_error(provider, timeout, e))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| transport_error(provider, timeout, e))?;
        Ok::<_, GenerateError>((status, text))
    };

    let (status, text) = tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| GenerateError::Timeout {
            provider,
            seconds: timeout.as_secs(),
        })??;

    check_status(provider, status, text.as_str())?;
    info!(
        "{} responded {} in {} ms",
        provider,
        status.as_u16(),
        started.elapsed().as_millis()
    );

    serde_json::from_str(&text).map_err(|e| {
        debug!("{} envelope was not JSON: {}", provider, e);
        GenerateError::Parse(format!("{} returned a malformed response", provider))
    })
}

fn check_status(provider: &'static str, status: StatusCode, body: &str) -> Result<(), GenerateError> {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(GenerateError::Auth {
            provider,
            status: status.as_u16(),
        }),
        StatusCode::TOO_MANY_REQUESTS => Err(GenerateError::RateLimit { provider }),
        s if !s.is_success() => {
            debug!("{} upstream error {}: {}", provider, s.as_u16(), body);
            Err(GenerateError::Upstream {
                provider,
                status: s.as_u16(),
                body: body.to_string(),
            })
        }
        _ => Ok(()),
    }
}

/**
 * \brief Maps reqwest failures; the URL is stripped because Gemini carries the key in it.
 */
fn transport_error(provider: &'static str, timeout: Duration, e: reqwest::Error) -> GenerateError {
    if e.is_timeout() {
        return GenerateError::Timeout {
            provider,
            seconds: timeout.as_secs(),
        };
    }
    GenerateError::Network {
        provider,
        message: e.without_url().to_string(),
    }
}

fn non_empty(provider: &'static str, text: String) -> Result<String, GenerateError> {
    if text.trim().is_empty() {
        Err(GenerateError::Parse(format!("Empty response from {}", provider)))
    } else {
        Ok(text)
    }
}

fn extract_openai_content(v: &Value) -> String {
    let choice = v.get("choices").and_then(|c| c.get(0));
    let content = choice
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"));
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()).or_else(|| p.as_str()))
            .collect::<Vec<_>>()
            .join(""),
        _ => choice
            .and_then(|c| c.get("text"))
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .to_string(),
    }
}

fn extract_anthropic_content(v: &Value) -> String {
    v.get("content")
        .and_then(|arr| arr.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

fn extract_gemini_content(v: &Value) -> String {
    if let Some(first) = v
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
    {
        if let Some(parts) = first
            .get("content")
            .and_then(|content| content.get("parts"))
            .and_then(|p| p.as_array())
        {
            return parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("");
        }
    }
    v.get("text")
        .and_then(|t| t.as_str())
        .unwrap_or("")
        .to_string()
}

fn normalize_gemini_base(api_base: &str) -> String {
    let trimmed = api_base.trim_end_matches('/');
    if trimmed.ends_with("/v1")
        || trimmed.ends_with("/v1beta")
        || trimmed.contains("/v1/")
        || trimmed.contains("/v1beta/")
    {
        trimmed.to_string()
    } else {
        format!("{}/v1beta", trimmed)
    }
}

fn normalize_v1_base(api_base: &str) -> String {
    let trimmed = api_base.trim().trim_end_matches('/');
    if trimmed.ends_with("/v1") {
        trimmed.to_string()
    } else {
        format!("{}/v1", trimmed)
    }
}
