//! External style renderer boundary.
//!
//! A design is accepted first and rendered after: the renderer is called
//! asynchronously with the styling choices and returns an image URL. Any
//! failure is logged and the design simply keeps a null image URL; the
//! round never blocks on rendering.

use crate::error::{RenderError, RenderResult};
use crate::types::{RoundTopic, StyleChoice};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Request to render one design into an image
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub topic: RoundTopic,
    pub choices: Vec<StyleChoice>,
    pub timeout: Duration,
}

/// Response from a style renderer
#[derive(Debug, Clone)]
pub struct RenderedImage {
    pub image_url: String,
    /// Latency in milliseconds
    pub latency_ms: u64,
}

/// Trait every style renderer must implement
#[async_trait]
pub trait StyleRenderer: Send + Sync {
    async fn render(&self, request: RenderRequest) -> RenderResult<RenderedImage>;

    fn name(&self) -> &str;
}

/// Renderer that POSTs choices to an HTTP endpoint and expects an image URL
pub struct HttpRenderer {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpRenderer {
    pub fn new(endpoint: String, timeout: Duration) -> RenderResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RenderError::Config(e.to_string()))?;
        Ok(Self { endpoint, client })
    }
}

#[derive(Debug, Serialize)]
struct HttpRenderBody<'a> {
    topic: RoundTopic,
    choices: &'a [StyleChoice],
}

#[derive(Debug, Deserialize)]
struct HttpRenderResponse {
    image_url: String,
}

#[async_trait]
impl StyleRenderer for HttpRenderer {
    async fn render(&self, request: RenderRequest) -> RenderResult<RenderedImage> {
        let start = Instant::now();

        let body = HttpRenderBody {
            topic: request.topic,
            choices: &request.choices,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RenderError::Timeout(request.timeout)
                } else {
                    RenderError::Request(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(RenderError::Request(format!(
                "renderer returned status {}",
                response.status()
            )));
        }

        let parsed: HttpRenderResponse = response
            .json()
            .await
            .map_err(|e| RenderError::Parse(e.to_string()))?;

        Ok(RenderedImage {
            image_url: parsed.image_url,
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Renderer configuration, loaded from the environment
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Endpoint of the external renderer; None disables rendering entirely
    pub endpoint: Option<String>,
    pub timeout: Duration,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout: Duration::from_secs(30),
        }
    }
}

impl RendererConfig {
    /// Load configuration from environment variables.
    /// RENDERER_URL must be set for rendering to be available.
    pub fn from_env() -> Self {
        let endpoint = std::env::var("RENDERER_URL").ok().and_then(|url| {
            let trimmed = url.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        });

        let timeout = std::env::var("RENDERER_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(|| Self::default().timeout);

        Self { endpoint, timeout }
    }

    /// Build the renderer, or None when no endpoint is configured
    pub fn build(&self) -> RenderResult<Option<Arc<dyn StyleRenderer>>> {
        match &self.endpoint {
            Some(endpoint) => {
                let renderer = HttpRenderer::new(endpoint.clone(), self.timeout)?;
                Ok(Some(Arc::new(renderer)))
            }
            None => Ok(None),
        }
    }
}
