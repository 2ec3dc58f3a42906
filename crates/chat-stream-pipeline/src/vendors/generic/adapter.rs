use futures::StreamExt as _;
use tracing::debug;

use crate::ProviderId;
use crate::errors::{ServiceError, UpstreamError};
use crate::model::ProviderRequest;
use crate::provider::{ProviderAdapter, RawSource};
use crate::turn::ChatTurnContext;

use super::config::GenericProviderConfig;
use super::transport::{ByteStream, HttpLineSource, describe_reqwest_error};

pub(crate) const GENERIC_PROVIDER: &str = "generic";

const ERROR_BODY_LIMIT: usize = 512;

/// Adapter for OpenAI-compatible chat-completions endpoints streaming SSE.
///
/// One pooled `reqwest::Client` is built per adapter and shared by every
/// stream it starts.
pub struct GenericProvider {
    id: ProviderId,
    client: reqwest::Client,
    config: GenericProviderConfig,
}

impl GenericProvider {
    /// Creates an adapter from explicit client configuration.
    pub fn new(config: GenericProviderConfig) -> Result<Self, ServiceError> {
        if config.api_key.trim().is_empty() {
            return Err(ServiceError::Config(
                "generic provider api_key must not be empty".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(config.timeouts.connect)
            .read_timeout(config.timeouts.read)
            .timeout(config.timeouts.call)
            .build()
            .map_err(|e| ServiceError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            id: ProviderId::new(GENERIC_PROVIDER),
            client,
            config,
        })
    }

    /// Creates an adapter from `CHAT_STREAM_*` environment variables.
    pub fn from_env() -> Result<Self, ServiceError> {
        Self::new(GenericProviderConfig::from_env()?)
    }

    /// Registers the adapter under a different provider id, for deployments
    /// that talk to several compatible endpoints.
    pub fn with_id(mut self, id: impl Into<ProviderId>) -> Self {
        self.id = id.into();
        self
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for GenericProvider {
    fn id(&self) -> ProviderId {
        self.id.clone()
    }

    async fn start(
        &self,
        turn: &ChatTurnContext,
        request: &ProviderRequest,
    ) -> Result<Box<dyn RawSource>, UpstreamError> {
        let body = build_request_body(turn, request);
        debug!(stream_id = %request.stream_id, provider = %self.id, model = %request.model.model, "starting chat completion stream");

        let response = self
            .client
            .post(self.config.chat_url())
            .bearer_auth(self.config.bearer_token())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| UpstreamError::connect(self.id.clone(), describe_reqwest_error(&e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(UpstreamError::status(
                self.id.clone(),
                status.as_u16(),
                truncate_body(body),
            ));
        }

        let bytes: ByteStream = Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|e| describe_reqwest_error(&e))),
        );
        let source = HttpLineSource::open(self.id.clone(), bytes).await?;
        Ok(Box::new(source))
    }
}

pub(crate) fn build_request_body(
    turn: &ChatTurnContext,
    request: &ProviderRequest,
) -> serde_json::Value {
    let mut body = serde_json::json!({
        "model": request.model.model,
        "messages": request.messages,
        "stream": true,
    });
    let options = &request.options;
    if let Some(temperature) = options.temperature {
        body["temperature"] = serde_json::json!(temperature);
    }
    if let Some(max_tokens) = options.max_tokens {
        body["max_tokens"] = serde_json::json!(max_tokens);
    }
    if let Some(user) = options.user.as_ref().or(turn.uid.as_ref()) {
        body["user"] = serde_json::json!(user);
    }
    if let (Some(extra), Some(object)) = (&options.extra, body.as_object_mut()) {
        for (key, value) in extra {
            object.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
    body
}

fn truncate_body(mut body: String) -> String {
    if body.len() > ERROR_BODY_LIMIT {
        let mut cut = ERROR_BODY_LIMIT;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push('…');
    }
    body
}
