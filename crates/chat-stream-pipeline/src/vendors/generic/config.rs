use crate::config::{TransportTimeouts, env_string};
use crate::errors::ServiceError;

/// Configuration for the OpenAI-compatible HTTP adapter.
#[derive(Clone, Debug)]
pub struct GenericProviderConfig {
    /// API key used for bearer auth.
    pub api_key: String,
    /// Optional secret; when set the bearer token is `<api_key>:<api_secret>`.
    pub api_secret: Option<String>,
    /// Base URL of the OpenAI-compatible endpoint.
    pub base_url: String,
    /// Path of the chat-completions route, appended to `base_url`.
    pub chat_path: String,
    pub timeouts: TransportTimeouts,
}

impl GenericProviderConfig {
    /// Creates a config with default endpoint and timeouts.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: None,
            base_url: "https://api.openai.com".to_string(),
            chat_path: "/v1/chat/completions".to_string(),
            timeouts: TransportTimeouts::default(),
        }
    }

    /// Builds a config from `CHAT_STREAM_API_KEY` and the optional
    /// `CHAT_STREAM_API_SECRET`, `CHAT_STREAM_BASE_URL`,
    /// `CHAT_STREAM_CHAT_PATH` and timeout variables.
    pub fn from_env() -> Result<Self, ServiceError> {
        let Some(api_key) = env_string("CHAT_STREAM_API_KEY") else {
            return Err(ServiceError::Config(
                "missing CHAT_STREAM_API_KEY for the generic provider".into(),
            ));
        };
        let mut config = Self::new(api_key).timeouts(TransportTimeouts::from_env()?);
        config.api_secret = env_string("CHAT_STREAM_API_SECRET");
        if let Some(base_url) = env_string("CHAT_STREAM_BASE_URL") {
            config.base_url = base_url;
        }
        if let Some(chat_path) = env_string("CHAT_STREAM_CHAT_PATH") {
            config.chat_path = chat_path;
        }
        Ok(config)
    }

    pub fn api_secret(mut self, secret: impl Into<String>) -> Self {
        self.api_secret = Some(secret.into());
        self
    }

    /// Overrides the API base URL (for proxies or test servers).
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn chat_path(mut self, chat_path: impl Into<String>) -> Self {
        self.chat_path = chat_path.into();
        self
    }

    pub fn timeouts(mut self, timeouts: TransportTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub(crate) fn chat_url(&self) -> String {
        let path = self.chat_path.trim_start_matches('/');
        format!("{}/{path}", self.base_url.trim_end_matches('/'))
    }

    pub(crate) fn bearer_token(&self) -> String {
        match self.api_secret.as_deref().filter(|s| !s.is_empty()) {
            Some(secret) => format!("{}:{secret}", self.api_key),
            None => self.api_key.clone(),
        }
    }
}
