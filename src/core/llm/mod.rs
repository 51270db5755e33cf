pub mod providers;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::core::aws::{AwsClient, CredentialsProvider};
use crate::core::config::{LlmConfig, LlmProviderKind};

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderType {
    Bedrock,
    OpenAI,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
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

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    // Execute a prompt against a model using a structured conversation
    async fn generate(&self, model_id: &str, messages: &[ChatMessage]) -> Result<String>;
}

/// A provider bound to one model, with a per-call timeout.
#[derive(Clone)]
pub struct LlmClient {
    provider: Arc<dyn LlmProvider>,
    model_id: String,
    timeout: Duration,
}

impl LlmClient {
    pub fn new(provider: Arc<dyn LlmProvider>, model_id: impl Into<String>, timeout: Duration) -> Self {
        let model_id = model_id.into();
        info!(
            "Generation provider: {:?} ({})",
            provider.provider_type(),
            model_id
        );
        Self {
            provider,
            model_id,
            timeout,
        }
    }

    pub fn from_config(
        config: &LlmConfig,
        credentials: Arc<CredentialsProvider>,
        region: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let provider: Arc<dyn LlmProvider> = match config.provider {
            LlmProviderKind::Bedrock => {
                let aws = AwsClient::new(
                    "bedrock",
                    "bedrock-runtime",
                    region,
                    config.base_url.as_deref(),
                    credentials,
                    timeout,
                )?;
                Arc::new(providers::BedrockProvider::new(aws, config.max_tokens))
            }
            LlmProviderKind::Openai => {
                let base_url = config
                    .base_url
                    .clone()
                    .unwrap_or_else(|| providers::openai::DEFAULT_CHAT_URL.to_string());
                let api_key = std::env::var(&config.api_key_env).ok();
                if api_key.is_none() {
                    debug!(
                        "{} is not set; sending requests without Authorization",
                        config.api_key_env
                    );
                }
                Arc::new(providers::OpenAiProvider::new(base_url, api_key, timeout))
            }
        };
        Ok(Self::new(provider, config.model.clone(), timeout))
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        match tokio::time::timeout(self.timeout, self.provider.generate(&self.model_id, messages))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(anyhow!(
                "generation call timed out after {}s",
                self.timeout.as_secs_f64()
            )),
        }
    }
}
