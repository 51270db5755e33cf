use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::aws::AwsClient;
use crate::core::llm::{ChatMessage, LlmProvider, ProviderType};

const ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";

#[derive(Serialize)]
struct InvokeRequest<'a> {
    anthropic_version: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<InvokeMessage<'a>>,
}

#[derive(Serialize)]
struct InvokeMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct InvokeResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Anthropic models on Amazon Bedrock through `InvokeModel`.
pub struct BedrockProvider {
    aws: AwsClient,
    max_tokens: u32,
}

impl BedrockProvider {
    pub fn new(aws: AwsClient, max_tokens: u32) -> Self {
        Self { aws, max_tokens }
    }
}

fn build_request(messages: &[ChatMessage], max_tokens: u32) -> InvokeRequest<'_> {
    let system = messages
        .iter()
        .filter(|m| m.role == "system")
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>();
    InvokeRequest {
        anthropic_version: ANTHROPIC_VERSION,
        max_tokens,
        temperature: 0.0,
        system: (!system.is_empty()).then(|| system.join("\n")),
        messages: messages
            .iter()
            .filter(|m| m.role != "system")
            .map(|m| InvokeMessage {
                role: if m.role == "assistant" { "assistant" } else { "user" },
                content: &m.content,
            })
            .collect(),
    }
}

#[async_trait]
impl LlmProvider for BedrockProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Bedrock
    }

    async fn generate(&self, model_id: &str, messages: &[ChatMessage]) -> Result<String> {
        let req = build_request(messages, self.max_tokens);
        let path = format!("model/{}/invoke", urlencoding::encode(model_id));
        let res: InvokeResponse = self
            .aws
            .post_json(&path, &req)
            .await
            .map_err(|e| anyhow!("Bedrock InvokeModel failed: {}", e))?;
        Ok(res
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text)
            .collect::<Vec<_>>()
            .join(""))
    }
}
