use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use sieve_core::config::AnthropicSettings;
use sieve_core::error::{Result, SieveError};
use sieve_core::signature::OutputSchema;

use crate::backend::{ChatBackend, ChatRequest, ConstrainedBackend};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const STRUCTURED_TOOL: &str = "emit_structured_output";

/// Anthropic Messages API client. Serves as a chat backend and, through forced tool use, as a
/// schema-constrained backend.
pub struct AnthropicClient {
    client: Client,
    settings: AnthropicSettings,
    name: String,
}

// ── Anthropic Messages API request/response types ──────────────────────────

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct Tool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ToolChoice {
    #[serde(rename = "type")]
    choice_type: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    input: Option<serde_json::Value>,
}

// ── Implementation ─────────────────────────────────────────────────────────

impl AnthropicClient {
    pub fn new(settings: AnthropicSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        let name = format!("anthropic:{}", settings.model);
        Ok(Self {
            client,
            settings,
            name,
        })
    }

    fn request(&self, system: Option<String>, prompt: &str) -> AnthropicRequest {
        AnthropicRequest {
            model: self.settings.model.clone(),
            max_tokens: self.settings.max_tokens,
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            system,
            tools: Vec::new(),
            tool_choice: None,
        }
    }

    fn structured_request(&self, prompt: &str, schema: &OutputSchema) -> AnthropicRequest {
        let mut request = self.request(None, prompt);
        request.tools = vec![Tool {
            name: STRUCTURED_TOOL.to_string(),
            description: schema
                .description
                .clone()
                .unwrap_or_else(|| format!("Report the {} for the given input.", schema.name)),
            input_schema: schema.to_json_schema(),
        }];
        request.tool_choice = Some(ToolChoice {
            choice_type: "tool".to_string(),
            name: STRUCTURED_TOOL.to_string(),
        });
        request
    }

    async fn send(&self, request: &AnthropicRequest) -> Result<AnthropicResponse> {
        debug!(
            model = %request.model,
            tools = request.tools.len(),
            "Sending request to Anthropic API"
        );

        let response = self
            .client
            .post(self.settings.api_url.clone())
            .header("x-api-key", &self.settings.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| SieveError::backend(&self.name, format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(SieveError::backend(
                &self.name,
                format!("Anthropic API returned status {status}: {body}"),
            ));
        }

        let api_response: AnthropicResponse = response.json().await.map_err(|e| {
            SieveError::backend(&self.name, format!("Failed to parse API response: {e}"))
        })?;

        debug!(
            stop_reason = ?api_response.stop_reason,
            blocks = api_response.content.len(),
            "Received response from Anthropic API"
        );

        Ok(api_response)
    }

    fn response_text(response: &AnthropicResponse) -> Option<String> {
        let text = response
            .content
            .iter()
            .filter(|b| b.block_type == "text")
            .filter_map(|b| b.text.as_deref())
            .collect::<Vec<_>>()
            .join("");
        (!text.is_empty()).then_some(text)
    }

    fn tool_input(response: &AnthropicResponse) -> Option<serde_json::Value> {
        response
            .content
            .iter()
            .find(|b| b.block_type == "tool_use")
            .and_then(|b| b.input.clone())
    }
}

#[async_trait]
impl ChatBackend for AnthropicClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let response = self
            .send(&self.request(request.system.clone(), &request.prompt))
            .await?;
        Self::response_text(&response)
            .ok_or_else(|| SieveError::backend(&self.name, "No text content block in API response"))
    }
}

#[async_trait]
impl ConstrainedBackend for AnthropicClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &str, schema: &OutputSchema) -> Result<serde_json::Value> {
        let response = self.send(&self.structured_request(prompt, schema)).await?;
        Self::tool_input(&response)
            .ok_or_else(|| SieveError::backend(&self.name, "No tool_use block in API response"))
    }
}
