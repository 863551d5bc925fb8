//! Chat model abstraction
//!
//! The research workflow talks to models only through [`LLMClient`]: one
//! request carries the conversation, an optional tool menu, an optional
//! forced tool choice and an optional structured-output schema.

use crate::types::{AppError, Result, ToolCall, ToolDefinition};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
    /// Tool invocations requested by an assistant turn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Set on tool-result turns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::Assistant, content)
    }

    pub fn tool_result(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call.id.clone()),
        }
    }

    fn plain(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolChoice {
    Auto,
    Required,
    Named(String),
}

/// JSON schema the response content must conform to.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseFormat {
    pub name: String,
    pub schema: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<ChatTurn>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: Option<ToolChoice>,
    pub response_format: Option<ResponseFormat>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatTurn>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = Some(choice);
        self
    }

    pub fn with_response_format(mut self, name: &str, schema: serde_json::Value) -> Self {
        self.response_format = Some(ResponseFormat {
            name: name.to_string(),
            schema,
        });
        self
    }
}

/// Token consumption reported for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// The assistant turn, including any requested tool calls
    pub message: ChatTurn,
    pub usage: TokenUsage,
    /// The reason generation stopped (e.g., "stop", "tool_calls", "length")
    pub finish_reason: String,
}

impl ChatResponse {
    pub fn tool_calls(&self) -> &[ToolCall] {
        &self.message.tool_calls
    }

    /// Decode the content as structured output.
    pub fn parse_json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        let raw = self.message.content.trim();
        let raw = raw
            .strip_prefix("```json")
            .or_else(|| raw.strip_prefix("```"))
            .and_then(|r| r.strip_suffix("```"))
            .map(str::trim)
            .unwrap_or(raw);
        serde_json::from_str(raw)
            .map_err(|e| AppError::LLM(format!("Malformed structured output: {}", e)))
    }
}

/// Incremental output of a streamed call.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamDelta {
    Text(String),
    Usage(TokenUsage),
}

/// Generic LLM client trait for provider abstraction
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// One request/response exchange
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;

    /// Streamed exchange. The default buffers a full `chat` call.
    async fn stream_chat(
        &self,
        request: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamDelta>>> {
        let response = self.chat(request).await?;
        let deltas = vec![
            Ok(StreamDelta::Text(response.message.content)),
            Ok(StreamDelta::Usage(response.usage)),
        ];
        Ok(stream::iter(deltas).boxed())
    }

    /// Get the model name/identifier
    fn model_name(&self) -> &str;
}

/// Provider enum for runtime selection
#[derive(Debug, Clone)]
pub enum Provider {
    /// OpenAI API or any endpoint speaking the chat completions protocol
    OpenAI {
        api_key: Option<String>,
        api_base: String,
        model: String,
        timeout_secs: u64,
        max_tokens: Option<u32>,
    },
}

impl Provider {
    pub fn create_client(&self) -> Result<Arc<dyn LLMClient>> {
        match self {
            Provider::OpenAI {
                api_key,
                api_base,
                model,
                timeout_secs,
                max_tokens,
            } => {
                let client = super::openai::OpenAIClient::new(
                    api_key.clone(),
                    api_base.clone(),
                    model.clone(),
                    *timeout_secs,
                )?
                .with_max_tokens(*max_tokens);
                Ok(Arc::new(client))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(content: &str) -> ChatResponse {
        ChatResponse {
            message: ChatTurn::assistant(content),
            usage: TokenUsage::default(),
            finish_reason: "stop".to_string(),
        }
    }

    #[derive(Debug, Deserialize)]
    struct Brief {
        research_brief: String,
    }

    #[test]
    fn test_parse_json_accepts_fenced_output() {
        let parsed: Brief = response("```json\n{\"research_brief\": \"EV batteries\"}\n```")
            .parse_json()
            .unwrap();
        assert_eq!(parsed.research_brief, "EV batteries");
    }

    #[test]
    fn test_parse_json_reports_malformed_output() {
        let err = response("not json").parse_json::<Brief>().unwrap_err();
        assert!(matches!(err, AppError::LLM(_)));
    }

    #[test]
    fn test_tool_result_turn_links_call() {
        let call = ToolCall {
            id: "call_1".to_string(),
            name: "thinkTool".to_string(),
            arguments: "{}".to_string(),
        };
        let turn = ChatTurn::tool_result(&call, "ok");
        assert_eq!(turn.role, ChatRole::Tool);
        assert_eq!(turn.tool_call_id.as_deref(), Some("call_1"));
    }
}
