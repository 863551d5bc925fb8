//! OpenAI-compatible chat completions client
//!
//! Works against api.openai.com and any server exposing the same
//! `/chat/completions` endpoint (vLLM, LM Studio, OpenRouter, ...).

use crate::llm::client::{
    ChatRequest, ChatResponse, ChatRole, ChatTurn, LLMClient, TokenUsage, ToolChoice,
};
use crate::types::{AppError, Result, ToolCall};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

pub struct OpenAIClient {
    http: reqwest::Client,
    api_key: Option<String>,
    api_base: String,
    model: String,
    max_tokens: Option<u32>,
}

impl OpenAIClient {
    pub fn new(
        api_key: Option<String>,
        api_base: String,
        model: String,
        timeout_secs: u64,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AppError::LLM(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_key,
            api_base: api_base.trim_end_matches('/').to_string(),
            model,
            max_tokens: None,
        })
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn role(role: ChatRole) -> &'static str {
        match role {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::Tool => "tool",
        }
    }

    fn encode_turn(turn: &ChatTurn) -> Value {
        let mut message = json!({
            "role": Self::role(turn.role),
            "content": turn.content,
        });
        if !turn.tool_calls.is_empty() {
            message["tool_calls"] = Value::Array(
                turn.tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": { "name": call.name, "arguments": call.arguments },
                        })
                    })
                    .collect(),
            );
        }
        if let Some(id) = &turn.tool_call_id {
            message["tool_call_id"] = json!(id);
        }
        message
    }

    pub(crate) fn build_body(&self, request: &ChatRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": request.messages.iter().map(Self::encode_turn).collect::<Vec<_>>(),
        });

        if !request.tools.is_empty() {
            body["tools"] = Value::Array(
                request
                    .tools
                    .iter()
                    .map(|tool| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": tool.name,
                                "description": tool.description,
                                "parameters": tool.parameters,
                            }
                        })
                    })
                    .collect(),
            );
        }

        if let Some(choice) = &request.tool_choice {
            body["tool_choice"] = match choice {
                ToolChoice::Auto => json!("auto"),
                ToolChoice::Required => json!("required"),
                ToolChoice::Named(name) => json!({"type": "function", "function": {"name": name}}),
            };
        }

        if let Some(format) = &request.response_format {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": { "name": format.name, "schema": format.schema, "strict": true },
            });
        }

        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        body
    }
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ResponseToolCall>,
}

#[derive(Deserialize)]
struct ResponseToolCall {
    id: String,
    function: ResponseFunction,
}

#[derive(Deserialize)]
struct ResponseFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[async_trait]
impl LLMClient for OpenAIClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let body = self.build_body(&request);
        let mut http_request = self
            .http
            .post(format!("{}/chat/completions", self.api_base))
            .json(&body);
        if let Some(key) = &self.api_key {
            http_request = http_request.bearer_auth(key);
        }

        let response = http_request
            .send()
            .await
            .map_err(|e| AppError::LLM(format!("Model request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::LLM(format!("Model returned {}: {}", status, text)));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| AppError::LLM(format!("Failed to decode model response: {}", e)))?;

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::LLM("Model returned no choices".to_string()))?;

        let usage = completion
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        debug!(
            model = %self.model,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            tool_calls = choice.message.tool_calls.len(),
            "Chat completion"
        );

        Ok(ChatResponse {
            message: ChatTurn {
                role: ChatRole::Assistant,
                content: choice.message.content.unwrap_or_default(),
                tool_calls: choice
                    .message
                    .tool_calls
                    .into_iter()
                    .map(|call| ToolCall {
                        id: call.id,
                        name: call.function.name,
                        arguments: call.function.arguments,
                    })
                    .collect(),
                tool_call_id: None,
            },
            usage,
            finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolDefinition;

    fn client() -> OpenAIClient {
        OpenAIClient::new(None, "http://localhost:8000/v1/".to_string(), "m".to_string(), 5).unwrap()
    }

    #[test]
    fn test_body_encodes_tools_and_forced_choice() {
        let request = ChatRequest::new(vec![ChatTurn::user("hi")])
            .with_tools(vec![ToolDefinition {
                name: "thinkTool".to_string(),
                description: "reflect".to_string(),
                parameters: json!({"type": "object"}),
            }])
            .with_tool_choice(ToolChoice::Named("thinkTool".to_string()));

        let body = client().build_body(&request);
        assert_eq!(body["tools"][0]["function"]["name"], "thinkTool");
        assert_eq!(body["tool_choice"]["function"]["name"], "thinkTool");
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn test_body_encodes_tool_history_and_schema() {
        let call = ToolCall {
            id: "c1".to_string(),
            name: "tavilySearch".to_string(),
            arguments: "{\"query\":\"x\"}".to_string(),
        };
        let mut assistant = ChatTurn::assistant("");
        assistant.tool_calls.push(call.clone());

        let request = ChatRequest::new(vec![assistant, ChatTurn::tool_result(&call, "results")])
            .with_response_format("Summary", json!({"type": "object"}));

        let body = client().build_body(&request);
        assert_eq!(body["messages"][0]["tool_calls"][0]["function"]["arguments"], "{\"query\":\"x\"}");
        assert_eq!(body["messages"][1]["tool_call_id"], "c1");
        assert_eq!(body["response_format"]["json_schema"]["name"], "Summary");
    }
}
