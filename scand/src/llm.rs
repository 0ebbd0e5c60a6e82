use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("llm request failed: {0}")]
    Request(String),

    #[error("llm returned no usable content")]
    EmptyResponse,

    #[error("llm returned malformed response: {0}")]
    Malformed(String),
}

/// One role-tagged message in a multi-turn conversation, including tool
/// calls and tool results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Outcome of one turn of the tool-use loop: either the model wants to call
/// tools, or it produced a (possibly streamed-in-full) text answer.
#[derive(Debug, Clone)]
pub enum ChatTurn {
    ToolCalls(Vec<ToolCall>),
    Text {
        text: String,
        /// Provider-reported token usage for the turn, if any. Persisted as
        /// the final assistant message's `usage_json` and surfaced as a
        /// `DetailEvent::Usage`.
        usage: Option<serde_json::Value>,
    },
}

/// Simple one-shot completion, used by the classifier and the extractor.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError>;

    /// Vision variant used by the extractor for `image/*` responses.
    async fn complete_with_image(
        &self,
        system: &str,
        user: &str,
        image_bytes: &[u8],
        mime_type: &str,
    ) -> Result<String, LlmError>;
}

/// Multi-turn, tool-calling completion used by the research agent.
#[async_trait::async_trait]
pub trait ChatClient: Send + Sync {
    async fn next_turn(
        &self,
        system: &str,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<ChatTurn, LlmError>;
}

const GEMINI_API_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent";

/// `reqwest`-based client grounded on the raw Gemini REST shape used by
/// `classify_query` in the original implementation: a direct POST with
/// `system_instruction`/`contents`/`generationConfig`, API key as a query
/// parameter.
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model_url: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_model_url(api_key, GEMINI_API_URL)
    }

    pub fn with_model_url(api_key: impl Into<String>, model_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            model_url: model_url.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}?key={}", self.model_url, self.api_key)
    }
}

#[async_trait::async_trait]
impl LlmClient for GeminiClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let body = json!({
            "system_instruction": {"parts": [{"text": system}]},
            "contents": [{"role": "user", "parts": [{"text": user}]}],
            "generationConfig": {
                "temperature": 0,
                "maxOutputTokens": 2048,
            },
        });
        send_generate_content(&self.http, &self.endpoint(), body).await
    }

    async fn complete_with_image(
        &self,
        system: &str,
        user: &str,
        image_bytes: &[u8],
        mime_type: &str,
    ) -> Result<String, LlmError> {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(image_bytes);
        let body = json!({
            "system_instruction": {"parts": [{"text": system}]},
            "contents": [{
                "role": "user",
                "parts": [
                    {"text": user},
                    {"inline_data": {"mime_type": mime_type, "data": encoded}},
                ],
            }],
            "generationConfig": {"temperature": 0, "maxOutputTokens": 2048},
        });
        send_generate_content(&self.http, &self.endpoint(), body).await
    }
}

async fn send_generate_content(
    http: &reqwest::Client,
    url: &str,
    body: serde_json::Value,
) -> Result<String, LlmError> {
    let resp = http
        .post(url)
        .json(&body)
        .send()
        .await
        .map_err(|e| LlmError::Request(e.to_string()))?;

    if !resp.status().is_success() {
        return Err(LlmError::Request(format!("http {}", resp.status())));
    }

    let parsed: serde_json::Value = resp
        .json()
        .await
        .map_err(|e| LlmError::Malformed(e.to_string()))?;

    let text = parsed["candidates"][0]["content"]["parts"][0]["text"]
        .as_str()
        .ok_or(LlmError::EmptyResponse)?;
    Ok(text.to_string())
}

/// Tool-use variant. The agent's system prompt and tool loop are driven
/// through this trait; `GeminiClient` implements a minimal single-pass
/// version (one tool-call round, then a final text turn) matching the
/// request/response shape `scan_agent.py`'s `pydantic_ai.Agent` exposes to
/// callers, without depending on a specific agent framework crate.
#[async_trait::async_trait]
impl ChatClient for GeminiClient {
    async fn next_turn(
        &self,
        system: &str,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<ChatTurn, LlmError> {
        let contents: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| {
                json!({
                    "role": match m.role {
                        ChatRole::User | ChatRole::Tool => "user",
                        ChatRole::Assistant => "model",
                        ChatRole::System => "user",
                    },
                    "parts": [{"text": m.content}],
                })
            })
            .collect();

        let function_declarations: Vec<serde_json::Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                })
            })
            .collect();

        let mut body = json!({
            "system_instruction": {"parts": [{"text": system}]},
            "contents": contents,
            "generationConfig": {"temperature": 0.2},
        });
        if !function_declarations.is_empty() {
            body["tools"] = json!([{"function_declarations": function_declarations}]);
        }

        let resp = self
            .http
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(LlmError::Request(format!("http {}", resp.status())));
        }

        let parsed: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;

        let parts = parsed["candidates"][0]["content"]["parts"]
            .as_array()
            .cloned()
            .unwrap_or_default();

        let mut calls = Vec::new();
        let mut text = String::new();
        for (i, part) in parts.iter().enumerate() {
            if let Some(fc) = part.get("functionCall") {
                let name = fc["name"].as_str().unwrap_or_default().to_string();
                let arguments = fc.get("args").cloned().unwrap_or(json!({}));
                calls.push(ToolCall {
                    id: format!("call_{i}"),
                    name,
                    arguments,
                });
            } else if let Some(t) = part.get("text").and_then(|t| t.as_str()) {
                text.push_str(t);
            }
        }

        if !calls.is_empty() {
            return Ok(ChatTurn::ToolCalls(calls));
        }
        if text.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        let usage = parsed.get("usageMetadata").cloned();
        Ok(ChatTurn::Text { text, usage })
    }
}
