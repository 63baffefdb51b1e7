//! OpenAI 兼容 API 客户端
//!
//! 通过 reqwest 调用任意 OpenAI 兼容端点的 /chat/completions（可配置 base_url）；
//! 支持 DeepSeek、OpenAI、自建代理等。状态码与 Retry-After 头映射为 Failure，交给会话层重试。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::classifier::Failure;
use crate::llm::http::{failure_from_reqwest, failure_from_status};
use crate::llm::{ModelProvider, ModelResponse, TokenUsage};
use crate::memory::{ConversationState, ToolCall, Turn};
use crate::tools::ToolSpec;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

const SYSTEM_PROMPT: &str = "You are a command-line assistant working inside the user's workspace. \
Use the provided tools to inspect files and run commands. Prefer read-only tools when they suffice. \
Shell commands may be denied by the user; when that happens, explain what you would have done instead. \
Keep answers short and concrete.";

// ---- wire types ----

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl WireMessage {
    fn plain(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    kind: String,
    function: WireFunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct WireFunctionCall {
    name: String,
    /// JSON 编码的参数字符串
    #[serde(default)]
    arguments: String,
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction<'a>,
}

#[derive(Serialize)]
struct WireFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// 对话 → API 消息；每个 ToolResult 展开为一条 tool 消息
fn to_wire_messages(conversation: &ConversationState) -> Vec<WireMessage> {
    let mut messages = vec![WireMessage::plain("system", SYSTEM_PROMPT)];
    for turn in conversation.turns() {
        match turn {
            Turn::UserMessage { text } => messages.push(WireMessage::plain("user", text.clone())),
            Turn::AssistantMessage { text, tool_calls } => messages.push(WireMessage {
                role: "assistant".to_string(),
                content: if text.is_empty() && !tool_calls.is_empty() {
                    None
                } else {
                    Some(text.clone())
                },
                tool_calls: tool_calls
                    .iter()
                    .map(|c| WireToolCall {
                        id: c.id.clone(),
                        kind: function_type(),
                        function: WireFunctionCall {
                            name: c.name.clone(),
                            arguments: match &c.arguments {
                                Value::String(raw) => raw.clone(),
                                other => other.to_string(),
                            },
                        },
                    })
                    .collect(),
                tool_call_id: None,
            }),
            Turn::ToolResultBatch { results } => {
                for r in results {
                    messages.push(WireMessage {
                        role: "tool".to_string(),
                        content: Some(r.render()),
                        tool_calls: Vec::new(),
                        tool_call_id: Some(r.tool_call_id.clone()),
                    });
                }
            }
        }
    }
    messages
}

/// API 返回的工具调用 → ToolCall；非法 JSON 参数保留原始字符串
fn from_wire_call(call: WireToolCall) -> ToolCall {
    let arguments = if call.function.arguments.trim().is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_str(&call.function.arguments)
            .unwrap_or(Value::String(call.function.arguments))
    };
    ToolCall::new(call.id, call.function.name, arguments)
}

/// 已知的「模型生成了非法工具调用」错误码
const TOOL_CALL_ERROR_CODES: &[&str] = &["invalid_tool_call", "invalid_function_arguments", "tool_use_failed"];

/// 400 是否因模型产出的工具调用非法（而非请求本身有问题）
///
/// 只看错误体中的 code，或明确说明函数参数无法解析的 message；
/// 「tool 消息缺少对应 tool_calls」这类请求侧错误不算。
fn is_tool_call_rejection(body: &str) -> bool {
    let Ok(parsed) = serde_json::from_str::<Value>(body) else {
        return false;
    };
    let error = &parsed["error"];
    if let Some(code) = error["code"].as_str() {
        if TOOL_CALL_ERROR_CODES.contains(&code) {
            return true;
        }
    }
    let message = error["message"].as_str().unwrap_or_default().to_lowercase();
    message.contains("function arguments")
        && (message.contains("invalid") || message.contains("failed to parse"))
}

/// OpenAI 兼容 provider
pub struct OpenAiProvider {
    name: String,
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    usage: TokenUsage,
}

impl OpenAiProvider {
    pub fn new(base_url: Option<&str>, model: &str, api_key: &str, request_timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_default();
        Self {
            name: "openai".to_string(),
            client,
            base_url: base_url
                .unwrap_or(OPENAI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
            usage: TokenUsage::default(),
        }
    }

    /// 日志中显示的 provider 名称
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn record_usage(&self, usage: Option<&Usage>) {
        if let Some(usage) = usage {
            self.usage.add(usage.prompt_tokens, usage.completion_tokens);
        }
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn usage(&self) -> Option<&TokenUsage> {
        Some(&self.usage)
    }

    async fn submit(
        &self,
        conversation: &ConversationState,
        tools: &[ToolSpec],
    ) -> Result<ModelResponse, Failure> {
        let request = ChatRequest {
            model: &self.model,
            messages: to_wire_messages(conversation),
            tools: tools
                .iter()
                .map(|t| WireTool {
                    kind: "function",
                    function: WireFunction {
                        name: &t.name,
                        description: &t.description,
                        parameters: &t.parameters,
                    },
                })
                .collect(),
        };

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| failure_from_reqwest(&e))?;

        let status = resp.status();
        if !status.is_success() {
            let headers = resp.headers().clone();
            let body = resp.text().await.unwrap_or_default();
            let mut failure = failure_from_status(status.as_u16(), &headers, &body);
            if status.as_u16() == 400 && is_tool_call_rejection(&body) {
                if let Failure::Http {
                    invalid_tool_call, ..
                } = &mut failure
                {
                    *invalid_tool_call = true;
                }
            }
            tracing::warn!(status = status.as_u16(), model = %self.model, "model request failed");
            return Err(failure);
        }

        let body: ChatResponse = resp.json().await.map_err(|e| failure_from_reqwest(&e))?;
        self.record_usage(body.usage.as_ref());
        let message = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| Failure::SchemaValidation {
                detail: "model response contained no choices".to_string(),
            })?;

        Ok(ModelResponse {
            text: message.content.unwrap_or_default(),
            tool_calls: message.tool_calls.into_iter().map(from_wire_call).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::memory::{ToolPayload, ToolResult};

    #[test]
    fn test_wire_messages_expand_tool_results() {
        let mut state = ConversationState::new();
        state.push_user("list files");
        state.push_assistant("", vec![ToolCall::new("c1", "ls", json!({"path": "."}))]);
        state
            .push_results(vec![ToolResult::success("c1", ToolPayload::Display("a.txt".into()))])
            .unwrap();

        let messages = to_wire_messages(&state);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[2].role, "assistant");
        assert_eq!(messages[2].content, None);
        assert_eq!(messages[2].tool_calls[0].function.arguments, r#"{"path":"."}"#);
        assert_eq!(messages[3].role, "tool");
        assert_eq!(messages[3].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(messages[3].content.as_deref(), Some("a.txt"));
    }

    #[test]
    fn test_non_json_arguments_kept_raw() {
        let call = from_wire_call(WireToolCall {
            id: "c1".into(),
            kind: function_type(),
            function: WireFunctionCall {
                name: "shell".into(),
                arguments: "{command: ls".into(),
            },
        });
        assert_eq!(call.arguments, Value::String("{command: ls".into()));

        let empty = from_wire_call(WireToolCall {
            id: "c2".into(),
            kind: function_type(),
            function: WireFunctionCall {
                name: "ls".into(),
                arguments: String::new(),
            },
        });
        assert_eq!(empty.arguments, json!({}));
    }

    #[test]
    fn test_parse_response() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":null,
            "tool_calls":[{"id":"call_1","type":"function","function":{"name":"ls","arguments":"{}"}}]}}],
            "usage":{"prompt_tokens":10,"completion_tokens":2}}"#;
        let resp: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.choices[0].message.tool_calls[0].function.name, "ls");
        assert_eq!(resp.usage.map(|u| u.prompt_tokens), Some(10));
    }

    #[test]
    fn test_tool_call_rejection_detection() {
        assert!(is_tool_call_rejection(r#"{"error":{"code":"invalid_tool_call"}}"#));
        assert!(is_tool_call_rejection(
            r#"{"error":{"message":"Invalid function arguments: expected object"}}"#
        ));
        assert!(!is_tool_call_rejection(r#"{"error":{"message":"context length exceeded"}}"#));
        // 请求侧的对话结构错误不是模型输出问题
        assert!(!is_tool_call_rejection(
            r#"{"error":{"message":"Invalid parameter: messages with role 'tool' must be a response to a preceding message with 'tool_calls'.","type":"invalid_request_error","code":null}}"#
        ));
        assert!(!is_tool_call_rejection("tool_calls are broken"));
    }

    #[test]
    fn test_usage_accumulates() {
        let provider = OpenAiProvider::new(None, "gpt-4o-mini", "key", Duration::from_secs(5));
        let usage = Usage {
            prompt_tokens: 10,
            completion_tokens: 2,
        };
        provider.record_usage(Some(&usage));
        provider.record_usage(None);
        provider.record_usage(Some(&usage));
        assert_eq!(provider.usage().map(TokenUsage::get), Some((20, 4, 24)));
        assert_eq!(provider.name(), "openai");
    }
}
