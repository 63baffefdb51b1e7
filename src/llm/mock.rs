//! Mock provider（离线，无需 API Key）
//!
//! - `$ <cmd>`：发出 shell 调用
//! - 包含 "list files"：发出 ls 调用
//! - 上一轮是工具结果：汇总结果文本
//! - 其他：回显用户输入

use async_trait::async_trait;
use serde_json::json;

use crate::core::classifier::Failure;
use crate::llm::{ModelProvider, ModelResponse};
use crate::memory::{ConversationState, ToolCall, ToolOutcome, Turn};
use crate::tools::ToolSpec;

#[derive(Debug, Default)]
pub struct MockProvider;

fn call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn submit(
        &self,
        conversation: &ConversationState,
        tools: &[ToolSpec],
    ) -> Result<ModelResponse, Failure> {
        let has_tool = |name: &str| tools.iter().any(|t| t.name == name);
        match conversation.last() {
            Some(Turn::ToolResultBatch { results }) => {
                let lines: Vec<String> = results
                    .iter()
                    .map(|r| match &r.outcome {
                        ToolOutcome::Success { .. } => r.render(),
                        _ => format!("[{}] {}", r.tool_call_id, r.render()),
                    })
                    .collect();
                Ok(ModelResponse::text(lines.join("\n")))
            }
            Some(Turn::UserMessage { text }) => {
                let text = text.trim();
                if let Some(command) = text.strip_prefix('$').map(str::trim) {
                    if !command.is_empty() && has_tool("shell") {
                        return Ok(ModelResponse {
                            text: String::new(),
                            tool_calls: vec![ToolCall::new(
                                call_id(),
                                "shell",
                                json!({ "command": command }),
                            )],
                        });
                    }
                }
                if text.to_lowercase().contains("list files") && has_tool("ls") {
                    return Ok(ModelResponse {
                        text: String::new(),
                        tool_calls: vec![ToolCall::new(call_id(), "ls", json!({ "path": "." }))],
                    });
                }
                Ok(ModelResponse::text(format!("Echo from Mock: {text}")))
            }
            _ => Ok(ModelResponse::text("(no input)")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    use crate::memory::{ToolPayload, ToolResult};

    fn specs() -> Vec<ToolSpec> {
        ["ls", "shell"]
            .iter()
            .map(|n| ToolSpec {
                name: n.to_string(),
                description: String::new(),
                parameters: Value::Null,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_dollar_prefix_issues_shell_call() {
        let mut state = ConversationState::new();
        state.push_user("$ touch a.txt");
        let resp = MockProvider.submit(&state, &specs()).await.unwrap();
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].name, "shell");
        assert_eq!(resp.tool_calls[0].arguments, json!({"command": "touch a.txt"}));
    }

    #[tokio::test]
    async fn test_list_files_and_summary() {
        let mut state = ConversationState::new();
        state.push_user("please list files");
        let resp = MockProvider.submit(&state, &specs()).await.unwrap();
        assert_eq!(resp.tool_calls[0].name, "ls");

        let id = resp.tool_calls[0].id.clone();
        state.push_assistant(resp.text, resp.tool_calls);
        state
            .push_results(vec![ToolResult::success(&id, ToolPayload::Display("a.txt".into()))])
            .unwrap();
        let resp = MockProvider.submit(&state, &specs()).await.unwrap();
        assert!(resp.tool_calls.is_empty());
        assert_eq!(resp.text, "a.txt");
    }

    #[tokio::test]
    async fn test_echo() {
        let mut state = ConversationState::new();
        state.push_user("hello");
        let resp = MockProvider.submit(&state, &[]).await.unwrap();
        assert_eq!(resp.text, "Echo from Mock: hello");
    }
}
