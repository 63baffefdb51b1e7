//! 短期记忆：对话状态
//!
//! ConversationState 是只追加的 Turn 序列（用户消息 / 助手消息 / 工具结果批次）。
//! 核心不变量：带 tool_calls 的 AssistantMessage 之后必须紧跟一个 ToolResultBatch，
//! 且其 key 恰好等于这些 tool_call.id；交给模型前必须成立。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::AgentError;

/// 工具调用状态：Pending（刚由模型发出）→ Completed / Interrupted
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolCallStatus {
    Pending,
    Completed,
    Interrupted,
}

/// 模型发出的一次工具调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// 不透明的参数映射；模型输出非法 JSON 时保留原始字符串，交给 schema 校验报告
    pub arguments: Value,
    pub status: ToolCallStatus,
}

impl ToolCall {
    /// 仅供模型 provider 解析响应时使用
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            status: ToolCallStatus::Pending,
        }
    }
}

/// 工具返回值：纯文本或结构化映射
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ToolPayload {
    Display(String),
    Structured(Map<String, Value>),
}

impl ToolPayload {
    /// 渲染为给模型看的文本
    pub fn render(&self) -> String {
        match self {
            ToolPayload::Display(s) => s.clone(),
            ToolPayload::Structured(map) => {
                serde_json::to_string(map).unwrap_or_else(|_| "{}".to_string())
            }
        }
    }
}

/// ToolResult 中 Error 的分类
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Terminal,
    RetryableTransient,
    MalformedOutput,
    ResourceUnavailable,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success { payload: ToolPayload },
    Denied,
    Cancelled { reason: String },
    Error { kind: ErrorKind, message: String },
}

/// 每个 ToolCall 恰好对应一个 ToolResult
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub outcome: ToolOutcome,
}

impl ToolResult {
    pub fn success(id: impl Into<String>, payload: ToolPayload) -> Self {
        Self {
            tool_call_id: id.into(),
            outcome: ToolOutcome::Success { payload },
        }
    }

    pub fn denied(id: impl Into<String>) -> Self {
        Self {
            tool_call_id: id.into(),
            outcome: ToolOutcome::Denied,
        }
    }

    pub fn cancelled(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            tool_call_id: id.into(),
            outcome: ToolOutcome::Cancelled {
                reason: reason.into(),
            },
        }
    }

    pub fn error(id: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            tool_call_id: id.into(),
            outcome: ToolOutcome::Error {
                kind,
                message: message.into(),
            },
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match &self.outcome {
            ToolOutcome::Error { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// 渲染为 tool 角色消息内容（模型据此调整下一步）
    pub fn render(&self) -> String {
        match &self.outcome {
            ToolOutcome::Success { payload } => payload.render(),
            ToolOutcome::Denied => {
                "The user denied this tool call. Nothing was executed.".to_string()
            }
            ToolOutcome::Cancelled { reason } => format!("Cancelled: {reason}"),
            ToolOutcome::Error { kind, message } => {
                let kind = serde_json::to_value(kind)
                    .ok()
                    .and_then(|v| v.as_str().map(String::from))
                    .unwrap_or_default();
                format!("Error ({kind}): {message}")
            }
        }
    }
}

/// 对话中的一个原子单元
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "turn", rename_all = "snake_case")]
pub enum Turn {
    UserMessage {
        text: String,
    },
    AssistantMessage {
        text: String,
        tool_calls: Vec<ToolCall>,
    },
    ToolResultBatch {
        results: Vec<ToolResult>,
    },
}

/// 会话内存中的对话状态（不落盘）
#[derive(Clone, Debug, Default)]
pub struct ConversationState {
    turns: Vec<Turn>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.turns.push(Turn::UserMessage { text: text.into() });
    }

    pub fn push_assistant(&mut self, text: impl Into<String>, tool_calls: Vec<ToolCall>) {
        self.turns.push(Turn::AssistantMessage {
            text: text.into(),
            tool_calls,
        });
    }

    /// 末尾 AssistantMessage 中尚未得到结果的调用 id（按响应顺序）
    pub fn outstanding_call_ids(&self) -> Vec<String> {
        match self.turns.last() {
            Some(Turn::AssistantMessage { tool_calls, .. }) => {
                tool_calls.iter().map(|c| c.id.clone()).collect()
            }
            _ => Vec::new(),
        }
    }

    /// 追加结果批次；批次 key 必须恰好覆盖末尾助手消息的全部调用。
    /// 同时更新调用状态：Cancelled 结果记为 Interrupted，其余为 Completed。
    pub fn push_results(&mut self, results: Vec<ToolResult>) -> Result<(), AgentError> {
        let Some(Turn::AssistantMessage { tool_calls, .. }) = self.turns.last_mut() else {
            return Err(AgentError::InvalidState(
                "tool results without a preceding assistant message".to_string(),
            ));
        };
        if !same_keys(tool_calls, &results) {
            return Err(AgentError::InvalidState(
                "tool result ids do not match outstanding tool calls".to_string(),
            ));
        }
        for call in tool_calls.iter_mut() {
            let cancelled = results.iter().any(|r| {
                r.tool_call_id == call.id && matches!(r.outcome, ToolOutcome::Cancelled { .. })
            });
            call.status = if cancelled {
                ToolCallStatus::Interrupted
            } else {
                ToolCallStatus::Completed
            };
        }
        self.turns.push(Turn::ToolResultBatch { results });
        Ok(())
    }

    /// 校验核心不变量（交给模型前调用）
    pub fn validate(&self) -> Result<(), AgentError> {
        for (i, turn) in self.turns.iter().enumerate() {
            match turn {
                Turn::AssistantMessage { tool_calls, .. } if !tool_calls.is_empty() => {
                    match self.turns.get(i + 1) {
                        Some(Turn::ToolResultBatch { results }) if same_keys(tool_calls, results) => {}
                        Some(Turn::ToolResultBatch { .. }) => {
                            return Err(AgentError::InvalidState(format!(
                                "turn {i}: result batch does not match tool call ids"
                            )))
                        }
                        _ => {
                            return Err(AgentError::InvalidState(format!(
                                "turn {i}: assistant tool calls are unanswered"
                            )))
                        }
                    }
                }
                Turn::ToolResultBatch { .. } => {
                    let answered = matches!(
                        i.checked_sub(1).and_then(|p| self.turns.get(p)),
                        Some(Turn::AssistantMessage { tool_calls, .. }) if !tool_calls.is_empty()
                    );
                    if !answered {
                        return Err(AgentError::InvalidState(format!(
                            "turn {i}: result batch without tool calls"
                        )));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn same_keys(calls: &[ToolCall], results: &[ToolResult]) -> bool {
    if calls.len() != results.len() {
        return false;
    }
    let mut call_ids: Vec<&str> = calls.iter().map(|c| c.id.as_str()).collect();
    let mut result_ids: Vec<&str> = results.iter().map(|r| r.tool_call_id.as_str()).collect();
    call_ids.sort_unstable();
    result_ids.sort_unstable();
    call_ids == result_ids
}
