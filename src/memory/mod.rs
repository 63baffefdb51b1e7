//! 记忆层：会话内存中的对话状态（Turn 序列与不变量）

pub mod conversation;

pub use conversation::{
    ConversationState, ErrorKind, ToolCall, ToolCallStatus, ToolOutcome, ToolPayload, ToolResult,
    Turn,
};
