//! 模型 provider 抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 ModelProvider：输入完整对话与工具描述，
//! 返回助手文本与工具调用；失败以 Failure 返回，由会话层的 RetryPolicy 分类与重试。

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::core::classifier::Failure;
use crate::memory::{ConversationState, ToolCall};
use crate::tools::ToolSpec;

/// 一次模型回复
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

impl ModelResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
        }
    }
}

/// Token 使用统计（累计值）
#[derive(Debug, Default)]
pub struct TokenUsage {
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
}

impl TokenUsage {
    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
    }

    /// (prompt, completion, total)
    pub fn get(&self) -> (u64, u64, u64) {
        let prompt = self.prompt_tokens.load(Ordering::Relaxed);
        let completion = self.completion_tokens.load(Ordering::Relaxed);
        (prompt, completion, prompt + completion)
    }
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &str;

    /// 累计 token 用量；不计量的 provider 返回 None
    fn usage(&self) -> Option<&TokenUsage> {
        None
    }

    async fn submit(
        &self,
        conversation: &ConversationState,
        tools: &[ToolSpec],
    ) -> Result<ModelResponse, Failure>;
}
