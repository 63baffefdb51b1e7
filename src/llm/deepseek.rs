//! DeepSeek provider（OpenAI 兼容格式）
//!
//! - Base URL: https://api.deepseek.com
//! - 模型: deepseek-chat (常规对话), deepseek-reasoner (思考模式)

use std::time::Duration;

use crate::llm::OpenAiProvider;

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";

/// 创建 DeepSeek provider
///
/// - 模型优先取参数，其次 `DEEPSEEK_MODEL` 环境变量，默认 `deepseek-chat`
pub fn create_deepseek_provider(
    model: Option<&str>,
    api_key: &str,
    request_timeout: Duration,
) -> OpenAiProvider {
    let model = model
        .map(String::from)
        .or_else(|| std::env::var("DEEPSEEK_MODEL").ok())
        .unwrap_or_else(|| DEEPSEEK_CHAT.to_string());
    OpenAiProvider::new(Some(DEEPSEEK_BASE_URL), &model, api_key, request_timeout).with_name("deepseek")
}
