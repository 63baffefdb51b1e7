//! LLM 层：provider 抽象与实现（OpenAI 兼容 / DeepSeek / Mock）

pub mod deepseek;
pub mod http;
pub mod mock;
pub mod openai;
pub mod traits;

pub use deepseek::{create_deepseek_provider, DEEPSEEK_CHAT};
pub use mock::MockProvider;
pub use openai::OpenAiProvider;
pub use traits::{ModelProvider, ModelResponse, TokenUsage};
