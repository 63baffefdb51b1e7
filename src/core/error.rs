//! Agent 错误类型
//!
//! 会话运行时对外返回的错误；每个错误都能给出一行面向用户的提示（user_message），
//! 不暴露原始错误链或栈信息。

use thiserror::Error;

/// 会话运行过程中可能终止一轮对话的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 用户中断（Ctrl+C）；InterruptRecovery 已修补对话状态
    #[error("Cancelled by user")]
    Cancelled,

    /// 模型调用在重试预算内仍失败（限流、5xx、网络）
    #[error("Model provider unavailable: {detail}")]
    ProviderExhausted { status: Option<u16>, detail: String },

    /// 模型调用遇到不可重试的错误（4xx 等）
    #[error("Model provider rejected the request: {detail}")]
    ProviderRejected { status: Option<u16>, detail: String },

    /// 反思次数用尽，模型仍产出非法的工具调用
    #[error("Tool call still malformed after {attempts} reflection attempts: {detail}")]
    ReflectionExhausted { attempts: u32, detail: String },

    /// 沙箱无法创建（致命：模型无法绕过）
    #[error("Sandbox unavailable: {0}")]
    SandboxUnavailable(String),

    /// 对话状态不变量被破坏
    #[error("Invalid conversation state: {0}")]
    InvalidState(String),

    #[error("Path escape attempt: {0}")]
    PathEscape(String),
}

impl AgentError {
    /// 单行诊断 + 下一步建议
    pub fn user_message(&self) -> String {
        match self {
            AgentError::Cancelled => "Interrupted. The turn was cancelled.".to_string(),
            AgentError::ProviderExhausted { status: Some(429), .. } => {
                "Rate limited by the model provider, try again in a few seconds.".to_string()
            }
            AgentError::ProviderExhausted { .. } => {
                "The model provider is unavailable right now, try again later.".to_string()
            }
            AgentError::ProviderRejected {
                status: Some(401 | 403),
                ..
            } => "The model provider rejected the credentials, check your API key.".to_string(),
            AgentError::ProviderRejected { .. } => {
                "The model provider rejected the request, rephrase it or start a new session."
                    .to_string()
            }
            AgentError::ReflectionExhausted { .. } => {
                "Tool arguments invalid, rephrase the request.".to_string()
            }
            AgentError::SandboxUnavailable(_) => {
                "The command sandbox could not start, check the sandbox backend and restart."
                    .to_string()
            }
            AgentError::InvalidState(_) => {
                "Internal conversation state error, start a new session.".to_string()
            }
            AgentError::PathEscape(path) => {
                format!("Path '{path}' is outside the workspace, use a relative path.")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_is_single_line() {
        let errors = [
            AgentError::Cancelled,
            AgentError::ProviderExhausted {
                status: Some(429),
                detail: "too many requests\nretry later".into(),
            },
            AgentError::ProviderRejected {
                status: Some(401),
                detail: "bad key".into(),
            },
            AgentError::ReflectionExhausted {
                attempts: 2,
                detail: "missing field".into(),
            },
            AgentError::SandboxUnavailable("docker: not found".into()),
        ];
        for e in errors {
            assert!(!e.user_message().contains('\n'));
        }
    }

    #[test]
    fn test_rate_limited_message() {
        let e = AgentError::ProviderExhausted {
            status: Some(429),
            detail: String::new(),
        };
        assert!(e.user_message().contains("Rate limited"));
    }
}
