//! 错误分类器
//!
//! 纯函数：把原始失败（HTTP 状态码 / 网络错误 / schema 校验失败）映射为
//! Terminal / RetryableTransient / MalformedOutput，并给出建议延迟（Retry-After 提示）。

use std::time::Duration;

/// 网络层错误种类
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetworkErrorKind {
    Timeout,
    ConnectionReset,
    ConnectionRefused,
    Dns,
    Other,
}

/// 待分类的原始失败
#[derive(Clone, Debug, PartialEq)]
pub enum Failure {
    Http {
        status: u16,
        /// Retry-After-Ms 优先，否则 Retry-After（秒）
        retry_after: Option<Duration>,
        /// provider 以 400 明确拒绝了工具调用结构
        invalid_tool_call: bool,
        detail: String,
    },
    Network {
        kind: NetworkErrorKind,
        detail: String,
    },
    SchemaValidation {
        detail: String,
    },
}

impl Failure {
    pub fn http(status: u16, detail: impl Into<String>) -> Self {
        Failure::Http {
            status,
            retry_after: None,
            invalid_tool_call: false,
            detail: detail.into(),
        }
    }

    pub fn network(kind: NetworkErrorKind, detail: impl Into<String>) -> Self {
        Failure::Network {
            kind,
            detail: detail.into(),
        }
    }

    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        if let Failure::Http { retry_after, .. } = &mut self {
            *retry_after = Some(delay);
        }
        self
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Failure::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            Failure::Http { detail, .. }
            | Failure::Network { detail, .. }
            | Failure::SchemaValidation { detail } => detail,
        }
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Failure::Http { status, detail, .. } => write!(f, "HTTP {status}: {detail}"),
            Failure::Network { kind, detail } => write!(f, "network {kind:?}: {detail}"),
            Failure::SchemaValidation { detail } => write!(f, "invalid tool arguments: {detail}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Classification {
    Terminal,
    RetryableTransient,
    MalformedOutput,
}

/// 分类结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Classified {
    pub class: Classification,
    pub suggested_delay: Option<Duration>,
}

pub fn classify_status(status: u16) -> Classification {
    match status {
        408 | 409 | 425 | 429 | 500 | 502 | 503 | 504 => Classification::RetryableTransient,
        _ => Classification::Terminal,
    }
}

pub fn classify(failure: &Failure) -> Classified {
    match failure {
        Failure::Http {
            status: 400,
            invalid_tool_call: true,
            ..
        } => Classified {
            class: Classification::MalformedOutput,
            suggested_delay: None,
        },
        Failure::Http {
            status,
            retry_after,
            ..
        } => Classified {
            class: classify_status(*status),
            suggested_delay: *retry_after,
        },
        Failure::Network { kind, .. } => Classified {
            class: match kind {
                NetworkErrorKind::Timeout | NetworkErrorKind::ConnectionReset => {
                    Classification::RetryableTransient
                }
                _ => Classification::Terminal,
            },
            suggested_delay: None,
        },
        Failure::SchemaValidation { .. } => Classified {
            class: Classification::MalformedOutput,
            suggested_delay: None,
        },
    }
}
