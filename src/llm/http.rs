//! reqwest 错误与响应头到 Failure 的映射，provider 与 fetch 工具共用

use std::error::Error as StdError;
use std::time::Duration;

use reqwest::header::HeaderMap;

use crate::core::classifier::{Failure, NetworkErrorKind};

/// 解析退避提示：retry-after-ms 优先，其次 retry-after（整数秒）
pub fn retry_after_from_headers(headers: &HeaderMap) -> Option<Duration> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
    };
    if let Some(ms) = header("retry-after-ms").and_then(|v| v.parse::<f64>().ok()) {
        if ms.is_finite() && ms >= 0.0 {
            return Some(Duration::from_secs_f64(ms / 1000.0));
        }
    }
    header("retry-after")
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// 非 2xx 响应 → Failure::Http（附带 Retry-After 提示）
pub fn failure_from_status(status: u16, headers: &HeaderMap, body: &str) -> Failure {
    let detail = if body.trim().is_empty() {
        format!("HTTP {status}")
    } else {
        truncate(body.trim(), 300)
    };
    let failure = Failure::http(status, detail);
    match retry_after_from_headers(headers) {
        Some(delay) => failure.with_retry_after(delay),
        None => failure,
    }
}

/// 请求层错误 → Failure::Network / Failure::Http
pub fn failure_from_reqwest(err: &reqwest::Error) -> Failure {
    if let Some(status) = err.status() {
        return Failure::http(status.as_u16(), err.to_string());
    }
    let kind = if err.is_timeout() {
        NetworkErrorKind::Timeout
    } else if io_kind(err).is_some_and(|k| {
        matches!(
            k,
            std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::UnexpectedEof
        )
    }) {
        NetworkErrorKind::ConnectionReset
    } else if err.is_connect() {
        if io_kind(err) == Some(std::io::ErrorKind::ConnectionRefused) {
            NetworkErrorKind::ConnectionRefused
        } else {
            NetworkErrorKind::Dns
        }
    } else {
        NetworkErrorKind::Other
    };
    Failure::network(kind, err.to_string())
}

fn io_kind(err: &reqwest::Error) -> Option<std::io::ErrorKind> {
    let mut source = err.source();
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            return Some(io.kind());
        }
        source = e.source();
    }
    None
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        s.chars().take(max_chars).collect::<String>() + "..."
    } else {
        s.to_string()
    }
}
