//! Fetch 工具：域名白名单、超时、结果大小限制
//!
//! 仅允许配置中的域名；响应超过 max_result_chars 时截断并追加 ...[truncated]。
//! HTML 响应用 html2text 提取可读文本。非 2xx 与网络错误以 Transport 形式返回，交给重试策略分类。

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use html2text::from_read;
use reqwest::Client;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::llm::http::{failure_from_reqwest, failure_from_status};
use crate::memory::ToolPayload;
use crate::tools::schema::{parse_args, schema_of};
use crate::tools::{RiskClass, Tool, ToolContext, ToolError};

const USER_AGENT: &str = concat!("bee-shell/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize, JsonSchema)]
struct FetchArgs {
    /// http(s) URL on an allowlisted domain
    url: String,
}

pub struct FetchTool {
    client: Client,
    allowed_domains: HashSet<String>,
    max_result_chars: usize,
}

/// html2text 失败时的回退
fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn looks_like_html(s: &str) -> bool {
    let s = s.trim_start();
    let head: String = s.chars().take(512).collect::<String>().to_lowercase();
    head.starts_with("<!doctype") || head.starts_with("<html") || head.contains("<head")
}

/// 取 URL 的 host（小写，不含端口）
fn extract_domain(url: &str) -> Option<String> {
    let url = url.trim();
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;
    let authority = rest.split(['/', '?', '#']).next()?;
    let host = authority.rsplit('@').next()?.split(':').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_lowercase())
    }
}

impl FetchTool {
    pub fn new(allowed_domains: Vec<String>, timeout_secs: u64, max_result_chars: usize) -> Self {
        let allowed_domains = allowed_domains.into_iter().map(|s| s.to_lowercase()).collect();
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            allowed_domains,
            max_result_chars,
        }
    }

    /// 精确匹配或子域名匹配
    fn is_allowed(&self, url: &str) -> Result<(), ToolError> {
        let domain = extract_domain(url)
            .ok_or_else(|| ToolError::InvalidArguments(format!("invalid or non-http url: {url}")))?;
        let allowed = self
            .allowed_domains
            .iter()
            .any(|d| domain == *d || domain.ends_with(&format!(".{d}")));
        if allowed {
            Ok(())
        } else {
            Err(ToolError::Failed(format!("domain not in allowlist: {domain}")))
        }
    }

    fn html_to_text(html: &str) -> String {
        match from_read(html.as_bytes(), 120) {
            Ok(text) if !text.trim().is_empty() => text,
            _ => strip_html_tags(html),
        }
    }

    fn truncate(&self, body: String) -> String {
        if body.chars().count() > self.max_result_chars {
            body.chars().take(self.max_result_chars).collect::<String>() + "\n...[truncated]"
        } else {
            body
        }
    }

    async fn fetch(&self, url: &str) -> Result<String, ToolError> {
        self.is_allowed(url)?;
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ToolError::Transport(failure_from_reqwest(&e)))?;
        let status = resp.status();
        if !status.is_success() {
            let headers = resp.headers().clone();
            let body = resp.text().await.unwrap_or_default();
            return Err(ToolError::Transport(failure_from_status(
                status.as_u16(),
                &headers,
                &body,
            )));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| ToolError::Transport(failure_from_reqwest(&e)))?;
        let body = body.trim_start_matches('\u{FEFF}');
        let body = if looks_like_html(body) {
            Self::html_to_text(body)
        } else {
            body.to_string()
        };
        Ok(self.truncate(body))
    }
}

#[async_trait]
impl Tool for FetchTool {
    fn name(&self) -> &str {
        "fetch"
    }

    fn description(&self) -> &str {
        "Fetch a web page and return its readable text. Only allowlisted domains are reachable."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<FetchArgs>()
    }

    fn risk_class(&self) -> RiskClass {
        RiskClass::Safe
    }

    fn idempotent(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, _ctx: &mut ToolContext<'_>) -> Result<ToolPayload, ToolError> {
        let args: FetchArgs = parse_args(args)?;
        tracing::info!(url = %args.url, "fetch tool execute");
        Ok(ToolPayload::Display(self.fetch(args.url.trim()).await?))
    }
}
