//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BEE__*` 覆盖（双下划线表示嵌套，如 `BEE__SANDBOX__BACKEND=docker`）。
//! 会话开始时转换为不可变的 SessionConfig，运行期间不再读取。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::retry::{BackoffConfig, RetryBudget, RetryConfig};
use crate::core::SessionConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub session: SessionSection,
    pub retry: RetrySection,
    pub llm: LlmSection,
    pub sandbox: SandboxSection,
    pub tools: ToolsSection,
}

/// [app] 段：应用名、工作目录
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 沙箱根目录，未设置时用 ./workspace
    pub workspace_root: Option<PathBuf>,
}

/// [session] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// SideEffecting 工具免确认
    pub auto_approve: bool,
    /// 空闲时双击 Ctrl+C 的退出窗口
    pub exit_window_ms: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            auto_approve: false,
            exit_window_ms: 2000,
        }
    }
}

/// [retry] 段：重试预算、退避与反思
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    /// 总尝试次数（含首次）
    pub max_attempts: u32,
    pub max_elapsed_secs: u64,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_sleep_secs: u64,
    pub reflection_attempts: u32,
    pub reflection_delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_elapsed_secs: 60,
            base_delay_ms: 500,
            max_delay_ms: 8000,
            max_sleep_secs: 30,
            reflection_attempts: 2,
            reflection_delay_ms: 500,
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// deepseek / openai / mock；未设置 API Key 时总是回退到 mock
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            model: None,
            base_url: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    /// 单次请求超时（秒）
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 60 }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SandboxBackendKind {
    #[default]
    Local,
    Docker,
}

/// [sandbox] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SandboxSection {
    pub backend: SandboxBackendKind,
    /// docker 后端使用的镜像
    pub image: String,
    /// shell 工具的命令超时（秒）
    pub command_timeout_secs: u64,
    /// stdout / stderr 各自的最大字符数
    pub max_output_chars: usize,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            backend: SandboxBackendKind::Local,
            image: "debian:bookworm-slim".to_string(),
            command_timeout_secs: 120,
            max_output_chars: 8000,
        }
    }
}

/// [tools] 段
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ToolsSection {
    pub fetch: FetchSection,
}

/// [tools.fetch] 段：抓取 URL 的超时、最大字符数、允许的域名白名单
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchSection {
    pub timeout_secs: u64,
    pub max_result_chars: usize,
    pub allowed_domains: Vec<String>,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            max_result_chars: 8000,
            allowed_domains: vec![
                "wikipedia.org".into(),
                "github.com".into(),
                "raw.githubusercontent.com".into(),
                "stackoverflow.com".into(),
                "docs.rs".into(),
                "crates.io".into(),
                "doc.rust-lang.org".into(),
                "developer.mozilla.org".into(),
                "man7.org".into(),
            ],
        }
    }
}

impl AppConfig {
    pub fn workspace_root(&self) -> PathBuf {
        self.app
            .workspace_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("workspace"))
    }

    pub fn retry_config(&self) -> RetryConfig {
        let r = &self.retry;
        RetryConfig {
            budget: RetryBudget {
                max_attempts: r.max_attempts.max(1),
                max_elapsed: Duration::from_secs(r.max_elapsed_secs),
            },
            backoff: BackoffConfig {
                base_delay: Duration::from_millis(r.base_delay_ms),
                max_delay: Duration::from_millis(r.max_delay_ms),
                max_sleep: Duration::from_secs(r.max_sleep_secs),
            },
            reflection_attempts: r.reflection_attempts,
            reflection_delay: Duration::from_millis(r.reflection_delay_ms),
        }
    }

    /// 转为会话构造时使用的不可变配置
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            auto_approve: self.session.auto_approve,
            retry: self.retry_config(),
            exit_window: Duration::from_millis(self.session.exit_window_ms),
        }
    }
}

/// 从 config 目录加载配置，环境变量 BEE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BEE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BEE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
