//! 沙箱后端抽象
//!
//! 后端只负责「创建 / 执行 / 存活检查 / 销毁」一个隔离资源；
//! 生命周期状态机由 ExecutionSandbox 维护。

use std::path::Path;
use std::process::{Output, Stdio};

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::process::Command;

use crate::sandbox::SandboxState;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SandboxError {
    /// 资源创建失败（运维问题，不自动重试）
    #[error("sandbox creation failed: {0}")]
    CreateFailed(String),

    #[error("sandbox is not running (state: {0:?})")]
    NotRunning(SandboxState),

    /// 资源已崩溃或消失，不在本轮中悄悄重建
    #[error("sandbox resource is gone: {0}")]
    Gone(String),

    #[error("failed to launch command: {0}")]
    Exec(String),
}

/// 命令执行结果；非零退出码是数据，不是错误
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// 转为结构化载荷，输出超出 max_chars 时截断
    pub fn to_map(&self, max_chars: usize) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(
            "exit_code".to_string(),
            self.exit_code.map(Value::from).unwrap_or(Value::Null),
        );
        map.insert("stdout".to_string(), Value::String(truncate(&self.stdout, max_chars)));
        map.insert("stderr".to_string(), Value::String(truncate(&self.stderr, max_chars)));
        map
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars).collect();
        format!("{head}...[truncated]")
    }
}

/// 运行子进程并收集输出；管道由独立任务读取。
/// 调用方放弃等待（中断或超时）后子进程不会被杀，也不会因管道关闭而中途退出
pub(crate) async fn output_detached(mut cmd: Command) -> std::io::Result<Output> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(false);
    let child = cmd.spawn()?;
    tokio::spawn(child.wait_with_output())
        .await
        .map_err(std::io::Error::other)?
}

#[async_trait]
pub trait SandboxBackend: Send + Sync {
    /// 后端名称（日志用）
    fn name(&self) -> &str;

    /// 创建资源，返回其标识
    async fn create(&self, workspace: &Path) -> Result<String, SandboxError>;

    async fn is_alive(&self, identity: &str) -> bool;

    async fn exec(
        &self,
        identity: &str,
        workspace: &Path,
        command: &str,
    ) -> Result<CommandOutput, SandboxError>;

    async fn destroy(&self, identity: &str) -> Result<(), SandboxError>;
}
