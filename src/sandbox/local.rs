//! 本地进程后端：sh -c 执行，工作目录固定为 workspace，环境变量清理后只保留 PATH
//!
//! 只提供进程级隔离；需要更强隔离时使用 DockerBackend。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::sandbox::backend::output_detached;
use crate::sandbox::{CommandOutput, SandboxBackend, SandboxError};

#[derive(Debug, Default)]
pub struct LocalBackend {
    /// 当前资源标识与其工作目录
    live: Mutex<Option<(String, PathBuf)>>,
}

impl LocalBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SandboxBackend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    async fn create(&self, workspace: &Path) -> Result<String, SandboxError> {
        tokio::fs::create_dir_all(workspace)
            .await
            .map_err(|e| SandboxError::CreateFailed(format!("{}: {e}", workspace.display())))?;
        let workspace = workspace
            .canonicalize()
            .map_err(|e| SandboxError::CreateFailed(e.to_string()))?;
        let identity = format!("local-{}", uuid::Uuid::new_v4());
        *self.live.lock().await = Some((identity.clone(), workspace));
        Ok(identity)
    }

    async fn is_alive(&self, identity: &str) -> bool {
        match &*self.live.lock().await {
            Some((id, dir)) => id == identity && dir.is_dir(),
            None => false,
        }
    }

    async fn exec(
        &self,
        identity: &str,
        workspace: &Path,
        command: &str,
    ) -> Result<CommandOutput, SandboxError> {
        if !self.is_alive(identity).await {
            return Err(SandboxError::Gone(format!(
                "workspace {} no longer exists",
                workspace.display()
            )));
        }

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.current_dir(workspace)
            .env_clear()
            .env("PATH", std::env::var("PATH").unwrap_or_default())
            .env("HOME", workspace);

        let output = output_detached(cmd)
            .await
            .map_err(|e| SandboxError::Exec(e.to_string()))?;
        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn destroy(&self, identity: &str) -> Result<(), SandboxError> {
        let mut live = self.live.lock().await;
        if matches!(&*live, Some((id, _)) if id == identity) {
            *live = None;
        }
        Ok(())
    }
}
