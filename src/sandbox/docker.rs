//! Docker 后端：每个会话一个常驻容器（docker run -d），命令经 docker exec 执行，
//! workspace 以 bind mount 挂载到 /workspace。

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

use crate::sandbox::backend::output_detached;
use crate::sandbox::{CommandOutput, SandboxBackend, SandboxError};

const CONTAINER_WORKDIR: &str = "/workspace";

#[derive(Debug, Clone)]
pub struct DockerBackend {
    image: String,
    docker_bin: String,
}

impl DockerBackend {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            docker_bin: "docker".to_string(),
        }
    }

    async fn docker(&self, args: &[&str]) -> Result<std::process::Output, SandboxError> {
        let mut cmd = Command::new(&self.docker_bin);
        cmd.args(args);
        output_detached(cmd)
            .await
            .map_err(|e| SandboxError::Exec(format!("{}: {e}", self.docker_bin)))
    }
}

/// docker CLI 报告容器不存在 / 未运行
fn container_missing(stderr: &str) -> bool {
    stderr.contains("No such container") || stderr.contains("is not running")
}

#[async_trait]
impl SandboxBackend for DockerBackend {
    fn name(&self) -> &str {
        "docker"
    }

    async fn create(&self, workspace: &Path) -> Result<String, SandboxError> {
        tokio::fs::create_dir_all(workspace)
            .await
            .map_err(|e| SandboxError::CreateFailed(format!("{}: {e}", workspace.display())))?;
        let host_dir = workspace
            .canonicalize()
            .map_err(|e| SandboxError::CreateFailed(e.to_string()))?;
        let mount = format!("{}:{CONTAINER_WORKDIR}", host_dir.display());
        let name = format!("bee-shell-{}", uuid::Uuid::new_v4().simple());
        let output = self
            .docker(&[
                "run",
                "-d",
                "--rm",
                "--name",
                &name,
                "--network",
                "none",
                "-v",
                &mount,
                "-w",
                CONTAINER_WORKDIR,
                &self.image,
                "sleep",
                "infinity",
            ])
            .await
            .map_err(|e| SandboxError::CreateFailed(e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SandboxError::CreateFailed(
                stderr.lines().next().unwrap_or("docker run failed").to_string(),
            ));
        }
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        tracing::info!(container = %id, image = %self.image, "docker sandbox started");
        Ok(if id.is_empty() { name } else { id })
    }

    async fn is_alive(&self, identity: &str) -> bool {
        match self
            .docker(&["inspect", "-f", "{{.State.Running}}", identity])
            .await
        {
            Ok(out) => out.status.success() && String::from_utf8_lossy(&out.stdout).trim() == "true",
            Err(_) => false,
        }
    }

    async fn exec(
        &self,
        identity: &str,
        _workspace: &Path,
        command: &str,
    ) -> Result<CommandOutput, SandboxError> {
        let output = self
            .docker(&["exec", "-w", CONTAINER_WORKDIR, identity, "sh", "-c", command])
            .await?;
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() && container_missing(&stderr) {
            return Err(SandboxError::Gone(stderr.trim().to_string()));
        }
        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr,
        })
    }

    async fn destroy(&self, identity: &str) -> Result<(), SandboxError> {
        let output = self.docker(&["rm", "-f", identity]).await?;
        if output.status.success() || container_missing(&String::from_utf8_lossy(&output.stderr)) {
            Ok(())
        } else {
            Err(SandboxError::Exec(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }
}
