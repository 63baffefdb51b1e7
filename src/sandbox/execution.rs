//! ExecutionSandbox：每个会话独占、可复用的隔离执行资源
//!
//! 生命周期 Absent → Starting → Running → Stopped，单调推进：
//! - ensure() 幂等，懒创建；Running 时返回同一标识
//! - 创建失败或资源崩溃后进入 Stopped，不在本会话中重建
//! - teardown() 幂等、尽力而为
//! - 创建在独立任务中进行：ensure() 被中断时任务继续，下次 ensure() 或 teardown() 接着等待它
//!
//! 会话是单一协作式控制流，只有一个逻辑线程会触碰它，因此不需要加锁（&mut self 即可）。

use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::sandbox::{CommandOutput, SandboxBackend, SandboxError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SandboxState {
    Absent,
    Starting,
    Running,
    Stopped,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SandboxResource {
    pub identity: Option<String>,
    pub state: SandboxState,
    pub workspace_path: PathBuf,
}

pub struct ExecutionSandbox {
    backend: Arc<dyn SandboxBackend>,
    resource: SandboxResource,
    creations: u32,
    /// Starting 状态下尚未取回结果的创建任务
    pending: Option<JoinHandle<Result<String, SandboxError>>>,
}

impl ExecutionSandbox {
    pub fn new(backend: Box<dyn SandboxBackend>, workspace_path: impl Into<PathBuf>) -> Self {
        Self {
            backend: Arc::from(backend),
            resource: SandboxResource {
                identity: None,
                state: SandboxState::Absent,
                workspace_path: workspace_path.into(),
            },
            creations: 0,
            pending: None,
        }
    }

    pub fn resource(&self) -> &SandboxResource {
        &self.resource
    }

    pub fn state(&self) -> SandboxState {
        self.resource.state
    }

    /// 后端 create 被调用的次数（每个会话至多一次）
    pub fn creations(&self) -> u32 {
        self.creations
    }

    pub async fn ensure(&mut self) -> Result<&SandboxResource, SandboxError> {
        match self.resource.state {
            SandboxState::Running => {
                let identity = self.resource.identity.clone().unwrap_or_default();
                if !self.backend.is_alive(&identity).await {
                    tracing::warn!(sandbox = %identity, "sandbox resource crashed");
                    self.resource.state = SandboxState::Stopped;
                    return Err(SandboxError::Gone(format!("{identity} stopped unexpectedly")));
                }
                Ok(&self.resource)
            }
            SandboxState::Absent => {
                self.resource.state = SandboxState::Starting;
                self.creations += 1;
                tracing::info!(
                    backend = self.backend.name(),
                    workspace = %self.resource.workspace_path.display(),
                    "starting sandbox"
                );
                let backend = self.backend.clone();
                let workspace = self.resource.workspace_path.clone();
                self.pending = Some(tokio::spawn(async move { backend.create(&workspace).await }));
                self.finish_creation().await
            }
            SandboxState::Starting => self.finish_creation().await,
            state => Err(SandboxError::NotRunning(state)),
        }
    }

    /// 等待创建任务；在 await 期间被丢弃时任务保留在 pending 中
    async fn finish_creation(&mut self) -> Result<&SandboxResource, SandboxError> {
        let Some(handle) = self.pending.as_mut() else {
            return Err(SandboxError::NotRunning(self.resource.state));
        };
        let outcome = handle
            .await
            .unwrap_or_else(|e| Err(SandboxError::CreateFailed(e.to_string())));
        self.pending = None;
        match outcome {
            Ok(identity) => {
                tracing::info!(sandbox = %identity, "sandbox running");
                self.resource.identity = Some(identity);
                self.resource.state = SandboxState::Running;
                Ok(&self.resource)
            }
            Err(e) => {
                tracing::error!(error = %e, "sandbox creation failed");
                self.resource.state = SandboxState::Stopped;
                Err(match e {
                    SandboxError::CreateFailed(msg) => SandboxError::CreateFailed(msg),
                    other => SandboxError::CreateFailed(other.to_string()),
                })
            }
        }
    }

    /// 执行命令；要求 Running。非零退出码作为数据返回
    pub async fn execute(&mut self, command: &str) -> Result<CommandOutput, SandboxError> {
        if self.resource.state != SandboxState::Running {
            return Err(SandboxError::NotRunning(self.resource.state));
        }
        let identity = self.resource.identity.clone().unwrap_or_default();
        tracing::debug!(sandbox = %identity, command = %command, "sandbox execute");
        match self
            .backend
            .exec(&identity, &self.resource.workspace_path, command)
            .await
        {
            Err(SandboxError::Gone(msg)) => {
                tracing::warn!(sandbox = %identity, "sandbox resource gone during execute");
                self.resource.state = SandboxState::Stopped;
                Err(SandboxError::Gone(msg))
            }
            other => other,
        }
    }

    pub async fn teardown(&mut self) {
        if let Some(handle) = self.pending.take() {
            // 被中断的创建仍可能成功，拿到标识后照常销毁
            if let Ok(Ok(identity)) = handle.await {
                self.resource.identity = Some(identity);
                self.resource.state = SandboxState::Running;
            }
        }
        if self.resource.state != SandboxState::Running {
            if self.resource.state != SandboxState::Stopped {
                self.resource.state = SandboxState::Stopped;
            }
            return;
        }
        let identity = self.resource.identity.clone().unwrap_or_default();
        if let Err(e) = self.backend.destroy(&identity).await {
            tracing::warn!(sandbox = %identity, error = %e, "sandbox teardown failed");
        } else {
            tracing::info!(sandbox = %identity, "sandbox stopped");
        }
        self.resource.state = SandboxState::Stopped;
    }
}
