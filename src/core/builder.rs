//! 会话构建器：由 AppConfig 统一组装 provider、工具注册表与沙箱

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{AppConfig, SandboxBackendKind};
use crate::core::SessionLoop;
use crate::llm::{create_deepseek_provider, MockProvider, ModelProvider, OpenAiProvider};
use crate::sandbox::{DockerBackend, ExecutionSandbox, LocalBackend, SandboxBackend};
use crate::tools::{CatTool, FetchTool, LsTool, ShellTool, ToolRegistry};
use crate::ui::UserInteraction;

pub struct SessionBuilder {
    config: AppConfig,
    workspace: PathBuf,
}

impl SessionBuilder {
    pub fn new(config: AppConfig, workspace: PathBuf) -> Self {
        Self { config, workspace }
    }

    pub fn workspace(&self) -> &PathBuf {
        &self.workspace
    }

    /// 内置工具：ls / cat / fetch（Safe）与 shell（SideEffecting）
    pub fn build_tool_registry(&self) -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools.register(LsTool::new(&self.workspace));
        tools.register(CatTool::new(&self.workspace));
        tools.register(FetchTool::new(
            self.config.tools.fetch.allowed_domains.clone(),
            self.config.tools.fetch.timeout_secs,
            self.config.tools.fetch.max_result_chars,
        ));
        tools.register(ShellTool::new(
            self.config.sandbox.command_timeout_secs,
            self.config.sandbox.max_output_chars,
        ));
        tools
    }

    /// 根据配置与环境变量选择 provider（DeepSeek / OpenAI 兼容 / Mock）
    pub fn build_provider(&self) -> Arc<dyn ModelProvider> {
        let llm = &self.config.llm;
        let provider = llm.provider.to_lowercase();
        let timeout = Duration::from_secs(llm.timeouts.request);
        let deepseek_key = std::env::var("DEEPSEEK_API_KEY").ok();
        let openai_key = std::env::var("OPENAI_API_KEY").ok();

        match (provider.as_str(), deepseek_key, openai_key) {
            ("mock", _, _) => {
                tracing::info!("Using Mock provider");
                Arc::new(MockProvider)
            }
            ("deepseek", Some(key), _) | ("deepseek", None, Some(key)) => {
                tracing::info!("Using DeepSeek provider");
                Arc::new(create_deepseek_provider(llm.model.as_deref(), &key, timeout))
            }
            (_, _, Some(key)) => {
                let model = llm.model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string());
                tracing::info!("Using OpenAI-compatible provider ({})", model);
                Arc::new(OpenAiProvider::new(llm.base_url.as_deref(), &model, &key, timeout))
            }
            _ => {
                tracing::warn!("No API key set or provider unknown, using Mock provider");
                Arc::new(MockProvider)
            }
        }
    }

    pub fn build_sandbox(&self) -> ExecutionSandbox {
        let backend: Box<dyn SandboxBackend> = match self.config.sandbox.backend {
            SandboxBackendKind::Local => Box::new(LocalBackend::new()),
            SandboxBackendKind::Docker => Box::new(DockerBackend::new(&self.config.sandbox.image)),
        };
        ExecutionSandbox::new(backend, &self.workspace)
    }

    pub fn build(&self, ui: Arc<dyn UserInteraction>) -> SessionLoop {
        SessionLoop::new(
            self.config.session_config(),
            self.build_provider(),
            self.build_tool_registry(),
            self.build_sandbox(),
            ui,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_has_builtin_tools() {
        let builder = SessionBuilder::new(AppConfig::default(), PathBuf::from("workspace"));
        assert_eq!(
            builder.build_tool_registry().tool_names(),
            vec!["cat", "fetch", "ls", "shell"]
        );
    }

    #[test]
    fn test_sandbox_starts_absent() {
        let builder = SessionBuilder::new(AppConfig::default(), PathBuf::from("workspace"));
        let sandbox = builder.build_sandbox();
        assert_eq!(sandbox.state(), crate::sandbox::SandboxState::Absent);
        assert_eq!(sandbox.creations(), 0);
    }
}
