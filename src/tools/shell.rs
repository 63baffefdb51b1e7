//! Shell 工具：在会话沙箱中执行命令
//!
//! SideEffecting、非幂等：执行前需用户确认，传输类失败不会被自动重放。
//! 非零退出码作为结构化数据返回；超时由本工具负责，超时的命令被放弃而不是杀死。

use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::memory::ToolPayload;
use crate::sandbox::SandboxError;
use crate::tools::schema::{parse_args, schema_of};
use crate::tools::{RiskClass, Tool, ToolContext, ToolError};

#[derive(Debug, Deserialize, JsonSchema)]
struct ShellArgs {
    /// Shell command to run, e.g. "ls -la"
    command: String,
}

pub struct ShellTool {
    timeout_secs: u64,
    max_output_chars: usize,
}

impl ShellTool {
    pub fn new(timeout_secs: u64, max_output_chars: usize) -> Self {
        Self {
            timeout_secs,
            max_output_chars,
        }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Run a shell command inside the session sandbox. The working directory is the workspace. Returns exit_code, stdout and stderr."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<ShellArgs>()
    }

    fn risk_class(&self) -> RiskClass {
        RiskClass::SideEffecting
    }

    fn idempotent(&self) -> bool {
        false
    }

    async fn execute(&self, args: Value, ctx: &mut ToolContext<'_>) -> Result<ToolPayload, ToolError> {
        let args: ShellArgs = parse_args(args)?;
        let command = args.command.trim();
        if command.is_empty() {
            return Err(ToolError::InvalidArguments("command must not be empty".to_string()));
        }

        ctx.sandbox
            .ensure()
            .await
            .map_err(|e| ToolError::ResourceUnavailable(e.to_string()))?;

        tracing::info!(command = %command, "shell tool execute");
        let output = tokio::time::timeout(
            Duration::from_secs(self.timeout_secs),
            ctx.sandbox.execute(command),
        )
        .await
        .map_err(|_| ToolError::Failed(format!("command timed out after {}s", self.timeout_secs)))?
        .map_err(|e| match e {
            SandboxError::Exec(msg) => ToolError::Failed(msg),
            other => ToolError::ResourceUnavailable(other.to_string()),
        })?;

        Ok(ToolPayload::Structured(output.to_map(self.max_output_chars)))
    }
}
