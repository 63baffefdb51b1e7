//! 工作区文件系统工具
//!
//! SafeFs 绑定 workspace 根目录，所有路径经 resolve 校验必须在根下（禁止 ../ 逃逸）；
//! CatTool / LsTool 只读、幂等，属于 Safe 工具，不经过审批。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::core::AgentError;
use crate::memory::ToolPayload;
use crate::tools::schema::{parse_args, schema_of};
use crate::tools::{RiskClass, Tool, ToolContext, ToolError};

/// 绑定根目录的文件系统视图
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
}

impl SafeFs {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            root_dir: root_dir.as_ref().to_path_buf(),
        }
    }

    fn root(&self) -> PathBuf {
        self.root_dir
            .canonicalize()
            .unwrap_or_else(|_| self.root_dir.clone())
    }

    /// 解析相对路径并确认仍在根目录下
    pub fn resolve(&self, path: &str) -> Result<PathBuf, AgentError> {
        let path = path.trim_start_matches("./");
        let root = self.root();
        if path.is_empty() || path == "." {
            return Ok(root);
        }
        let canonical = root
            .join(path)
            .canonicalize()
            .map_err(|_| AgentError::PathEscape(path.to_string()))?;
        if canonical.starts_with(&root) {
            Ok(canonical)
        } else {
            Err(AgentError::PathEscape(path.to_string())) // 如 ../../etc/passwd
        }
    }

    pub async fn read_file(&self, path: &str) -> Result<String, ToolError> {
        let resolved = self.resolve(path).map_err(not_accessible)?;
        tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| ToolError::Failed(format!("read {path} failed: {e}")))
    }

    pub async fn list_dir(&self, path: &str) -> Result<Vec<String>, ToolError> {
        let base = self.resolve(path).map_err(not_accessible)?;
        let mut dir = tokio::fs::read_dir(&base)
            .await
            .map_err(|e| ToolError::Failed(format!("list {path} failed: {e}")))?;
        let mut entries = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            entries.push(if is_dir { format!("{name}/") } else { name });
        }
        entries.sort();
        Ok(entries)
    }
}

fn not_accessible(e: AgentError) -> ToolError {
    match e {
        AgentError::PathEscape(p) => {
            ToolError::Failed(format!("path '{p}' does not exist or is outside the workspace"))
        }
        other => ToolError::Failed(other.to_string()),
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct CatArgs {
    /// File path relative to the workspace
    path: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct LsArgs {
    /// Directory relative to the workspace, defaults to "."
    #[serde(default)]
    path: Option<String>,
}

/// Cat 工具：读取文件内容
pub struct CatTool {
    fs: SafeFs,
}

impl CatTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for CatTool {
    fn name(&self) -> &str {
        "cat"
    }

    fn description(&self) -> &str {
        "Read a file from the workspace."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<CatArgs>()
    }

    fn risk_class(&self) -> RiskClass {
        RiskClass::Safe
    }

    fn idempotent(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, _ctx: &mut ToolContext<'_>) -> Result<ToolPayload, ToolError> {
        let args: CatArgs = parse_args(args)?;
        tracing::info!(path = %args.path, "cat tool execute");
        Ok(ToolPayload::Display(self.fs.read_file(&args.path).await?))
    }
}

/// Ls 工具：列出目录
pub struct LsTool {
    fs: SafeFs,
}

impl LsTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            fs: SafeFs::new(root_dir),
        }
    }
}

#[async_trait]
impl Tool for LsTool {
    fn name(&self) -> &str {
        "ls"
    }

    fn description(&self) -> &str {
        "List a directory in the workspace (directories end with '/')."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<LsArgs>()
    }

    fn risk_class(&self) -> RiskClass {
        RiskClass::Safe
    }

    fn idempotent(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, _ctx: &mut ToolContext<'_>) -> Result<ToolPayload, ToolError> {
        let args: LsArgs = parse_args(args)?;
        let path = args.path.unwrap_or_else(|| ".".to_string());
        tracing::info!(path = %path, "ls tool execute");
        let entries = self.fs.list_dir(&path).await?;
        Ok(ToolPayload::Display(entries.join("\n")))
    }
}
