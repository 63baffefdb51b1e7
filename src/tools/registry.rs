//! 工具注册表
//!
//! 所有工具实现 Tool trait（名称 / 描述 / 参数 schema / 风险等级 / 幂等性 / 执行），
//! 风险与幂等是静态元数据，由 ApprovalGate 与 RetryPolicy 读取，不做动态推断。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::classifier::Failure;
use crate::memory::ToolPayload;
use crate::sandbox::ExecutionSandbox;

/// 工具风险等级：Safe 直接执行，SideEffecting 需用户确认
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RiskClass {
    Safe,
    SideEffecting,
}

/// 工具执行失败
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    /// 参数不符合预期（进入反思流程）
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// 可分类的传输层失败（HTTP / 网络）
    #[error("{0}")]
    Transport(Failure),

    /// 沙箱不可用（致命）
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// 其他确定性失败
    #[error("{0}")]
    Failed(String),
}

/// 工具执行上下文：会话独占的沙箱
pub struct ToolContext<'a> {
    pub sandbox: &'a mut ExecutionSandbox,
}

#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（模型 tool call 中的 name）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema；模型给出的参数在执行前按此校验
    fn parameters_schema(&self) -> Value;

    fn risk_class(&self) -> RiskClass;

    /// 只读 / 幂等的工具才会被自动重试
    fn idempotent(&self) -> bool;

    async fn execute(&self, args: Value, ctx: &mut ToolContext<'_>) -> Result<ToolPayload, ToolError>;
}

/// 提交给模型的工具描述
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// 按名称排序的工具描述
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self
            .tools
            .values()
            .map(|tool| ToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }
}
