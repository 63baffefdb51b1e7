//! 审批闸门
//!
//! Safe 工具直接放行；SideEffecting 工具在未开启会话级 auto_approve 时阻塞等待用户确认。
//! 拒绝不是错误：调用方据此生成 ToolResult::Denied 写回对话，让模型知道为什么什么都没发生。

use crate::memory::ToolCall;
use crate::tools::{RiskClass, Tool};
use crate::ui::UserInteraction;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApprovalResponse {
    Approved,
    Denied,
}

/// 决定只对当前这一次调用有效
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApprovalScope {
    ThisCallOnly,
}

/// 一次审批结果（不持久化，也不进入对话状态）
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApprovalDecision {
    pub tool_name: String,
    pub risk_class: RiskClass,
    pub response: ApprovalResponse,
    pub scope: ApprovalScope,
}

impl ApprovalDecision {
    pub fn approved(&self) -> bool {
        self.response == ApprovalResponse::Approved
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ApprovalGate {
    auto_approve: bool,
}

impl ApprovalGate {
    pub fn new(auto_approve: bool) -> Self {
        Self { auto_approve }
    }

    pub async fn check(
        &self,
        tool: &dyn Tool,
        call: &ToolCall,
        ui: &dyn UserInteraction,
    ) -> ApprovalDecision {
        let risk_class = tool.risk_class();
        let response = match risk_class {
            RiskClass::Safe => ApprovalResponse::Approved,
            RiskClass::SideEffecting if self.auto_approve => {
                tracing::debug!(tool = %call.name, "auto-approved side-effecting call");
                ApprovalResponse::Approved
            }
            RiskClass::SideEffecting => {
                if ui.confirm(&describe(call)).await {
                    ApprovalResponse::Approved
                } else {
                    ApprovalResponse::Denied
                }
            }
        };
        tracing::info!(tool = %call.name, ?risk_class, ?response, "approval decision");
        ApprovalDecision {
            tool_name: call.name.clone(),
            risk_class,
            response,
            scope: ApprovalScope::ThisCallOnly,
        }
    }
}

/// 确认提示中的调用描述
fn describe(call: &ToolCall) -> String {
    match call.arguments.get("command").and_then(|v| v.as_str()) {
        Some(command) => format!("{} wants to run: {}", call.name, command),
        None => format!("{} wants to run with arguments {}", call.name, call.arguments),
    }
}
