//! 工具调用器
//!
//! 端到端执行单个 ToolCall：查注册表 → 参数校验 → ApprovalGate → 执行 handler →
//! 失败时分类并按 RetryPolicy 重试 / 反思 → 恰好产出一个 ToolResult。
//! 每次调用输出结构化审计日志（JSON）。

use std::time::Instant;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::classifier::{Classification, Failure};
use crate::core::recovery::INTERRUPTED_BY_USER;
use crate::core::retry::{give_up_message, GiveUp, ReflectionBudget, RetryDecision, RetryPolicy};
use crate::memory::{ErrorKind, ToolCall, ToolOutcome, ToolResult};
use crate::sandbox::ExecutionSandbox;
use crate::tools::schema::validate_args;
use crate::tools::{ApprovalGate, ToolContext, ToolError, ToolRegistry, ToolSpec};
use crate::ui::UserInteraction;

/// 一次调用所需的会话资源（单一控制流，按可变借用传入）
pub struct InvokeContext<'a> {
    pub sandbox: &'a mut ExecutionSandbox,
    pub ui: &'a dyn UserInteraction,
    pub reflections: &'a mut ReflectionBudget,
    pub cancel: &'a CancellationToken,
}

pub struct ToolInvoker {
    registry: ToolRegistry,
    gate: ApprovalGate,
    policy: RetryPolicy,
}

impl ToolInvoker {
    pub fn new(registry: ToolRegistry, gate: ApprovalGate, policy: RetryPolicy) -> Self {
        Self {
            registry,
            gate,
            policy,
        }
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.registry.specs()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub async fn invoke(&self, call: &ToolCall, ctx: &mut InvokeContext<'_>) -> ToolResult {
        let start = Instant::now();
        let mut attempts = 0u32;
        let result = self.invoke_inner(call, ctx, &mut attempts).await;

        let outcome = match &result.outcome {
            ToolOutcome::Success { .. } => "ok",
            ToolOutcome::Denied => "denied",
            ToolOutcome::Cancelled { .. } => "cancelled",
            ToolOutcome::Error { .. } => "error",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": call.name,
            "call_id": call.id,
            "outcome": outcome,
            "error_kind": result.error_kind(),
            "attempts": attempts,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(&call.arguments),
        });
        tracing::info!(audit = %audit.to_string(), "tool");
        result
    }

    async fn invoke_inner(
        &self,
        call: &ToolCall,
        ctx: &mut InvokeContext<'_>,
        attempts: &mut u32,
    ) -> ToolResult {
        let Some(tool) = self.registry.get(&call.name) else {
            let detail = format!(
                "unknown tool '{}'; available tools: {}",
                call.name,
                self.registry.tool_names().join(", ")
            );
            return malformed(call, detail, ctx.reflections);
        };

        if let Err(detail) = validate_args(&tool.parameters_schema(), &call.arguments) {
            return malformed(call, detail, ctx.reflections);
        }

        let decision = self.gate.check(tool.as_ref(), call, ctx.ui).await;
        if !decision.approved() {
            return ToolResult::denied(&call.id);
        }

        let mut retry = self.policy.begin();
        loop {
            *attempts = retry.attempt;
            let mut tool_ctx = ToolContext {
                sandbox: &mut *ctx.sandbox,
            };
            let failure = match tool.execute(call.arguments.clone(), &mut tool_ctx).await {
                Ok(payload) => return ToolResult::success(&call.id, payload),
                Err(ToolError::InvalidArguments(detail)) => {
                    return malformed(call, detail, ctx.reflections)
                }
                Err(ToolError::ResourceUnavailable(detail)) => {
                    return ToolResult::error(&call.id, ErrorKind::ResourceUnavailable, detail)
                }
                Err(ToolError::Failed(detail)) => {
                    return ToolResult::error(&call.id, ErrorKind::Terminal, detail)
                }
                Err(ToolError::Transport(failure)) => failure,
            };

            match self.policy.decide(&mut retry, &failure, tool.idempotent()) {
                RetryDecision::Retry { delay } => {
                    tracing::warn!(
                        tool = %call.name,
                        attempt = retry.attempt,
                        delay_ms = delay.as_millis() as u64,
                        failure = %failure,
                        "retrying tool call"
                    );
                    ctx.ui.notice(&format!(
                        "{} failed ({}), retrying in {:.1}s",
                        call.name,
                        short_failure(&failure),
                        delay.as_secs_f64()
                    ));
                    if self.policy.wait(delay, ctx.cancel).await.is_err() {
                        return ToolResult::cancelled(&call.id, INTERRUPTED_BY_USER);
                    }
                }
                RetryDecision::GiveUp(GiveUp::Malformed) => {
                    return malformed(call, failure.detail().to_string(), ctx.reflections)
                }
                RetryDecision::GiveUp(reason) => {
                    let kind = match retry.classification {
                        Some(Classification::RetryableTransient) => ErrorKind::RetryableTransient,
                        _ => ErrorKind::Terminal,
                    };
                    return ToolResult::error(
                        &call.id,
                        kind,
                        give_up_message(&failure, reason, retry.attempt),
                    );
                }
            }
        }
    }
}

/// MalformedOutput：有反思预算时返回反思消息，否则返回终态错误并标记预算耗尽
fn malformed(call: &ToolCall, detail: String, budget: &mut ReflectionBudget) -> ToolResult {
    if budget.try_consume() {
        tracing::warn!(tool = %call.name, reflection = budget.used(), detail = %detail, "malformed tool call, reflecting");
        ToolResult::error(
            &call.id,
            ErrorKind::MalformedOutput,
            format!(
                "tool call '{}' was rejected: {}. Fix the arguments to match the tool schema and call it again (reflection {}/{}).",
                call.name,
                detail,
                budget.used(),
                budget.limit()
            ),
        )
    } else {
        tracing::warn!(tool = %call.name, detail = %detail, "malformed tool call, reflection budget exhausted");
        let message = format!(
            "tool call '{}' still invalid after {} reflection attempts: {}",
            call.name,
            budget.limit(),
            detail
        );
        budget.mark_exhausted(detail);
        ToolResult::error(&call.id, ErrorKind::Terminal, message)
    }
}

fn short_failure(failure: &Failure) -> String {
    match failure {
        Failure::Http { status, .. } => format!("HTTP {status}"),
        Failure::Network { kind, .. } => format!("{kind:?}").to_lowercase(),
        Failure::SchemaValidation { .. } => "invalid arguments".to_string(),
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
