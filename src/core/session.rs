//! 会话主循环
//!
//! 一次 submit() 即一轮：追加 UserMessage → 提交完整对话给模型 → 顺序执行返回的工具调用，
//! 追加 ToolResultBatch → 有工具调用则再次提交，直到模型给出不含工具调用的回复。
//! 用户中断取消整轮（不是单个工具调用），之后由 InterruptRecovery 修补对话状态。

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::core::classifier::Classification;
use crate::core::recovery::InterruptRecovery;
use crate::core::retry::{give_up_message, GiveUp, ReflectionBudget, RetryConfig, RetryDecision, RetryPolicy};
use crate::core::AgentError;
use crate::llm::{ModelProvider, ModelResponse};
use crate::memory::{ConversationState, ErrorKind, ToolCall, ToolResult};
use crate::sandbox::ExecutionSandbox;
use crate::tools::{ApprovalGate, InvokeContext, ToolInvoker, ToolRegistry, ToolSpec};
use crate::ui::UserInteraction;

/// 会话级配置（构造时确定，整个会话不变）
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// SideEffecting 工具免确认
    pub auto_approve: bool,
    pub retry: RetryConfig,
    /// 空闲时两次中断之间的退出窗口
    pub exit_window: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_approve: false,
            retry: RetryConfig::default(),
            exit_window: Duration::from_secs(2),
        }
    }
}

/// 模型调用失败：可反思的畸形输出，或终止本轮的错误
enum ModelCallError {
    Malformed(String),
    Fatal(AgentError),
}

pub struct SessionLoop {
    config: SessionConfig,
    provider: Arc<dyn ModelProvider>,
    invoker: ToolInvoker,
    sandbox: ExecutionSandbox,
    ui: Arc<dyn UserInteraction>,
    policy: RetryPolicy,
    recovery: InterruptRecovery,
    state: ConversationState,
}

impl SessionLoop {
    pub fn new(
        config: SessionConfig,
        provider: Arc<dyn ModelProvider>,
        registry: ToolRegistry,
        sandbox: ExecutionSandbox,
        ui: Arc<dyn UserInteraction>,
    ) -> Self {
        let policy = RetryPolicy::new(config.retry);
        let invoker = ToolInvoker::new(registry, ApprovalGate::new(config.auto_approve), policy.clone());
        Self {
            config,
            provider,
            invoker,
            sandbox,
            ui,
            policy,
            recovery: InterruptRecovery::new(),
            state: ConversationState::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn sandbox(&self) -> &ExecutionSandbox {
        &self.sandbox
    }

    /// 本会话累计 token 用量 (prompt, completion, total)
    pub fn token_usage(&self) -> Option<(u64, u64, u64)> {
        self.provider.usage().map(|u| u.get())
    }

    /// 执行一轮对话，返回模型最终文本
    ///
    /// `cancel` 被触发时本轮立即中止，已开始的命令被放弃；返回前对话状态总是满足不变量。
    pub async fn submit(
        &mut self,
        user_text: &str,
        cancel: CancellationToken,
    ) -> Result<String, AgentError> {
        self.state.push_user(user_text);
        tracing::info!(provider = self.provider.name(), turns = self.state.len(), "submit");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
            r = self.run_turn(&cancel) => r,
        };

        if let Err(e) = &result {
            let cancelled = self.recovery.recover(&mut self.state);
            tracing::warn!(error = %e, cancelled, "turn ended without a final answer");
        }
        result
    }

    /// 会话结束时释放沙箱（幂等）
    pub async fn shutdown(&mut self) {
        self.sandbox.teardown().await;
        if let Some((prompt, completion, total)) = self.token_usage() {
            tracing::info!(provider = self.provider.name(), prompt, completion, total, "session token usage");
        }
    }

    async fn run_turn(&mut self, cancel: &CancellationToken) -> Result<String, AgentError> {
        let mut reflections = ReflectionBudget::new(self.config.retry.reflection_attempts);
        let specs = self.invoker.specs();

        loop {
            self.state.validate()?;

            let response = match self.call_model(&specs, cancel).await {
                Ok(response) => response,
                Err(ModelCallError::Fatal(e)) => return Err(e),
                Err(ModelCallError::Malformed(detail)) => {
                    if !reflections.try_consume() {
                        return Err(AgentError::ReflectionExhausted {
                            attempts: reflections.limit(),
                            detail,
                        });
                    }
                    tracing::warn!(reflection = reflections.used(), detail = %detail, "provider rejected tool call, reflecting");
                    self.state.push_user(format!(
                        "Your previous tool call was rejected by the API: {detail}. \
                         Emit tool calls whose arguments match the declared schemas (reflection {}/{}).",
                        reflections.used(),
                        reflections.limit()
                    ));
                    self.policy.wait(self.config.retry.reflection_delay, cancel).await?;
                    continue;
                }
            };

            if response.tool_calls.is_empty() {
                self.state.push_assistant(response.text.clone(), Vec::new());
                return Ok(response.text);
            }

            if !response.text.trim().is_empty() {
                self.ui.render(&response.text);
            }
            let calls = normalize_calls(response.tool_calls);
            self.state.push_assistant(response.text, calls.clone());

            // 顺序执行，不并行
            let mut results = Vec::with_capacity(calls.len());
            for call in &calls {
                self.ui.notice(&format!("-> {} {}", call.name, call.arguments));
                let mut ctx = InvokeContext {
                    sandbox: &mut self.sandbox,
                    ui: self.ui.as_ref(),
                    reflections: &mut reflections,
                    cancel,
                };
                results.push(self.invoker.invoke(call, &mut ctx).await);
            }

            let sandbox_failure = first_of_kind(&results, ErrorKind::ResourceUnavailable);
            let reflected = first_of_kind(&results, ErrorKind::MalformedOutput).is_some();
            self.state.push_results(results)?;

            if let Some(detail) = sandbox_failure {
                return Err(AgentError::SandboxUnavailable(detail));
            }
            if let Some(detail) = reflections.exhausted() {
                return Err(AgentError::ReflectionExhausted {
                    attempts: reflections.limit(),
                    detail: detail.to_string(),
                });
            }
            if reflected {
                self.policy.wait(self.config.retry.reflection_delay, cancel).await?;
            }
        }
    }

    /// 调用模型；可重试的失败按 RetryPolicy 退避重试（模型调用视为幂等）
    async fn call_model(
        &self,
        specs: &[ToolSpec],
        cancel: &CancellationToken,
    ) -> Result<ModelResponse, ModelCallError> {
        let mut retry = self.policy.begin();
        loop {
            let failure = match self.provider.submit(&self.state, specs).await {
                Ok(response) => return Ok(response),
                Err(failure) => failure,
            };
            match self.policy.decide(&mut retry, &failure, true) {
                RetryDecision::Retry { delay } => {
                    tracing::warn!(
                        attempt = retry.attempt,
                        delay_ms = delay.as_millis() as u64,
                        failure = %failure,
                        "retrying model call"
                    );
                    self.ui.notice(&format!(
                        "model call failed ({failure}), retrying in {:.1}s",
                        delay.as_secs_f64()
                    ));
                    self.policy
                        .wait(delay, cancel)
                        .await
                        .map_err(ModelCallError::Fatal)?;
                }
                RetryDecision::GiveUp(GiveUp::Malformed) => {
                    return Err(ModelCallError::Malformed(failure.detail().to_string()))
                }
                RetryDecision::GiveUp(reason) => {
                    let status = failure.status();
                    let detail = give_up_message(&failure, reason, retry.attempt);
                    tracing::error!(?reason, attempts = retry.attempt, failure = %failure, "model call failed");
                    let err = match retry.classification {
                        Some(Classification::RetryableTransient) => {
                            AgentError::ProviderExhausted { status, detail }
                        }
                        _ => AgentError::ProviderRejected { status, detail },
                    };
                    return Err(ModelCallError::Fatal(err));
                }
            }
        }
    }
}

/// 缺失或重复的调用 id 替换为新 id，保证结果批次可以一一对应
fn normalize_calls(calls: Vec<ToolCall>) -> Vec<ToolCall> {
    let mut seen = std::collections::HashSet::new();
    calls
        .into_iter()
        .map(|call| {
            let id = if call.id.is_empty() || seen.contains(&call.id) {
                format!("call_{}", uuid::Uuid::new_v4().simple())
            } else {
                call.id
            };
            seen.insert(id.clone());
            ToolCall::new(id, call.name, call.arguments)
        })
        .collect()
}

fn first_of_kind(results: &[ToolResult], kind: ErrorKind) -> Option<String> {
    results
        .iter()
        .find(|r| r.error_kind() == Some(kind))
        .map(|r| r.render())
}
