//! 中断恢复
//!
//! 用户在 submit() 中途取消后，检查最后一个 Turn：若是带未回答工具调用的 AssistantMessage，
//! 为每个调用合成 Cancelled 结果并作为新的 ToolResultBatch 追加；否则不做任何事（幂等）。
//! 不触碰沙箱：已在运行的命令被放弃（disown），不会被杀死。

use crate::memory::{ConversationState, ToolResult};

pub const INTERRUPTED_BY_USER: &str = "Interrupted by user";

#[derive(Debug, Default)]
pub struct InterruptRecovery;

impl InterruptRecovery {
    pub fn new() -> Self {
        Self
    }

    /// 恢复核心不变量，返回合成的 Cancelled 结果数
    pub fn recover(&self, state: &mut ConversationState) -> usize {
        let outstanding = state.outstanding_call_ids();
        if outstanding.is_empty() {
            return 0;
        }
        let count = outstanding.len();
        let batch = outstanding
            .into_iter()
            .map(|id| ToolResult::cancelled(id, INTERRUPTED_BY_USER))
            .collect();
        if let Err(e) = state.push_results(batch) {
            // 批次由 outstanding_call_ids 构造，key 必然一致
            tracing::error!(error = %e, "interrupt recovery could not attach cancelled results");
            return 0;
        }
        tracing::info!(cancelled = count, "interrupt recovery closed outstanding tool calls");
        count
    }
}
