//! 交互层：用户交互抽象（确认 / 读输入 / 渲染）、终端实现与 REPL 主循环

pub mod repl;
pub mod terminal;

use async_trait::async_trait;

pub use repl::{run_repl, ReplExit};
pub use terminal::TerminalUi;

/// 用户交互接口；对会话而言是阻塞的挂起点
#[async_trait]
pub trait UserInteraction: Send + Sync {
    /// 询问是/否；无法读取输入时视为拒绝
    async fn confirm(&self, description: &str) -> bool;

    /// 读取一行输入；EOF 返回 None
    async fn read_input(&self) -> Option<String>;

    /// 渲染助手回复
    fn render(&self, text: &str);

    /// 渲染运行时提示（工具进度、重试、诊断）
    fn notice(&self, text: &str);
}
