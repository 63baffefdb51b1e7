//! Bee Shell - 带沙箱与审批的命令行助手运行时
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 会话主循环、错误分类与重试、中断恢复、退出监管
//! - **llm**: 模型 provider 抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **memory**: 对话状态与工具调用 / 结果类型
//! - **sandbox**: 会话独占的命令执行沙箱（本地进程 / Docker）
//! - **tools**: 工具注册表、审批闸门、调用器与内置工具（ls、cat、fetch、shell）
//! - **ui**: 用户交互抽象、终端实现与 REPL

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod sandbox;
pub mod tools;
pub mod ui;
