//! Bee Shell 入口：初始化日志、加载配置、组装会话并运行 REPL。
//!
//! 退出码：正常退出（EOF / 双击 Ctrl+C）为 0，沙箱无法启动为 1。

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use bee_shell::config::load_config;
use bee_shell::core::{InterruptListener, SessionBuilder};
use bee_shell::observability;
use bee_shell::ui::{run_repl, ReplExit, TerminalUi, UserInteraction};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    observability::init();

    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;

    let workspace = cfg.workspace_root();
    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("Failed to create workspace {}", workspace.display()))?;
    let workspace = workspace
        .canonicalize()
        .with_context(|| format!("Failed to resolve workspace {}", workspace.display()))?;

    let ui = Arc::new(TerminalUi::new());
    let mut session = SessionBuilder::new(cfg, workspace.clone()).build(ui.clone());
    let mut interrupts = InterruptListener::install();

    ui.notice(&format!(
        "bee-shell ready in {} (Ctrl+C twice or EOF to exit)",
        workspace.display()
    ));
    let exit = run_repl(&mut session, ui.as_ref(), &mut interrupts).await;
    session.shutdown().await;
    if let Some((prompt, completion, total)) = session.token_usage().filter(|u| u.2 > 0) {
        ui.notice(&format!("tokens used: {total} (prompt {prompt}, completion {completion})"));
    }

    Ok(match exit {
        ReplExit::Clean => ExitCode::SUCCESS,
        ReplExit::SandboxFailure => ExitCode::from(1),
    })
}
