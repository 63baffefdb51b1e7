//! REPL 主循环
//!
//! 空闲时：输入、中断、退出截止时间三者竞争，中断交给 ExitGuard（双击退出）；
//! submit() 期间：中断只取消当前轮，不触发退出状态机。

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, ExitGuard, ExitState, SessionLoop};
use crate::ui::UserInteraction;

/// REPL 退出原因
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplExit {
    /// EOF、exit 命令或双击 Ctrl+C
    Clean,
    /// 沙箱无法启动
    SandboxFailure,
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

pub async fn run_repl(
    session: &mut SessionLoop,
    ui: &dyn UserInteraction,
    interrupts: &mut mpsc::UnboundedReceiver<()>,
) -> ReplExit {
    let window: Duration = session.config().exit_window;
    let mut guard = ExitGuard::new(window);

    loop {
        let input = loop {
            tokio::select! {
                line = ui.read_input() => break line,
                Some(()) = interrupts.recv() => {
                    match guard.on_interrupt(Instant::now()) {
                        ExitState::Terminated => return ReplExit::Clean,
                        ExitState::ArmedExit { .. } => ui.notice(&format!(
                            "Press Ctrl+C again within {}s to exit",
                            window.as_secs_f64()
                        )),
                        ExitState::Idle => {}
                    }
                }
                _ = until(guard.deadline()) => {
                    guard.on_tick(Instant::now());
                }
            }
        };

        let Some(line) = input else {
            tracing::info!("input closed");
            return ReplExit::Clean;
        };
        guard.on_input();
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit" | "/exit" | "/quit") {
            return ReplExit::Clean;
        }

        let cancel = CancellationToken::new();
        let result = {
            let turn = session.submit(line, cancel.clone());
            tokio::pin!(turn);
            loop {
                tokio::select! {
                    r = &mut turn => break r,
                    Some(()) = interrupts.recv() => cancel.cancel(),
                }
            }
        };
        // 本轮期间多余的中断不进入退出状态机
        while interrupts.try_recv().is_ok() {}

        match result {
            Ok(text) => ui.render(&text),
            Err(e @ AgentError::SandboxUnavailable(_)) => {
                tracing::error!(error = %e, "sandbox unavailable, ending session");
                ui.notice(&e.user_message());
                return ReplExit::SandboxFailure;
            }
            Err(e) => ui.notice(&e.user_message()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use crate::core::SessionConfig;
    use crate::llm::MockProvider;
    use crate::sandbox::{ExecutionSandbox, LocalBackend};
    use crate::tools::ToolRegistry;

    #[derive(Default)]
    struct Scripted {
        inputs: Mutex<VecDeque<String>>,
        /// 输入用尽后挂起（而不是 EOF）
        hang: bool,
        rendered: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl UserInteraction for Scripted {
        async fn confirm(&self, _description: &str) -> bool {
            false
        }
        async fn read_input(&self) -> Option<String> {
            let next = self.inputs.lock().unwrap().pop_front();
            match next {
                Some(line) => Some(line),
                None if self.hang => std::future::pending().await,
                None => None,
            }
        }
        fn render(&self, text: &str) {
            self.rendered.lock().unwrap().push(text.to_string());
        }
        fn notice(&self, _text: &str) {}
    }

    fn session(ui: Arc<Scripted>, dir: &tempfile::TempDir) -> SessionLoop {
        SessionLoop::new(
            SessionConfig::default(),
            Arc::new(MockProvider),
            ToolRegistry::new(),
            ExecutionSandbox::new(Box::new(LocalBackend::new()), dir.path()),
            ui,
        )
    }

    #[tokio::test]
    async fn test_eof_exits_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let ui = Arc::new(Scripted {
            inputs: Mutex::new(VecDeque::from(vec!["hello".to_string(), "  ".to_string()])),
            ..Default::default()
        });
        let mut s = session(ui.clone(), &dir);
        let (_tx, mut rx) = mpsc::unbounded_channel();
        assert_eq!(run_repl(&mut s, ui.as_ref(), &mut rx).await, ReplExit::Clean);
        assert_eq!(*ui.rendered.lock().unwrap(), vec!["Echo from Mock: hello"]);
        assert_eq!(s.state().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_interrupt_exits() {
        let dir = tempfile::tempdir().unwrap();
        let ui = Arc::new(Scripted {
            hang: true,
            ..Default::default()
        });
        let mut s = session(ui.clone(), &dir);
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(()).unwrap();
        tx.send(()).unwrap();
        assert_eq!(run_repl(&mut s, ui.as_ref(), &mut rx).await, ReplExit::Clean);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_interrupt_expires() {
        let dir = tempfile::tempdir().unwrap();
        let ui = Arc::new(Scripted {
            hang: true,
            ..Default::default()
        });
        let mut s = session(ui.clone(), &dir);
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(()).unwrap();
        let sender = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            tx.send(()).unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
            tx.send(()).unwrap();
        });
        let start = Instant::now();
        assert_eq!(run_repl(&mut s, ui.as_ref(), &mut rx).await, ReplExit::Clean);
        // 第一次中断在 2s 后失效，之后的两次才退出
        assert!(start.elapsed() >= Duration::from_millis(3500));
        sender.await.unwrap();
    }
}
