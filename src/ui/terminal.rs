//! 终端交互实现
//!
//! stdin 在独立线程中按行读取并送入通道，读取本身可以和取消信号竞争；
//! 输出用 crossterm 着色：助手回复、工具提示、确认提示各用一种颜色。

use std::io::{BufRead, Write};

use async_trait::async_trait;
use crossterm::style::Stylize;
use tokio::sync::{mpsc, Mutex};

use crate::ui::UserInteraction;

pub struct TerminalUi {
    lines: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl TerminalUi {
    /// 启动 stdin 读取线程；EOF 或读取错误时通道关闭
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "stdin read failed");
                        break;
                    }
                }
            }
        });
        Self {
            lines: Mutex::new(rx),
        }
    }

    async fn next_line(&self) -> Option<String> {
        self.lines.lock().await.recv().await
    }

    fn prompt(text: &str) {
        let mut out = std::io::stdout();
        let _ = write!(out, "{text}");
        let _ = out.flush();
    }
}

impl Default for TerminalUi {
    fn default() -> Self {
        Self::new()
    }
}

/// y / yes（不区分大小写）视为同意
fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

#[async_trait]
impl UserInteraction for TerminalUi {
    async fn confirm(&self, description: &str) -> bool {
        println!("{}", description.yellow().bold());
        Self::prompt("Allow? [y/N] ");
        match self.next_line().await {
            Some(answer) => is_affirmative(&answer),
            None => false,
        }
    }

    async fn read_input(&self) -> Option<String> {
        Self::prompt(&format!("{} ", ">".green().bold()));
        self.next_line().await
    }

    fn render(&self, text: &str) {
        println!("{}", text.cyan());
    }

    fn notice(&self, text: &str) {
        println!("{}", text.dark_grey());
    }
}
