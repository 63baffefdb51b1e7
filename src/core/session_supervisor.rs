//! 会话监管：中断监听与空闲时的退出状态机
//!
//! InterruptListener 把 Ctrl+C 转成通道事件；空闲时由 ExitGuard 处理
//! （Idle → ArmedExit → Terminated），submit() 期间则用于取消当前轮。

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

/// 空闲提示符下的退出状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitState {
    Idle,
    /// 再次中断将退出，截止时间之后回到 Idle
    ArmedExit { deadline: Instant },
    Terminated,
}

/// 双击 Ctrl+C 退出
#[derive(Debug)]
pub struct ExitGuard {
    state: ExitState,
    window: Duration,
}

impl ExitGuard {
    pub fn new(window: Duration) -> Self {
        Self {
            state: ExitState::Idle,
            window,
        }
    }

    pub fn state(&self) -> ExitState {
        self.state
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            ExitState::ArmedExit { deadline } => Some(deadline),
            _ => None,
        }
    }

    /// 空闲时收到中断
    pub fn on_interrupt(&mut self, now: Instant) -> ExitState {
        self.state = match self.state {
            ExitState::Idle => ExitState::ArmedExit {
                deadline: now + self.window,
            },
            ExitState::ArmedExit { deadline } if now < deadline => ExitState::Terminated,
            ExitState::ArmedExit { .. } => ExitState::ArmedExit {
                deadline: now + self.window,
            },
            ExitState::Terminated => ExitState::Terminated,
        };
        self.state
    }

    /// 用户提交了输入
    pub fn on_input(&mut self) {
        if matches!(self.state, ExitState::ArmedExit { .. }) {
            self.state = ExitState::Idle;
        }
    }

    /// 截止时间检查
    pub fn on_tick(&mut self, now: Instant) -> ExitState {
        if let ExitState::ArmedExit { deadline } = self.state {
            if now >= deadline {
                self.state = ExitState::Idle;
            }
        }
        self.state
    }
}

/// Ctrl+C 监听：每次信号向通道发送一个事件
pub struct InterruptListener;

impl InterruptListener {
    pub fn install() -> mpsc::UnboundedReceiver<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                if tokio::signal::ctrl_c().await.is_err() {
                    tracing::warn!("Ctrl+C handler unavailable, interrupts disabled");
                    break;
                }
                tracing::debug!("interrupt received");
                if tx.send(()).is_err() {
                    break;
                }
            }
        });
        rx
    }
}
