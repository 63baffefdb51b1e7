//! 核心层：会话主循环、错误分类与重试、中断恢复、退出监管

pub mod builder;
pub mod classifier;
pub mod error;
pub mod recovery;
pub mod retry;
pub mod session;
pub mod session_supervisor;

pub use builder::SessionBuilder;
pub use classifier::{classify, Classification, Classified, Failure, NetworkErrorKind};
pub use error::AgentError;
pub use recovery::{InterruptRecovery, INTERRUPTED_BY_USER};
pub use retry::{ReflectionBudget, RetryConfig, RetryDecision, RetryPolicy};
pub use session::{SessionConfig, SessionLoop};
pub use session_supervisor::{ExitGuard, ExitState, InterruptListener};
