pub mod approval;
pub mod fetch;
pub mod filesystem;
pub mod invoker;
pub mod registry;
pub mod schema;
pub mod shell;

pub use approval::{ApprovalDecision, ApprovalGate, ApprovalResponse, ApprovalScope};
pub use fetch::FetchTool;
pub use filesystem::{CatTool, LsTool, SafeFs};
pub use invoker::{InvokeContext, ToolInvoker};
pub use registry::{RiskClass, Tool, ToolContext, ToolError, ToolRegistry, ToolSpec};
pub use shell::ShellTool;
