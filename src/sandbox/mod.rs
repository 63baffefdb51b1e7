//! 沙箱层：隔离执行资源的生命周期（ExecutionSandbox）与后端（本地进程 / Docker）

pub mod backend;
pub mod docker;
pub mod execution;
pub mod local;

pub use backend::{CommandOutput, SandboxBackend, SandboxError};
pub use docker::DockerBackend;
pub use execution::{ExecutionSandbox, SandboxResource, SandboxState};
pub use local::LocalBackend;
