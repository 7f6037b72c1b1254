//! 执行层：计划执行器与重试策略

pub mod executor;
pub mod retry;

pub use executor::{ExecutionResult, ExecutionStatus, Executor, ToolRecord};
pub use retry::RetryPolicy;
