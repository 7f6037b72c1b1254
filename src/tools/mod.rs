//! 工具层：Tool trait、注册表、带超时的调用器与内置工具

pub mod doc_write;
pub mod echo;
pub mod fetch;
pub mod invoker;
pub mod registry;

pub use doc_write::DocWriteTool;
pub use echo::EchoTool;
pub use fetch::FetchTool;
pub use invoker::ToolInvoker;
pub use registry::{Tool, ToolRegistry};
