//! 计划层：类型、DAG 图、Planner

pub mod graph;
pub mod planner;
pub mod types;

pub use graph::{GraphError, PlanGraph};
pub use planner::{PlanContext, Planner};
pub use types::{Plan, PlanDraft, StepDraft, Subtask, SubtaskStatus};
