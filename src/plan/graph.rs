//! 计划依赖图
//!
//! 邻接表 + 入度表表示的 DAG：构造时校验（重复 id、悬空依赖、环——Kahn 拓扑），
//! 执行时查询就绪集、标记完成、计算传递依赖者（失败时整体跳过）。

use std::collections::{HashMap, HashSet, VecDeque};

use thiserror::Error;

use crate::plan::types::Subtask;

/// 图校验错误；Planner 将其映射为 PlanningError::InvalidGraph
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("duplicate subtask id: {0}")]
    DuplicateId(String),

    #[error("subtask {subtask} depends on unknown id: {dependency}")]
    UnknownDependency { subtask: String, dependency: String },

    #[error("dependency cycle involving: {0}")]
    Cycle(String),
}

/// 计划依赖图
pub struct PlanGraph {
    /// 邻接表：子任务 id -> 直接依赖它的子任务
    adjacency: HashMap<String, Vec<String>>,
    /// 入度表：子任务 id -> 未满足的依赖数
    in_degree: HashMap<String, usize>,
}

impl PlanGraph {
    /// 构建并校验依赖图
    pub fn build(steps: &[Subtask]) -> Result<Self, GraphError> {
        let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
        let mut in_degree: HashMap<String, usize> = HashMap::new();

        for step in steps {
            if in_degree.insert(step.id.clone(), 0).is_some() {
                return Err(GraphError::DuplicateId(step.id.clone()));
            }
            adjacency.entry(step.id.clone()).or_default();
        }

        for step in steps {
            let mut seen: HashSet<&str> = HashSet::new();
            for dep in &step.depends_on {
                if !in_degree.contains_key(dep) {
                    return Err(GraphError::UnknownDependency {
                        subtask: step.id.clone(),
                        dependency: dep.clone(),
                    });
                }
                // 同一依赖重复声明只计一次
                if !seen.insert(dep.as_str()) {
                    continue;
                }
                adjacency
                    .entry(dep.clone())
                    .or_default()
                    .push(step.id.clone());
                *in_degree.entry(step.id.clone()).or_insert(0) += 1;
            }
        }

        let graph = Self {
            adjacency,
            in_degree,
        };
        graph.check_acyclic()?;
        Ok(graph)
    }

    /// Kahn 拓扑排序检环：可出队数 < 节点数即存在环
    fn check_acyclic(&self) -> Result<(), GraphError> {
        let mut degrees = self.in_degree.clone();
        let mut queue: VecDeque<String> = degrees
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| id.clone())
            .collect();
        let mut visited = 0usize;

        while let Some(id) = queue.pop_front() {
            visited += 1;
            if let Some(dependents) = self.adjacency.get(&id) {
                for dep in dependents {
                    if let Some(d) = degrees.get_mut(dep) {
                        *d -= 1;
                        if *d == 0 {
                            queue.push_back(dep.clone());
                        }
                    }
                }
            }
        }

        if visited < degrees.len() {
            let mut cyclic: Vec<String> = degrees
                .iter()
                .filter(|(_, d)| **d > 0)
                .map(|(id, _)| id.clone())
                .collect();
            cyclic.sort();
            return Err(GraphError::Cycle(cyclic.join(", ")));
        }
        Ok(())
    }

    /// 当前就绪（入度为 0）的子任务 id
    pub fn ready(&self) -> Vec<String> {
        let mut ready: Vec<String> = self
            .in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| id.clone())
            .collect();
        ready.sort();
        ready
    }

    /// 标记一个子任务成功，返回因此新就绪的子任务 id
    pub fn mark_succeeded(&mut self, id: &str) -> Vec<String> {
        // 从入度表移除，防止已完成节点再次出现在 ready 中
        self.in_degree.remove(id);

        let mut newly_ready = Vec::new();
        if let Some(dependents) = self.adjacency.get(id) {
            for dep in dependents {
                if let Some(d) = self.in_degree.get_mut(dep) {
                    *d -= 1;
                    if *d == 0 {
                        newly_ready.push(dep.clone());
                    }
                }
            }
        }
        newly_ready.sort();
        newly_ready
    }

    /// 直接或间接依赖 id 的全部子任务（失败传播：这些都将被跳过）
    pub fn dependents_transitive(&self, id: &str) -> HashSet<String> {
        let mut result = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(id);
        while let Some(current) = queue.pop_front() {
            if let Some(dependents) = self.adjacency.get(current) {
                for dep in dependents {
                    if result.insert(dep.clone()) {
                        queue.push_back(dep.as_str());
                    }
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::types::SubtaskStatus;

    fn step(id: &str, deps: &[&str]) -> Subtask {
        Subtask {
            id: id.to_string(),
            description: format!("step {}", id),
            tool_name: None,
            inputs: serde_json::json!({}),
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            memory_key: None,
            status: SubtaskStatus::Pending,
        }
    }

    #[test]
    fn test_three_node_cycle_rejected() {
        let steps = vec![step("a", &["c"]), step("b", &["a"]), step("c", &["b"])];
        assert!(matches!(
            PlanGraph::build(&steps),
            Err(GraphError::Cycle(_))
        ));
    }

    #[test]
    fn test_self_cycle_rejected() {
        let steps = vec![step("a", &["a"])];
        assert!(matches!(PlanGraph::build(&steps), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let steps = vec![step("a", &["ghost"])];
        assert!(matches!(
            PlanGraph::build(&steps),
            Err(GraphError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let steps = vec![step("a", &[]), step("a", &[])];
        assert!(matches!(
            PlanGraph::build(&steps),
            Err(GraphError::DuplicateId(_))
        ));
    }

    #[test]
    fn test_ready_and_propagation() {
        let steps = vec![step("a", &[]), step("b", &["a"]), step("c", &["a", "b"])];
        let mut graph = PlanGraph::build(&steps).unwrap();
        assert_eq!(graph.ready(), vec!["a".to_string()]);

        let newly = graph.mark_succeeded("a");
        assert_eq!(newly, vec!["b".to_string()]);

        let newly = graph.mark_succeeded("b");
        assert_eq!(newly, vec!["c".to_string()]);
    }

    #[test]
    fn test_dependents_transitive() {
        let steps = vec![step("a", &[]), step("b", &["a"]), step("c", &["b"])];
        let graph = PlanGraph::build(&steps).unwrap();
        let deps = graph.dependents_transitive("a");
        assert!(deps.contains("b"));
        assert!(deps.contains("c"));
        assert_eq!(deps.len(), 2);
    }

    #[test]
    fn test_independent_steps_all_ready() {
        let steps = vec![step("a", &[]), step("b", &[]), step("c", &[])];
        let graph = PlanGraph::build(&steps).unwrap();
        assert_eq!(graph.ready().len(), 3);
    }
}
