//! Dependency graph over a task set.
//!
//! Tasks form a DAG across `parentId` and `depends`. Edges run from the
//! prerequisite (dependency or parent) to the dependent task. References to
//! ids outside the set are ignored here so they do not inflate in-degrees;
//! reporting dangling references is the referential validator's job.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::task::Task;

#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    ids: Vec<String>,
    index: HashMap<String, usize>,
    /// edges[i] = indices that depend on i.
    edges: Vec<Vec<usize>>,
    incoming: Vec<Vec<usize>>,
    parent: Vec<Option<usize>>,
}

impl TaskGraph {
    /// Build the combined parent + depends graph for a task set.
    pub fn build(tasks: &[Task]) -> Self {
        let ids: Vec<String> = tasks.iter().map(|t| t.id.clone()).collect();
        let index: HashMap<String, usize> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();

        let mut edges = vec![Vec::new(); ids.len()];
        let mut incoming = vec![Vec::new(); ids.len()];
        let mut parent = vec![None; ids.len()];

        for (to, task) in tasks.iter().enumerate() {
            for dep in &task.depends {
                // Only in-set edges count.
                if let Some(&from) = index.get(dep) {
                    edges[from].push(to);
                    incoming[to].push(from);
                }
            }
            if let Some(pid) = &task.parent_id {
                if let Some(&from) = index.get(pid) {
                    edges[from].push(to);
                    incoming[to].push(from);
                    parent[to] = Some(from);
                }
            }
        }

        Self {
            ids,
            index,
            edges,
            incoming,
            parent,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn node_count(&self) -> usize {
        self.ids.len()
    }

    /// Kahn's algorithm. Returns the ids still carrying in-degree after the
    /// topological reduction, i.e. the members of at least one cycle.
    pub fn cycle_nodes(&self) -> Option<Vec<String>> {
        let mut indegree: Vec<usize> = self.incoming.iter().map(Vec::len).collect();
        let mut queue: VecDeque<usize> = indegree
            .iter()
            .enumerate()
            .filter_map(|(i, d)| (*d == 0).then_some(i))
            .collect();
        let mut visited = 0usize;

        while let Some(node) = queue.pop_front() {
            visited += 1;
            for &next in &self.edges[node] {
                indegree[next] = indegree[next].saturating_sub(1);
                if indegree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        if visited == self.ids.len() {
            None
        } else {
            Some(
                indegree
                    .iter()
                    .enumerate()
                    .filter_map(|(i, d)| (*d > 0).then(|| self.ids[i].clone()))
                    .collect(),
            )
        }
    }

    pub fn has_cycle(&self) -> bool {
        self.cycle_nodes().is_some()
    }

    /// Topological order of all ids. `Err` carries the cycle members.
    pub fn topological_order(&self) -> Result<Vec<String>, Vec<String>> {
        let mut indegree: Vec<usize> = self.incoming.iter().map(Vec::len).collect();
        let mut queue: VecDeque<usize> = indegree
            .iter()
            .enumerate()
            .filter_map(|(i, d)| (*d == 0).then_some(i))
            .collect();
        let mut order = Vec::with_capacity(self.ids.len());

        while let Some(node) = queue.pop_front() {
            order.push(self.ids[node].clone());
            for &next in &self.edges[node] {
                indegree[next] = indegree[next].saturating_sub(1);
                if indegree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        if order.len() == self.ids.len() {
            Ok(order)
        } else {
            Err(self.cycle_nodes().unwrap_or_default())
        }
    }

    /// Whether `to` is reachable from `from` along prerequisite edges.
    /// Used for incremental cycle checks: adding an edge `x -> t` creates a
    /// cycle iff `x` is already reachable from `t`.
    pub fn path_exists(&self, from: &str, to: &str) -> bool {
        let (Some(&start), Some(&goal)) = (self.index.get(from), self.index.get(to)) else {
            return false;
        };
        if start == goal {
            return true;
        }
        let mut seen = HashSet::new();
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            if node == goal {
                return true;
            }
            if seen.insert(node) {
                stack.extend(self.edges[node].iter().copied());
            }
        }
        false
    }

    /// Hierarchy depth via the parent chain: a root task has depth 1.
    /// Returns `None` for unknown ids or when the parent chain itself
    /// cycles (which a corrupt file can produce).
    pub fn depth_of(&self, id: &str) -> Option<usize> {
        let mut node = *self.index.get(id)?;
        let mut depth = 1;
        let mut hops = 0;
        while let Some(p) = self.parent[node] {
            depth += 1;
            node = p;
            hops += 1;
            if hops > self.ids.len() {
                return None;
            }
        }
        Some(depth)
    }

    /// Direct children of a task in the parent hierarchy.
    pub fn children_of(&self, id: &str) -> Vec<String> {
        let Some(&node) = self.index.get(id) else {
            return Vec::new();
        };
        self.parent
            .iter()
            .enumerate()
            .filter_map(|(i, p)| (*p == Some(node)).then(|| self.ids[i].clone()))
            .collect()
    }
}
