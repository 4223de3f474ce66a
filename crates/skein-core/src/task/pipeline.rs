//! Ordered node sequences and their structural checks

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{Node, TaskType};
use crate::error::{Error, Result};

/// Ordered sequence of tasks and branch tasks.
///
/// Cloning is cheap; clones share the same node storage, which is also how
/// the runner recognises a pipeline it is already evaluating.
#[derive(Debug, Clone)]
pub struct Pipeline {
    nodes: Arc<[Node]>,
}

impl Pipeline {
    /// Build a pipeline from nodes, in order
    pub fn new<I, N>(nodes: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<Node>,
    {
        Self {
            nodes: nodes.into_iter().map(Into::into).collect(),
        }
    }

    /// Number of nodes at this level
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether this level has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node at `index`
    pub fn get(&self, index: usize) -> Option<&Node> {
        self.nodes.get(index)
    }

    /// Iterate nodes in order
    pub fn iter(&self) -> std::slice::Iter<'_, Node> {
        self.nodes.iter()
    }

    /// Whether both handles point at the same node storage
    pub fn same_as(&self, other: &Pipeline) -> bool {
        Arc::ptr_eq(&self.nodes, &other.nodes)
    }

    /// Check the pipeline can be registered.
    ///
    /// The top level must contain at least one node, and no branch may lead
    /// back into a pipeline on its own path from the root.
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.is_empty() {
            return Err(Error::EmptyPipeline(name.to_string()));
        }

        // Depth-first walk with an explicit stack. Each entry carries the
        // chain of pipelines from the root down to it.
        let mut stack: Vec<(Pipeline, Vec<Pipeline>)> = vec![(self.clone(), Vec::new())];
        while let Some((pipeline, ancestors)) = stack.pop() {
            for node in pipeline.iter() {
                let Node::Branch(branch) = node else {
                    continue;
                };
                for (branch_name, child) in branch.branches() {
                    if child.same_as(&pipeline) || ancestors.iter().any(|a| a.same_as(child)) {
                        return Err(Error::BranchCycle(format!(
                            "{}.{}",
                            branch.name(),
                            branch_name
                        )));
                    }
                    let mut path = ancestors.clone();
                    path.push(pipeline.clone());
                    stack.push((child.clone(), path));
                }
            }
        }

        Ok(())
    }

    /// Serializable description of the pipeline structure
    pub fn describe(&self) -> Vec<NodeSnapshot> {
        self.iter().map(NodeSnapshot::from_node).collect()
    }
}

impl<'a> IntoIterator for &'a Pipeline {
    type Item = &'a Node;
    type IntoIter = std::slice::Iter<'a, Node>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Structure of one node, as reported by scheduler snapshots
#[derive(Debug, Clone, Serialize)]
pub struct NodeSnapshot {
    /// Node name
    pub name: String,
    /// Node kind
    #[serde(rename = "type")]
    pub task_type: TaskType,
    /// Wrapped execution name
    pub execution_name: String,
    /// Branch pipelines, for branch tasks
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub branches: BTreeMap<String, Vec<NodeSnapshot>>,
}

impl NodeSnapshot {
    fn from_node(node: &Node) -> Self {
        let branches = match node {
            Node::Task(_) => BTreeMap::new(),
            Node::Branch(branch) => branch
                .branches()
                .iter()
                .map(|(name, pipeline)| (name.clone(), pipeline.describe()))
                .collect(),
        };
        Self {
            name: node.name().to_string(),
            task_type: node.task_type(),
            execution_name: node.execution_name().to_string(),
            branches,
        }
    }
}
