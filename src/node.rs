use serde::{Deserialize, Serialize};

/// Reserved capacities of a node, used as percentage denominators.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeResources {
    /// Same unit as the CPU ticks reported in frames.
    pub cpu: Option<f64>,
    /// MiB.
    pub memory: Option<f64>,
    pub gpu_memory: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(default)]
    pub resources: NodeResources,
}

impl Node {
    pub fn new(id: impl Into<String>, resources: NodeResources) -> Self {
        Self {
            id: id.into(),
            resources,
        }
    }

    /// Request target for this node's stats frame.
    pub fn stats_url(&self) -> String {
        format!("/v1/client/stats?node_id={}", self.id)
    }
}
