//! Node roles
//!
//! The role of a node is assigned externally. Whether it is a serving role
//! decides whether the update stream may run on the node.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Role of the local node, as announced by the role-change source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Master,
    Replica,
    Rdonly,
    Batch,
    Spare,
    Experimental,
    Idle,
    Lag,
    Backup,
    Restore,
    Scrap,
}

impl NodeRole {
    pub const ALL: [NodeRole; 11] = [
        NodeRole::Master,
        NodeRole::Replica,
        NodeRole::Rdonly,
        NodeRole::Batch,
        NodeRole::Spare,
        NodeRole::Experimental,
        NodeRole::Idle,
        NodeRole::Lag,
        NodeRole::Backup,
        NodeRole::Restore,
        NodeRole::Scrap,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Master => "master",
            NodeRole::Replica => "replica",
            NodeRole::Rdonly => "rdonly",
            NodeRole::Batch => "batch",
            NodeRole::Spare => "spare",
            NodeRole::Experimental => "experimental",
            NodeRole::Idle => "idle",
            NodeRole::Lag => "lag",
            NodeRole::Backup => "backup",
            NodeRole::Restore => "restore",
            NodeRole::Scrap => "scrap",
        }
    }

    /// Whether the update stream runs while the node has this role.
    pub fn is_serving(&self) -> bool {
        matches!(
            self,
            NodeRole::Master | NodeRole::Replica | NodeRole::Rdonly | NodeRole::Batch
        )
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for NodeRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        NodeRole::ALL
            .iter()
            .copied()
            .find(|role| role.as_str() == wanted)
            .ok_or_else(|| format!("unknown node role: '{}'", s))
    }
}

/// A role-change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleChange {
    pub role: NodeRole,
}

impl RoleChange {
    pub fn new(role: NodeRole) -> Self {
        Self { role }
    }
}
