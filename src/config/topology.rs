use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::provision::naming;

/// Errors raised while parsing or validating a cluster topology
#[derive(Error, Debug, PartialEq)]
pub enum TopologyError {
    #[error("Topology parse error: {0}")]
    ParseError(String),

    #[error("Unknown OS family '{0}' (expected ubuntu, centos or coreos)")]
    UnknownOs(String),

    #[error("Missing or empty field: {0}")]
    MissingField(&'static str),

    #[error("Duplicate agent node public address: '{0}'")]
    DuplicateAddress(String),

    #[error("Duplicate user: '{0}'")]
    DuplicateUser(String),

    #[error("User '{user}' would share {file} with the {owner} certificate")]
    ReservedUserName {
        user: String,
        file: String,
        owner: String,
    },
}

/// Operating system family shared by every node in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Ubuntu,
    Centos,
    Coreos,
}

impl OsFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            OsFamily::Ubuntu => "ubuntu",
            OsFamily::Centos => "centos",
            OsFamily::Coreos => "coreos",
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OsFamily {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ubuntu" => Ok(OsFamily::Ubuntu),
            "centos" => Ok(OsFamily::Centos),
            "coreos" => Ok(OsFamily::Coreos),
            _ => Err(TopologyError::UnknownOs(s.to_string())),
        }
    }
}

/// A node addressed by its public (reachable from the operator) and
/// private (reachable from inside the cluster) address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    #[serde(rename = "public")]
    pub public_address: String,
    #[serde(rename = "private")]
    pub private_address: String,
}

impl NodeRef {
    pub fn new(public_address: impl Into<String>, private_address: impl Into<String>) -> Self {
        Self {
            public_address: public_address.into(),
            private_address: private_address.into(),
        }
    }

    /// A node that is addressed the same way from everywhere
    pub fn single(address: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            public_address: address.clone(),
            private_address: address,
        }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.public_address)
    }
}

/// The validated, immutable description of a cluster
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterTopology {
    pub cluster_name: String,
    pub control_node: NodeRef,
    pub agent_nodes: Vec<NodeRef>,
    pub users: Vec<String>,
    pub os: OsFamily,
    /// Uploaded verbatim to every agent; never inspected
    pub agent_config: serde_yaml::Value,
}

impl ClusterTopology {
    pub fn agent_count(&self) -> usize {
        self.agent_nodes.len()
    }

    /// Base URL of the control service API
    pub fn control_service_url(&self, port: u16) -> String {
        format!("https://{}:{}/v1", self.control_node.public_address, port)
    }
}

// ============================================================================
// Raw file shape
// ============================================================================

/// Agents may be written as bare addresses or as public/private pairs
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawAgentNode {
    Address(String),
    Pair {
        public: String,
        #[serde(default)]
        private: Option<String>,
    },
}

impl RawAgentNode {
    fn into_node_ref(self) -> NodeRef {
        match self {
            RawAgentNode::Address(address) => NodeRef::single(address.trim()),
            RawAgentNode::Pair { public, private } => {
                let public = public.trim().to_string();
                let private = private
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .unwrap_or_else(|| public.clone());
                NodeRef::new(public, private)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawTopology {
    #[serde(default)]
    cluster_name: String,
    #[serde(default)]
    control_node: String,
    #[serde(default)]
    agent_nodes: Vec<RawAgentNode>,
    #[serde(default)]
    users: Vec<String>,
    #[serde(default)]
    os: String,
    #[serde(default)]
    agent_config: serde_yaml::Value,
}

// ============================================================================
// SBIO: Pure parsing functions (no I/O)
// ============================================================================

/// Parse a topology document (YAML, and therefore also JSON) and validate it.
pub fn parse_topology(content: &str) -> Result<ClusterTopology, TopologyError> {
    let raw: RawTopology =
        serde_yaml::from_str(content).map_err(|e| TopologyError::ParseError(e.to_string()))?;

    if raw.os.trim().is_empty() {
        return Err(TopologyError::MissingField("os"));
    }
    let os: OsFamily = raw.os.parse()?;

    let topology = ClusterTopology {
        cluster_name: raw.cluster_name.trim().to_string(),
        control_node: NodeRef::single(raw.control_node.trim()),
        agent_nodes: raw
            .agent_nodes
            .into_iter()
            .map(RawAgentNode::into_node_ref)
            .collect(),
        users: raw.users.into_iter().map(|u| u.trim().to_string()).collect(),
        os,
        agent_config: raw.agent_config,
    };

    validate_topology(&topology)?;
    Ok(topology)
}

/// Check the invariants a rollout depends on.
///
/// Local certificate files are named after agent addresses and user names,
/// so a duplicate in either list, or a user named like another owner's
/// file, would make two owners share one file.
pub fn validate_topology(topology: &ClusterTopology) -> Result<(), TopologyError> {
    if topology.cluster_name.is_empty() {
        return Err(TopologyError::MissingField("cluster_name"));
    }

    if topology.control_node.public_address.is_empty() {
        return Err(TopologyError::MissingField("control_node"));
    }

    let mut seen = HashSet::new();
    for node in &topology.agent_nodes {
        if node.public_address.is_empty() {
            return Err(TopologyError::MissingField("agent_nodes[].public"));
        }
        if !seen.insert(node.public_address.as_str()) {
            return Err(TopologyError::DuplicateAddress(node.public_address.clone()));
        }
    }

    let mut seen_users = HashSet::new();
    for user in &topology.users {
        if user.is_empty() {
            return Err(TopologyError::MissingField("users[]"));
        }
        if !seen_users.insert(user.as_str()) {
            return Err(TopologyError::DuplicateUser(user.clone()));
        }
        check_user_name(topology, user)?;
    }

    Ok(())
}

/// Reject a user whose certificate file another owner already writes
fn check_user_name(topology: &ClusterTopology, user: &str) -> Result<(), TopologyError> {
    let (user_crt, _) = naming::user_files(user);
    let reserved = |file: String, owner: String| TopologyError::ReservedUserName {
        user: user.to_string(),
        file,
        owner,
    };

    if user_crt == naming::CLUSTER_CERT {
        return Err(reserved(user_crt, "cluster".to_string()));
    }

    let control = &topology.control_node.public_address;
    if user_crt == naming::control_files(control).0 {
        return Err(reserved(user_crt, format!("control node {}", control)));
    }

    for node in &topology.agent_nodes {
        if user_crt == naming::plugin_files(&node.public_address).0 {
            return Err(reserved(user_crt, format!("plugin of {}", node.public_address)));
        }
    }

    // Node certificates are named by the identifier the CA picks
    if Uuid::parse_str(user).is_ok() {
        return Err(reserved(user_crt, "node".to_string()));
    }

    Ok(())
}
