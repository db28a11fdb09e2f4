//! Certificate provisioning
//!
//! Drives the CA tool in a fixed order: cluster CA, control certificate,
//! one node certificate per agent, one API certificate per user. Each step
//! needs the files of the previous one, so nothing here runs concurrently.

pub mod ca;

pub use ca::{parse_node_certificate_output, CaOutputError, CaTool};

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{ClusterTopology, UserCertPolicy};
use crate::transport::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ArtifactKind {
    Cluster,
    Control,
    Node,
    ApiUser,
    Plugin,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArtifactKind::Cluster => "cluster",
            ArtifactKind::Control => "control",
            ArtifactKind::Node => "node",
            ArtifactKind::ApiUser => "API user",
            ArtifactKind::Plugin => "plugin",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum ProvisioningError {
    #[error("CA tool failed creating {kind} certificate for {owner}: {source}")]
    Invocation {
        kind: ArtifactKind,
        owner: String,
        #[source]
        source: TransportError,
    },

    #[error("Unexpected CA tool output creating {kind} certificate for {owner}: {output:?}")]
    UnexpectedOutput {
        kind: ArtifactKind,
        owner: String,
        output: String,
    },

    #[error("CA tool issued identifier {id} for {owner}, already assigned to {existing}")]
    DuplicateIdentifier {
        owner: String,
        existing: String,
        id: Uuid,
    },
}

impl ProvisioningError {
    pub fn owner(&self) -> &str {
        match self {
            ProvisioningError::Invocation { owner, .. }
            | ProvisioningError::UnexpectedOutput { owner, .. }
            | ProvisioningError::DuplicateIdentifier { owner, .. } => owner,
        }
    }

    pub fn kind(&self) -> ArtifactKind {
        match self {
            ProvisioningError::Invocation { kind, .. }
            | ProvisioningError::UnexpectedOutput { kind, .. } => *kind,
            ProvisioningError::DuplicateIdentifier { .. } => ArtifactKind::Node,
        }
    }
}

/// A certificate (and, except for the cluster CA, its key) on local disk
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentityArtifact {
    pub kind: ArtifactKind,
    /// Node address or user name
    pub owner_key: String,
    pub cert_path: PathBuf,
    pub key_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ArtifactSet {
    artifacts: Vec<IdentityArtifact>,
}

impl ArtifactSet {
    pub fn push(&mut self, artifact: IdentityArtifact) {
        self.artifacts.push(artifact);
    }

    pub fn iter(&self) -> impl Iterator<Item = &IdentityArtifact> {
        self.artifacts.iter()
    }

    pub fn of_kind(&self, kind: ArtifactKind) -> impl Iterator<Item = &IdentityArtifact> {
        self.artifacts.iter().filter(move |a| a.kind == kind)
    }

    pub fn count(&self, kind: ArtifactKind) -> usize {
        self.of_kind(kind).count()
    }

    pub fn find(&self, kind: ArtifactKind, owner: &str) -> Option<&IdentityArtifact> {
        self.of_kind(kind).find(|a| a.owner_key == owner)
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

/// Agent public address to the identifier of its node certificate
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NodeIdentityMap {
    entries: BTreeMap<String, Uuid>,
}

impl NodeIdentityMap {
    /// Record an identifier, refusing to hand one identifier to two nodes
    pub fn insert(&mut self, node: &str, id: Uuid) -> Result<(), ProvisioningError> {
        if let Some((existing, _)) = self.entries.iter().find(|(_, v)| **v == id) {
            return Err(ProvisioningError::DuplicateIdentifier {
                owner: node.to_string(),
                existing: existing.clone(),
                id,
            });
        }
        self.entries.insert(node.to_string(), id);
        Ok(())
    }

    pub fn get(&self, node: &str) -> Option<&Uuid> {
        self.entries.get(node)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Uuid)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Local file names. Every name is keyed on its owner so files of
/// different owners never collide.
pub mod naming {
    use uuid::Uuid;

    pub const CLUSTER_CERT: &str = "cluster.crt";
    pub const AGENT_CONFIG: &str = "agent.yml";

    pub fn control_files(address: &str) -> (String, String) {
        (
            format!("control-{}.crt", address),
            format!("control-{}.key", address),
        )
    }

    pub fn node_files(id: &Uuid) -> (String, String) {
        (format!("{}.crt", id), format!("{}.key", id))
    }

    pub fn user_files(user: &str) -> (String, String) {
        (format!("{}.crt", user), format!("{}.key", user))
    }

    pub fn plugin_name(public_address: &str) -> String {
        format!("{}-plugin", public_address)
    }

    pub fn plugin_files(public_address: &str) -> (String, String) {
        let name = plugin_name(public_address);
        (format!("{}.crt", name), format!("{}.key", name))
    }
}

/// Everything certificate provisioning produced
#[derive(Debug, Default)]
pub struct Provisioned {
    pub artifacts: ArtifactSet,
    pub identities: NodeIdentityMap,
    /// Users whose API certificate could not be created (collect policy)
    pub user_failures: Vec<ProvisioningError>,
}

/// Generate the cluster, control, node and user certificates.
///
/// Cluster, control and node failures abort. User failures abort or are
/// collected depending on `policy`.
pub async fn provision(
    ca: &CaTool,
    topology: &ClusterTopology,
    policy: UserCertPolicy,
) -> Result<Provisioned, ProvisioningError> {
    let mut provisioned = Provisioned::default();

    let cluster = ca.initialize(&topology.cluster_name).await?;
    provisioned.artifacts.push(cluster);
    info!("Initialized cluster CA '{}'", topology.cluster_name);

    let control = ca
        .create_control_certificate(&topology.control_node.public_address)
        .await?;
    provisioned.artifacts.push(control);
    info!(
        "Created control certificate for {}",
        topology.control_node.public_address
    );

    for node in &topology.agent_nodes {
        let owner = node.public_address.as_str();
        let (id, artifact) = ca.create_node_certificate(owner).await?;
        provisioned.identities.insert(owner, id)?;
        provisioned.artifacts.push(artifact);
        info!("Generated node certificate {} for {}", id, owner);
    }

    for user in &topology.users {
        match ca.create_api_certificate(user).await {
            Ok(artifact) => {
                provisioned.artifacts.push(artifact);
                info!("Created API certificate for user {}", user);
            }
            Err(e) => match policy {
                UserCertPolicy::Abort => return Err(e),
                UserCertPolicy::Collect => {
                    warn!("Failed to create API certificate for user {}: {}", user, e);
                    provisioned.user_failures.push(e);
                }
            },
        }
    }

    Ok(provisioned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(kind: ArtifactKind, owner: &str) -> IdentityArtifact {
        IdentityArtifact {
            kind,
            owner_key: owner.to_string(),
            cert_path: PathBuf::from(format!("{owner}.crt")),
            key_path: None,
        }
    }

    #[test]
    fn test_identity_map_rejects_reused_identifier() {
        let id = Uuid::new_v4();
        let mut map = NodeIdentityMap::default();
        map.insert("10.0.0.1", id).unwrap();

        let err = map.insert("10.0.0.2", id).unwrap_err();
        assert_eq!(err.owner(), "10.0.0.2");
        assert!(matches!(
            err,
            ProvisioningError::DuplicateIdentifier { ref existing, .. } if existing == "10.0.0.1"
        ));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_artifact_set_queries() {
        let mut set = ArtifactSet::default();
        set.push(artifact(ArtifactKind::Cluster, "demo"));
        set.push(artifact(ArtifactKind::ApiUser, "alice"));
        set.push(artifact(ArtifactKind::ApiUser, "bob"));

        assert_eq!(set.len(), 3);
        assert_eq!(set.count(ArtifactKind::ApiUser), 2);
        assert_eq!(set.count(ArtifactKind::Node), 0);
        assert!(set.find(ArtifactKind::ApiUser, "bob").is_some());
        assert!(set.find(ArtifactKind::Cluster, "bob").is_none());
    }

    #[test]
    fn test_file_names_are_keyed_on_owner() {
        assert_eq!(
            naming::control_files("10.0.0.10"),
            ("control-10.0.0.10.crt".to_string(), "control-10.0.0.10.key".to_string())
        );
        assert_eq!(
            naming::plugin_files("10.0.0.1"),
            ("10.0.0.1-plugin.crt".to_string(), "10.0.0.1-plugin.key".to_string())
        );
        assert_eq!(naming::user_files("alice").1, "alice.key");
        let id = Uuid::nil();
        assert_eq!(
            naming::node_files(&id).0,
            "00000000-0000-0000-0000-000000000000.crt"
        );
    }

    #[test]
    fn test_error_names_owner_and_kind() {
        let err = ProvisioningError::UnexpectedOutput {
            kind: ArtifactKind::Node,
            owner: "10.0.0.1".to_string(),
            output: "garbage".to_string(),
        };
        assert_eq!(err.owner(), "10.0.0.1");
        assert_eq!(err.kind(), ArtifactKind::Node);
        assert!(err.to_string().contains("10.0.0.1"));
    }
}
