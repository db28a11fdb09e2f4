//! Certificate authority tool wrapper
//!
//! The CA tool keeps its state in the work directory and must be driven
//! serially. Node certificates are named by an identifier the tool picks,
//! which is recovered from its confirmation line:
//!
//! ```text
//! Created 8eab4b8d-c0a2-4ce2-80aa-0709277a9a7a.crt. Copy it over to ...
//! ```

use std::path::{Path, PathBuf};

use regex::Regex;
use thiserror::Error;
use uuid::Uuid;

use super::{naming, ArtifactKind, IdentityArtifact, ProvisioningError};
use crate::transport::SharedTransport;

/// The CA tool printed something other than the confirmation line
#[derive(Error, Debug, PartialEq)]
#[error("expected 'Created <uuid>.crt.' confirmation, got {output:?}")]
pub struct CaOutputError {
    pub output: String,
}

/// Extract the generated certificate identifier from the tool output.
/// This is a pure function - no I/O.
pub fn parse_node_certificate_output(output: &str) -> Result<Uuid, CaOutputError> {
    let invalid = || CaOutputError {
        output: output.to_string(),
    };

    let pattern = Regex::new(r"(?m)^\s*Created ([0-9A-Fa-f-]{36})\.crt\.").map_err(|_| invalid())?;
    let caps = pattern.captures(output).ok_or_else(invalid)?;
    let id = caps.get(1).ok_or_else(invalid)?.as_str();

    Uuid::parse_str(id).map_err(|_| invalid())
}

pub struct CaTool {
    transport: SharedTransport,
    program: String,
    work_dir: PathBuf,
}

impl CaTool {
    pub fn new(
        transport: SharedTransport,
        program: impl Into<String>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            transport,
            program: program.into(),
            work_dir: work_dir.into(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    async fn invoke(
        &self,
        kind: ArtifactKind,
        owner: &str,
        args: &[&str],
    ) -> Result<String, ProvisioningError> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        self.transport
            .run_local(&self.program, &args, &self.work_dir)
            .await
            .map_err(|source| ProvisioningError::Invocation {
                kind,
                owner: owner.to_string(),
                source,
            })
    }

    fn artifact(
        &self,
        kind: ArtifactKind,
        owner: &str,
        cert: String,
        key: Option<String>,
    ) -> IdentityArtifact {
        IdentityArtifact {
            kind,
            owner_key: owner.to_string(),
            cert_path: self.work_dir.join(cert),
            key_path: key.map(|k| self.work_dir.join(k)),
        }
    }

    /// Create the cluster CA. Produces `cluster.crt`; the CA key never leaves
    /// the work directory.
    pub async fn initialize(
        &self,
        cluster_name: &str,
    ) -> Result<IdentityArtifact, ProvisioningError> {
        self.invoke(ArtifactKind::Cluster, cluster_name, &["initialize", cluster_name])
            .await?;
        Ok(self.artifact(
            ArtifactKind::Cluster,
            cluster_name,
            naming::CLUSTER_CERT.to_string(),
            None,
        ))
    }

    pub async fn create_control_certificate(
        &self,
        address: &str,
    ) -> Result<IdentityArtifact, ProvisioningError> {
        self.invoke(
            ArtifactKind::Control,
            address,
            &["create-control-certificate", address],
        )
        .await?;
        let (cert, key) = naming::control_files(address);
        Ok(self.artifact(ArtifactKind::Control, address, cert, Some(key)))
    }

    /// Issue a node certificate for the agent at `owner` and return the
    /// identifier the tool assigned to it.
    pub async fn create_node_certificate(
        &self,
        owner: &str,
    ) -> Result<(Uuid, IdentityArtifact), ProvisioningError> {
        let output = self
            .invoke(ArtifactKind::Node, owner, &["create-node-certificate"])
            .await?;

        let id = parse_node_certificate_output(&output).map_err(|e| {
            ProvisioningError::UnexpectedOutput {
                kind: ArtifactKind::Node,
                owner: owner.to_string(),
                output: e.output,
            }
        })?;

        let (cert, key) = naming::node_files(&id);
        Ok((id, self.artifact(ArtifactKind::Node, owner, cert, Some(key))))
    }

    pub async fn create_api_certificate(
        &self,
        user: &str,
    ) -> Result<IdentityArtifact, ProvisioningError> {
        self.invoke(ArtifactKind::ApiUser, user, &["create-api-certificate", user])
            .await?;
        let (cert, key) = naming::user_files(user);
        Ok(self.artifact(ArtifactKind::ApiUser, user, cert, Some(key)))
    }

    /// Plugin certificates are API certificates named after the agent, so
    /// concurrent uploads never read each other's files.
    pub async fn create_plugin_certificate(
        &self,
        public_address: &str,
    ) -> Result<IdentityArtifact, ProvisioningError> {
        let name = naming::plugin_name(public_address);
        self.invoke(
            ArtifactKind::Plugin,
            public_address,
            &["create-api-certificate", &name],
        )
        .await?;
        let (cert, key) = naming::plugin_files(public_address);
        Ok(self.artifact(ArtifactKind::Plugin, public_address, cert, Some(key)))
    }
}
