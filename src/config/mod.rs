pub mod settings;
pub mod topology;

pub use settings::{RolloutSettings, UserCertPolicy};
pub use topology::{
    parse_topology, validate_topology, ClusterTopology, NodeRef, OsFamily, TopologyError,
};

use std::path::Path;
use thiserror::Error;

/// Errors for file I/O operations (separate from pure parsing errors)
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Topology error: {0}")]
    TopologyError(#[from] TopologyError),
}

// ============================================================================
// SBIO: I/O wrapper - thin layer over pure functions
// ============================================================================

/// Load and validate a topology file from disk.
/// This is the I/O boundary - it reads the file and delegates to pure parsing functions.
pub fn load_topology_file(path: &Path) -> Result<ClusterTopology, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let topology = parse_topology(&content)?;
    Ok(topology)
}
