use std::fmt;

use serde::Serialize;

use crate::config::NodeRef;

/// Per-agent rollout stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    CertDistribution,
    BinaryReplace,
    PluginCert,
    CertUpload,
    PluginInstall,
    PluginLaunch,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::CertDistribution => "certDistribution",
            Stage::BinaryReplace => "binaryReplace",
            Stage::PluginCert => "pluginCert",
            Stage::CertUpload => "certUpload",
            Stage::PluginInstall => "pluginInstall",
            Stage::PluginLaunch => "pluginLaunch",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Ok,
    Failed,
}

/// Result of one stage on one agent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RolloutOutcome {
    pub node: NodeRef,
    pub stage: Stage,
    pub status: OutcomeStatus,
    pub detail: String,
}

impl RolloutOutcome {
    pub fn ok(node: &NodeRef, stage: Stage, detail: impl Into<String>) -> Self {
        Self {
            node: node.clone(),
            stage,
            status: OutcomeStatus::Ok,
            detail: detail.into(),
        }
    }

    pub fn failed(node: &NodeRef, stage: Stage, detail: impl Into<String>) -> Self {
        Self {
            node: node.clone(),
            stage,
            status: OutcomeStatus::Failed,
            detail: detail.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == OutcomeStatus::Ok
    }
}
