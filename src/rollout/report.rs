use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::outcome::{OutcomeStatus, RolloutOutcome, Stage};
use crate::config::{ClusterTopology, OsFamily};
use crate::provision::{ArtifactSet, NodeIdentityMap, ProvisioningError};

/// An API user whose certificate could not be issued
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserCertFailure {
    pub user: String,
    pub detail: String,
}

impl From<&ProvisioningError> for UserCertFailure {
    fn from(e: &ProvisioningError) -> Self {
        Self {
            user: e.owner().to_string(),
            detail: e.to_string(),
        }
    }
}

/// Aggregate result of one rollout run
#[derive(Debug, Clone, Serialize)]
pub struct RolloutReport {
    pub cluster_name: String,
    pub os: OsFamily,
    pub control_node: String,
    pub total_agents: usize,
    pub plugin_source: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub artifacts: ArtifactSet,
    pub identities: NodeIdentityMap,
    pub user_failures: Vec<UserCertFailure>,
    pub outcomes: Vec<RolloutOutcome>,
}

impl RolloutReport {
    pub fn new(topology: &ClusterTopology, plugin_source: impl Into<String>) -> Self {
        Self {
            cluster_name: topology.cluster_name.clone(),
            os: topology.os,
            control_node: topology.control_node.public_address.clone(),
            total_agents: topology.agent_count(),
            plugin_source: plugin_source.into(),
            started_at: Utc::now(),
            finished_at: None,
            artifacts: ArtifactSet::default(),
            identities: NodeIdentityMap::default(),
            user_failures: Vec::new(),
            outcomes: Vec::new(),
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn record(&mut self, outcomes: impl IntoIterator<Item = RolloutOutcome>) {
        self.outcomes.extend(outcomes);
    }

    /// Failed outcomes, in the order they were recorded
    pub fn failures(&self) -> impl Iterator<Item = &RolloutOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Failed)
    }

    /// Every failed (node, stage) pair
    pub fn failed_pairs(&self) -> Vec<(String, Stage)> {
        self.failures()
            .map(|o| (o.node.public_address.clone(), o.stage))
            .collect()
    }

    /// Failure count for every stage that ran, including zeros
    pub fn failure_counts(&self) -> BTreeMap<Stage, usize> {
        let mut counts = BTreeMap::new();
        for outcome in &self.outcomes {
            let entry = counts.entry(outcome.stage).or_insert(0);
            if outcome.status == OutcomeStatus::Failed {
                *entry += 1;
            }
        }
        counts
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count() + self.user_failures.len()
    }

    pub fn outcomes_for(&self, node: &str) -> impl Iterator<Item = &RolloutOutcome> {
        let node = node.to_string();
        self.outcomes
            .iter()
            .filter(move |o| o.node.public_address == node)
    }

    pub fn stage_ran(&self, stage: Stage) -> bool {
        self.outcomes.iter().any(|o| o.stage == stage)
    }

    pub fn is_success(&self) -> bool {
        self.failure_count() == 0
    }
}
