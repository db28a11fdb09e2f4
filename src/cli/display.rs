//! Display formatting for CLI output
//!
//! SBIO pattern: Pure functions that format data for display

use super::commands::ValidationResult;
use crate::config::ClusterTopology;
use crate::provision::{naming, ArtifactKind};
use crate::rollout::{PlannedAction, RolloutReport};

// ============================================================================
// Table formatting helpers
// ============================================================================

/// Format a simple table with headers and rows
pub fn format_table(headers: &[&str], rows: Vec<Vec<String>>) -> String {
    if rows.is_empty() {
        return "Nothing to show.\n".to_string();
    }

    // Calculate column widths
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let mut output = String::new();

    for (i, header) in headers.iter().enumerate() {
        if i > 0 {
            output.push_str("   ");
        }
        output.push_str(&format!(
            "{:width$}",
            header.to_uppercase(),
            width = widths[i]
        ));
    }
    output.push('\n');

    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i > 0 {
                output.push_str("   ");
            }
            if i < widths.len() {
                output.push_str(&format!("{:width$}", cell, width = widths[i]));
            } else {
                output.push_str(cell);
            }
        }
        output.push('\n');
    }

    output
}

// ============================================================================
// Topology display
// ============================================================================

/// Format the nodes of a topology
pub fn format_topology(topology: &ClusterTopology) -> String {
    let mut output = String::new();
    output.push_str(&format!("Cluster:  {}\n", topology.cluster_name));
    output.push_str(&format!("OS:       {}\n\n", topology.os));

    let mut rows = vec![vec![
        "control".to_string(),
        topology.control_node.public_address.clone(),
        topology.control_node.private_address.clone(),
    ]];
    for node in &topology.agent_nodes {
        rows.push(vec![
            "agent".to_string(),
            node.public_address.clone(),
            node.private_address.clone(),
        ]);
    }
    output.push_str(&format_table(&["ROLE", "PUBLIC", "PRIVATE"], rows));

    if !topology.users.is_empty() {
        output.push_str(&format!("\nUsers:    {}\n", topology.users.join(", ")));
    }

    output
}

// ============================================================================
// Validation display
// ============================================================================

/// Format validation result for display
pub fn format_validation_result(result: &ValidationResult, path: &str) -> String {
    let mut output = String::new();

    if result.valid {
        output.push_str(&format!("✓ {} is valid\n\n", path));
        output.push_str(&format!("  Agents: {}\n", result.agents));
        output.push_str(&format!("  Users:  {}\n", result.users));
        if let Some(topology) = &result.topology {
            output.push_str(&format!("  OS:     {}\n", topology.os));
        }
    } else {
        output.push_str(&format!("✗ {} is invalid\n\n", path));
        if let Some(ref error) = result.error {
            output.push_str(&format!("  Error: {}\n", error));
        }
    }

    output
}

// ============================================================================
// Dry-run display
// ============================================================================

/// Format the planned actions of a dry run
pub fn format_plan(topology: &ClusterTopology, plan: &[PlannedAction]) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "clusterup v{} - Dry Run Mode\n\n",
        env!("CARGO_PKG_VERSION")
    ));
    output.push_str(&format_topology(topology));
    output.push('\n');

    let rows: Vec<Vec<String>> = plan
        .iter()
        .map(|a| vec![a.phase.to_string(), a.node.clone(), a.action.clone()])
        .collect();
    output.push_str(&format_table(&["PHASE", "NODE", "ACTION"], rows));

    output.push_str("\nRemove --dry-run to execute.\n");
    output
}

// ============================================================================
// Report display
// ============================================================================

/// Format the aggregate report of a run
pub fn format_report(report: &RolloutReport) -> String {
    let mut output = String::new();

    output.push_str("Rollout Report\n");
    output.push_str("==============\n\n");
    output.push_str(&format!("Cluster:   {} ({})\n", report.cluster_name, report.os));
    output.push_str(&format!("Control:   {}\n", report.control_node));
    output.push_str(&format!("Agents:    {}\n", report.total_agents));
    output.push_str(&format!("Plugin:    {}\n", report.plugin_source));
    if let Some(finished) = report.finished_at {
        let elapsed = finished - report.started_at;
        output.push_str(&format!(
            "Duration:  {}.{:03}s\n",
            elapsed.num_seconds(),
            elapsed.num_milliseconds().rem_euclid(1000)
        ));
    }

    if !report.artifacts.is_empty() {
        output.push('\n');
        output.push_str(&format_identity_summary(report));
    }

    let counts = report.failure_counts();
    if !counts.is_empty() {
        output.push_str("\nStages:\n");
        let rows: Vec<Vec<String>> = counts
            .iter()
            .map(|(stage, failed)| {
                let total = report.outcomes.iter().filter(|o| o.stage == *stage).count();
                vec![
                    stage.to_string(),
                    format!("{}/{}", total - failed, total),
                    failed.to_string(),
                ]
            })
            .collect();
        output.push_str(&format_table(&["STAGE", "OK", "FAILED"], rows));
    }

    let failures: Vec<Vec<String>> = report
        .failures()
        .map(|o| vec![o.node.public_address.clone(), o.stage.to_string(), o.detail.clone()])
        .collect();
    if !failures.is_empty() {
        output.push_str("\nFailures:\n");
        output.push_str(&format_table(&["NODE", "STAGE", "DETAIL"], failures));
    }

    if !report.user_failures.is_empty() {
        output.push_str("\nUser certificates not issued:\n");
        for failure in &report.user_failures {
            output.push_str(&format!("  - {}: {}\n", failure.user, failure.detail));
        }
    }

    output.push('\n');
    if report.is_success() {
        output.push_str("Result: SUCCESS\n");
    } else {
        output.push_str(&format!("Result: {} failure(s)\n", report.failure_count()));
    }

    output
}

/// Format the generated identities
pub fn format_identity_summary(report: &RolloutReport) -> String {
    let mut output = String::new();
    output.push_str("Certificates:\n");
    for kind in [
        ArtifactKind::Cluster,
        ArtifactKind::Control,
        ArtifactKind::Node,
        ArtifactKind::ApiUser,
        ArtifactKind::Plugin,
    ] {
        let count = report.artifacts.count(kind);
        if count > 0 {
            output.push_str(&format!("  {:<10} {}\n", kind.to_string(), count));
        }
    }

    if !report.identities.is_empty() {
        output.push_str("\nNode identities:\n");
        let rows: Vec<Vec<String>> = report
            .identities
            .iter()
            .map(|(node, id)| vec![node.clone(), id.to_string()])
            .collect();
        output.push_str(&format_table(&["NODE", "UUID"], rows));
    }

    output
}

/// A command that checks the control service with the first issued user
/// certificate. `None` when the run failed or issued no user certificate.
pub fn format_connectivity_hint(report: &RolloutReport, control_port: u16) -> Option<String> {
    if !report.is_success() {
        return None;
    }
    let user = report.artifacts.of_kind(ArtifactKind::ApiUser).next()?;
    let (crt, key) = naming::user_files(&user.owner_key);
    Some(format!(
        "To verify the control service:\n  curl --cacert $PWD/{} --cert $PWD/{} --key $PWD/{} https://{}:{}/v1/state/nodes | jq .\n",
        naming::CLUSTER_CERT,
        crt,
        key,
        report.control_node,
        control_port
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_topology, NodeRef};
    use crate::provision::IdentityArtifact;
    use crate::rollout::{RolloutOutcome, Stage, UserCertFailure};
    use std::path::PathBuf;

    fn topology() -> ClusterTopology {
        parse_topology(
            "cluster_name: demo\ncontrol_node: 10.0.0.10\nagent_nodes: [10.0.0.1, 10.0.0.2]\nusers: [alice]\nos: ubuntu\n",
        )
        .unwrap()
    }

    #[test]
    fn test_format_table() {
        let headers = &["NODE", "STAGE"];
        let rows = vec![
            vec!["10.0.0.1".to_string(), "certUpload".to_string()],
            vec!["10.0.0.2".to_string(), "pluginInstall".to_string()],
        ];

        let output = format_table(headers, rows);
        assert!(output.contains("NODE"));
        assert!(output.contains("10.0.0.1"));
        assert!(output.contains("pluginInstall"));
    }

    #[test]
    fn test_format_table_empty() {
        let output = format_table(&["NODE"], vec![]);
        assert!(output.contains("Nothing to show"));
    }

    #[test]
    fn test_format_topology() {
        let output = format_topology(&topology());
        assert!(output.contains("control"));
        assert!(output.contains("10.0.0.2"));
        assert!(output.contains("alice"));
    }

    #[test]
    fn test_format_validation_valid() {
        let result = ValidationResult {
            valid: true,
            agents: 2,
            users: 1,
            topology: Some(topology()),
            error: None,
        };

        let output = format_validation_result(&result, "cluster.yml");
        assert!(output.contains("✓"));
        assert!(output.contains("Agents: 2"));
        assert!(output.contains("ubuntu"));
    }

    #[test]
    fn test_format_validation_invalid() {
        let result = ValidationResult {
            valid: false,
            agents: 0,
            users: 0,
            topology: None,
            error: Some("Unknown OS family: windows".to_string()),
        };

        let output = format_validation_result(&result, "cluster.yml");
        assert!(output.contains("✗"));
        assert!(output.contains("windows"));
    }

    #[test]
    fn test_format_plan() {
        let plan = vec![PlannedAction {
            phase: "pluginInstall",
            node: "10.0.0.1".to_string(),
            action: "apt-get install -y clusterhq-flocker-docker-plugin".to_string(),
        }];
        let output = format_plan(&topology(), &plan);
        assert!(output.contains("Dry Run"));
        assert!(output.contains("pluginInstall"));
        assert!(output.contains("--dry-run"));
    }

    #[test]
    fn test_format_report_with_failures() {
        let a = NodeRef::single("10.0.0.1");
        let b = NodeRef::single("10.0.0.2");
        let mut report = RolloutReport::new(&topology(), "repo@master");
        report.record(vec![
            RolloutOutcome::ok(&a, Stage::CertUpload, ""),
            RolloutOutcome::failed(&b, Stage::CertUpload, "connection refused"),
        ]);
        report.user_failures.push(UserCertFailure {
            user: "alice".to_string(),
            detail: "bad output".to_string(),
        });
        report.finish();

        let output = format_report(&report);
        assert!(output.contains("certUpload"));
        assert!(output.contains("1/2"));
        assert!(output.contains("connection refused"));
        assert!(output.contains("alice: bad output"));
        assert!(output.contains("2 failure(s)"));
    }

    #[test]
    fn test_format_report_success() {
        let report = RolloutReport::new(&topology(), "repo@master");
        let output = format_report(&report);
        assert!(output.contains("SUCCESS"));
        assert!(!output.contains("Failures:"));
    }

    #[test]
    fn test_connectivity_hint_needs_user_cert() {
        let mut report = RolloutReport::new(&topology(), "repo@master");
        assert!(format_connectivity_hint(&report, 4523).is_none());

        report.artifacts.push(IdentityArtifact {
            kind: ArtifactKind::ApiUser,
            owner_key: "alice".to_string(),
            cert_path: PathBuf::from("alice.crt"),
            key_path: Some(PathBuf::from("alice.key")),
        });
        let hint = format_connectivity_hint(&report, 4523).unwrap();
        assert!(hint.contains("--cert $PWD/alice.crt"));
        assert!(hint.contains("https://10.0.0.10:4523/v1/state/nodes"));
    }

    #[test]
    fn test_connectivity_hint_only_after_success() {
        let mut report = RolloutReport::new(&topology(), "repo@master");
        report.artifacts.push(IdentityArtifact {
            kind: ArtifactKind::ApiUser,
            owner_key: "alice".to_string(),
            cert_path: PathBuf::from("alice.crt"),
            key_path: Some(PathBuf::from("alice.key")),
        });
        report.record(vec![RolloutOutcome::failed(
            &NodeRef::single("10.0.0.1"),
            Stage::CertUpload,
            "connection refused",
        )]);
        assert!(format_connectivity_hint(&report, 4523).is_none());
    }
}
