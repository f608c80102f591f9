//! Deploy command implementation.

use super::{print_failures, print_json, CliError, FailureRow, StatusRow, Workspace};
use apimsync_core::StatusTable;
use serde::Serialize;

#[derive(Serialize)]
struct DeployOutput {
    converged: bool,
    entries: Vec<StatusRow>,
    failures: Vec<FailureRow>,
}

/// Runs the deploy command and saves the resulting platform state.
///
/// Fails with [`CliError::Incomplete`] if any definition did not converge.
pub async fn run(workspace: &Workspace, format: &str) -> Result<(), CliError> {
    let reconciler = workspace.reconciler();
    let result = reconciler.deploy(&workspace.manifest.apidefs).await;
    workspace.save()?;
    let report = result?;

    match format {
        "json" => print_json(&DeployOutput {
            converged: report.is_converged(),
            entries: report.entries.iter().map(StatusRow::from).collect(),
            failures: report.failures.iter().map(FailureRow::from).collect(),
        }),
        _ => {
            if report.is_converged() {
                println!("✓ Deployment converged");
            } else {
                println!("✗ Deployment did not converge");
            }
            println!();
            print!("{}", StatusTable(&report.entries));
            print_failures(&report.failures);
        }
    }

    if report.is_converged() {
        Ok(())
    } else {
        Err(CliError::Incomplete(report.failures.len()))
    }
}
