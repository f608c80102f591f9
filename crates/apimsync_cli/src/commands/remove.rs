//! Remove command implementation.

use super::{print_failures, print_json, CliError, FailureRow, Workspace};
use serde::Serialize;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RemoveOutput {
    deleted: Vec<String>,
    certificates_removed: Vec<String>,
    failures: Vec<FailureRow>,
}

/// Runs the remove command and saves the resulting platform state.
pub async fn run(workspace: &Workspace, format: &str) -> Result<(), CliError> {
    let reconciler = workspace.reconciler();
    let result = reconciler.remove(&workspace.manifest.apidefs).await;
    workspace.save()?;
    let report = result?;

    match format {
        "json" => print_json(&RemoveOutput {
            deleted: report.deleted.iter().map(ToString::to_string).collect(),
            certificates_removed: report.certificates_removed.clone(),
            failures: report.failures.iter().map(FailureRow::from).collect(),
        }),
        _ => {
            println!("Removed {} API(s)", report.deleted.len());
            for identity in &report.deleted {
                println!("  - {identity}");
            }
            println!("Removed {} certificate(s)", report.certificates_removed.len());
            for alias in &report.certificates_removed {
                println!("  - {alias}");
            }
            print_failures(&report.failures);
        }
    }

    if report.is_complete() {
        Ok(())
    } else {
        Err(CliError::Incomplete(report.failures.len()))
    }
}
