//! List command implementation.

use super::{print_json, CliError, StatusRow, Workspace};
use apimsync_core::StatusTable;

/// Runs the list command. Nothing is changed on the platform.
pub async fn run(workspace: &Workspace, format: &str) -> Result<(), CliError> {
    let reconciler = workspace.reconciler();
    let entries = reconciler.list(&workspace.manifest.apidefs).await?;

    match format {
        "json" => {
            let rows: Vec<StatusRow> = entries.iter().map(StatusRow::from).collect();
            print_json(&rows);
        }
        _ => {
            println!("Deployment Status ({} APIs)", entries.len());
            println!("=================");
            print!("{}", StatusTable(&entries));
        }
    }

    Ok(())
}
