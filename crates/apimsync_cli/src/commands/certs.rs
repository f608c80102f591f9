//! Certs command implementation.

use super::{print_json, CliError, Workspace};
use apimsync_core::CertificateTable;
use serde::Serialize;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CertificateRow {
    name: String,
    version: String,
    alias: String,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    valid_until: Option<String>,
}

/// Runs the certs command. Nothing is changed on the platform.
pub async fn run(workspace: &Workspace, format: &str) -> Result<(), CliError> {
    let reconciler = workspace.reconciler();
    let statuses = reconciler
        .certificates(&workspace.manifest.apidefs)
        .await?;

    match format {
        "json" => {
            let rows: Vec<CertificateRow> = statuses
                .iter()
                .map(|s| CertificateRow {
                    name: s.identity.name.clone(),
                    version: s.identity.version.clone(),
                    alias: s.alias.clone(),
                    status: s.status.clone(),
                    valid_until: s.valid_until.clone(),
                })
                .collect();
            print_json(&rows);
        }
        _ => {
            println!("Backend Certificates");
            println!("====================");
            print!("{}", CertificateTable(&statuses));
        }
    }

    Ok(())
}
