//! Plain-text tables of pass results.

use crate::certificate::CertificateStatus;
use crate::model::DeploymentStatusEntry;
use std::fmt;

const EMPTY_CELL: &str = "-";

/// Table of deployment status entries, one row per definition.
///
/// Entries that matched more than one remote resource are listed below the
/// table with the ids that were ignored.
#[derive(Debug, Clone, Copy)]
pub struct StatusTable<'a>(pub &'a [DeploymentStatusEntry]);

impl fmt::Display for StatusTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows: Vec<Vec<String>> = self
            .0
            .iter()
            .map(|entry| {
                vec![
                    entry.definition.name.clone(),
                    entry.definition.version.clone(),
                    entry.definition.root_context.clone(),
                    entry.status.to_string(),
                    cell(entry.remote_id.as_deref()),
                    cell(entry.invokable_url.as_deref()),
                ]
            })
            .collect();
        render(
            f,
            &["name", "version", "context", "status", "remote id", "invokable url"],
            &rows,
        )?;

        for entry in self.0.iter().filter(|e| e.is_ambiguous()) {
            writeln!(
                f,
                "! {} {} matches {} remote APIs, using {} and ignoring {}",
                entry.definition.name,
                entry.definition.version,
                entry.ignored_duplicates.len() + 1,
                cell(entry.remote_id.as_deref()),
                entry.ignored_duplicates.join(", ")
            )?;
        }
        Ok(())
    }
}

/// Table of certificate statuses.
#[derive(Debug, Clone, Copy)]
pub struct CertificateTable<'a>(pub &'a [CertificateStatus]);

impl fmt::Display for CertificateTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows: Vec<Vec<String>> = self
            .0
            .iter()
            .map(|status| {
                vec![
                    status.identity.name.clone(),
                    status.identity.version.clone(),
                    status.alias.clone(),
                    status.status.clone(),
                    cell(status.valid_until.as_deref()),
                ]
            })
            .collect();
        render(f, &["name", "version", "alias", "status", "valid until"], &rows)
    }
}

fn cell(value: Option<&str>) -> String {
    value.unwrap_or(EMPTY_CELL).to_string()
}

fn render(f: &mut fmt::Formatter<'_>, headers: &[&str], rows: &[Vec<String>]) -> fmt::Result {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (width, value) in widths.iter_mut().zip(row) {
            *width = (*width).max(value.chars().count());
        }
    }

    write_row(f, &widths, headers.iter().copied())?;
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    writeln!(f, "{}", rule.join("-+-"))?;
    for row in rows {
        write_row(f, &widths, row.iter().map(String::as_str))?;
    }
    Ok(())
}

fn write_row<'v>(
    f: &mut fmt::Formatter<'_>,
    widths: &[usize],
    cells: impl Iterator<Item = &'v str>,
) -> fmt::Result {
    let padded: Vec<String> = cells
        .zip(widths)
        .map(|(value, &width)| format!("{value:<width$}"))
        .collect();
    writeln!(f, "{}", padded.join(" | ").trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ApiIdentity;
    use crate::model::{DeployedResource, DesiredApiDefinition, LifecycleState};

    #[test]
    fn status_table_layout() {
        let foo = DesiredApiDefinition::http("Foo", "v1", "/foo", "https://foo");
        let mut published = DeploymentStatusEntry::deployed(
            foo,
            &DeployedResource {
                remote_id: "api-0001".into(),
                name: "Foo".into(),
                version: "v1".into(),
                context: "/foo".into(),
                lifecycle_state: LifecycleState::Published,
            },
        );
        published.invokable_url = Some("https://gw/foo/v1".into());
        let pending = DeploymentStatusEntry::to_be_created(DesiredApiDefinition::http(
            "Orders", "v2", "/orders", "https://orders",
        ));

        let rendered = StatusTable(&[published, pending]).to_string();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(
            lines[0],
            "name   | version | context | status        | remote id | invokable url"
        );
        assert!(lines[1].starts_with("-------+---------+"));
        assert_eq!(
            lines[2],
            "Foo    | v1      | /foo    | PUBLISHED     | api-0001  | https://gw/foo/v1"
        );
        assert_eq!(
            lines[3],
            "Orders | v2      | /orders | TO_BE_CREATED | -         | -"
        );
    }

    #[test]
    fn status_table_lists_ambiguous_matches() {
        let mut entry = DeploymentStatusEntry::deployed(
            DesiredApiDefinition::http("Foo", "v1", "/foo", "https://foo"),
            &DeployedResource {
                remote_id: "api-0001".into(),
                name: "Foo".into(),
                version: "v1".into(),
                context: "/foo".into(),
                lifecycle_state: LifecycleState::Created,
            },
        );
        entry.ignored_duplicates = vec!["api-0002".into(), "api-0003".into()];

        let rendered = StatusTable(&[entry]).to_string();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(
            lines[3],
            "! Foo v1 matches 3 remote APIs, using api-0001 and ignoring api-0002, api-0003"
        );
    }

    #[test]
    fn empty_tables_render_headers() {
        let rendered = StatusTable(&[]).to_string();
        assert_eq!(rendered.lines().count(), 2);

        let certs = [CertificateStatus {
            identity: ApiIdentity::new("Foo", "v1", "/foo"),
            alias: "Foo___v1___0".into(),
            valid_until: None,
            status: "NOT FOUND".into(),
        }];
        let rendered = CertificateTable(&certs).to_string();
        assert!(rendered.lines().nth(2).unwrap().contains("NOT FOUND"));
    }
}
