//! Human-facing reports: a Markdown audit trail, an HTML dashboard, a
//! generated README for the output directory, and a secrets-review listing
//! every redaction the pipeline applied.

use std::fmt::Write as _;

use indoc::formatdoc;

use crate::schema::{Severity, Snapshot};

pub fn render_audit_markdown(snapshot: &Snapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Rebuild audit for {}", snapshot.meta.host_root);
    let _ = writeln!(out, "\nGenerated {}\n", snapshot.meta.timestamp.to_rfc3339());

    if let Some(rpm) = &snapshot.rpm {
        let _ = writeln!(out, "## Packages");
        let _ = writeln!(out, "- added: {}", rpm.packages_added.len());
        let _ = writeln!(out, "- removed: {}", rpm.packages_removed.len());
        let _ = writeln!(out, "- modified (per `rpm -Va`): {}", rpm.packages_modified.len());
        let _ = writeln!(out);
    }

    if let Some(config) = &snapshot.config {
        let _ = writeln!(out, "## Configuration files");
        let _ = writeln!(out, "- tracked: {}", config.files.len());
        let _ = writeln!(out);
    }

    if let Some(services) = &snapshot.services {
        if !services.state_changes.is_empty() {
            let _ = writeln!(out, "## Service state changes");
            for change in &services.state_changes {
                let _ = writeln!(
                    out,
                    "- `{}`: {} -> {} ({:?})",
                    change.unit, change.current_state, change.default_state, change.action
                );
            }
            let _ = writeln!(out);
        }
    }

    if !snapshot.warnings.is_empty() {
        let _ = writeln!(out, "## Warnings");
        for warning in &snapshot.warnings {
            let marker = match warning.severity {
                Severity::Error => "ERROR",
                Severity::Warning => "WARN",
                Severity::Info => "INFO",
            };
            let _ = writeln!(out, "- [{marker}] {}: {}", warning.source, warning.message);
        }
        let _ = writeln!(out);
    }

    out
}

pub fn render_dashboard_html(snapshot: &Snapshot) -> String {
    let package_count = snapshot.rpm.as_ref().map(|r| r.packages_added.len() + r.packages_removed.len()).unwrap_or(0);
    let warning_count = snapshot.warnings.len();
    let redaction_count = snapshot.redactions.len();

    formatdoc! {r#"
        <!DOCTYPE html>
        <html lang="en">
        <head>
        <meta charset="utf-8">
        <title>Rebuild dashboard: {host}</title>
        <style>
        body {{ font-family: sans-serif; margin: 2rem; }}
        table {{ border-collapse: collapse; }}
        td, th {{ border: 1px solid #ccc; padding: 0.4rem 0.8rem; text-align: left; }}
        </style>
        </head>
        <body>
        <h1>Rebuild dashboard</h1>
        <p>Host: {host}</p>
        <p>Generated: {generated}</p>
        <table>
        <tr><th>Metric</th><th>Count</th></tr>
        <tr><td>Package changes</td><td>{package_count}</td></tr>
        <tr><td>Warnings</td><td>{warning_count}</td></tr>
        <tr><td>Redactions</td><td>{redaction_count}</td></tr>
        </table>
        </body>
        </html>
    "#,
        host = snapshot.meta.host_root,
        generated = snapshot.meta.timestamp.to_rfc3339(),
    }
}

pub fn render_readme(snapshot: &Snapshot) -> String {
    formatdoc! {r#"
        # Rebuild recipe for {host}

        Generated {generated} by inspecting the host filesystem and diffing it
        against its package baseline.

        ## Contents

        - `Containerfile` - builds a bootc image that reproduces this host.
        - `config/` - staged copies of every file the Containerfile `COPY`s in.
        - `kickstart.ks` - deploy-time snippet for `ostreecontainer` installs.
        - `audit.md` - itemized summary of every detected change.
        - `dashboard.html` - at-a-glance metrics.
        - `secrets-review.md` - every value the pipeline redacted before writing
          this directory, so an operator can confirm nothing sensitive leaked.
        - `snapshot.json` - the full machine-readable inspection, reusable with
          `--from-snapshot` to re-render without re-inspecting the host.

        ## Next steps

        1. Review `audit.md` and `secrets-review.md`.
        2. Build: `podman build -t <your-registry>/<name> .`
        3. Push, then adapt `kickstart.ks` into your deployment kickstart.
    "#,
        host = snapshot.meta.host_root,
        generated = snapshot.meta.timestamp.to_rfc3339(),
    }
}

pub fn render_secrets_review(snapshot: &Snapshot) -> String {
    if snapshot.redactions.is_empty() {
        return "# Secrets review\n\nNo redactions were applied.\n".to_owned();
    }
    let mut out = String::new();
    let _ = writeln!(out, "# Secrets review");
    let _ = writeln!(out, "\n{} value(s) were replaced before this directory was written.\n", snapshot.redactions.len());
    for redaction in &snapshot.redactions {
        let _ = writeln!(out, "- `{}`: matched `{}`, replaced with `{}`", redaction.field, redaction.pattern, redaction.replacement);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{RpmSection, Warning};

    #[test]
    fn audit_markdown_includes_package_counts() {
        let mut snap = Snapshot::new("/", chrono::DateTime::UNIX_EPOCH);
        snap.rpm = Some(RpmSection {
            packages_added: vec![crate::schema::PackageEntry {
                name: "httpd".to_owned(),
                epoch: "0".to_owned(),
                version: "2.4".to_owned(),
                release: "1".to_owned(),
                arch: "x86_64".to_owned(),
                state: crate::schema::PackageState::Added,
            }],
            ..Default::default()
        });
        let md = render_audit_markdown(&snap);
        assert!(md.contains("- added: 1"));
    }

    #[test]
    fn secrets_review_reports_no_redactions() {
        let snap = Snapshot::new("/", chrono::DateTime::UNIX_EPOCH);
        assert_eq!(render_secrets_review(&snap), "# Secrets review\n\nNo redactions were applied.\n");
    }

    #[test]
    fn dashboard_html_embeds_host_path() {
        let snap = Snapshot::new("/mnt/host", chrono::DateTime::UNIX_EPOCH);
        let html = render_dashboard_html(&snap);
        assert!(html.contains("Host: /mnt/host"));
    }

    #[test]
    fn audit_markdown_lists_warnings_with_severity_marker() {
        let mut snap = Snapshot::new("/", chrono::DateTime::UNIX_EPOCH);
        snap.warnings.push(Warning {
            source: "rpm".to_owned(),
            message: "dnf history unavailable".to_owned(),
            severity: Severity::Warning,
        });
        let md = render_audit_markdown(&snap);
        assert!(md.contains("[WARN] rpm: dnf history unavailable"));
    }
}
