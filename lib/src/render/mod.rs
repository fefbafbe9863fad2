//! Turns a redacted [`crate::schema::Snapshot`] into the on-disk rebuild
//! recipe: a Containerfile, a staged config tree, a kickstart snippet, and
//! the human-facing reports.

mod containerfile;
mod kickstart;
mod reports;
pub mod safety;
pub mod staging;

use anyhow::{Context, Result};
use camino::Utf8Path;

use crate::schema::Snapshot;

/// Image reference used inside the kickstart snippet and Containerfile
/// labels when the operator didn't supply `--target-image`. Never resolves
/// to anything pushable; it exists so the generated artifacts are
/// self-consistent until the operator fills in a real registry path.
fn default_image_ref(snapshot: &Snapshot) -> String {
    let name = snapshot
        .meta
        .hostname
        .clone()
        .unwrap_or_else(|| "rehost-image".to_owned());
    format!("localhost/{name}:latest")
}

pub fn render_all(snapshot: &Snapshot, output_dir: &Utf8Path) -> Result<()> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("creating output directory {output_dir}"))?;

    let staged = staging::stage_all(snapshot, output_dir)
        .context("staging files referenced by the Containerfile")?;

    let image_ref = default_image_ref(snapshot);

    let containerfile = containerfile::render(snapshot, &staged).context("rendering Containerfile")?;
    write(output_dir, "Containerfile", &containerfile)?;

    let ks = kickstart::render(snapshot, &image_ref).context("rendering kickstart.ks")?;
    write(output_dir, "kickstart.ks", &ks)?;

    write(output_dir, "audit.md", &reports::render_audit_markdown(snapshot))?;
    write(output_dir, "dashboard.html", &reports::render_dashboard_html(snapshot))?;
    write(output_dir, "README.md", &reports::render_readme(snapshot))?;
    write(output_dir, "secrets-review.md", &reports::render_secrets_review(snapshot))?;

    Ok(())
}

fn write(output_dir: &Utf8Path, name: &str, content: &str) -> Result<()> {
    let path = output_dir.join(name);
    std::fs::write(&path, content).with_context(|| format!("writing {path}"))
}
