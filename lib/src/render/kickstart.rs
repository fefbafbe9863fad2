//! Renders the deploy-time kickstart snippet that pairs with the built
//! image: `bootc install` replaces package installation, so this snippet
//! is limited to partitioning/mount hints and the `%post` bootc switch,
//! not a full kickstart file.

use std::fmt::Write as _;

use anyhow::Result;

use crate::render::safety::check_shell_safe;
use crate::schema::{Snapshot, StorageRecommendation};

pub fn render(snapshot: &Snapshot, image_ref: &str) -> Result<String> {
    check_shell_safe(image_ref).map_err(|e| anyhow::anyhow!(e))?;
    let mut out = String::new();

    writeln!(out, "# Kickstart snippet for deploying a bootc image built from this host.")?;
    writeln!(out, "# Merge these stanzas into a site kickstart; this is not a complete file.")?;
    writeln!(out)?;
    writeln!(out, "ostreecontainer --url={image_ref}")?;
    writeln!(out)?;

    if let Some(storage) = &snapshot.storage {
        let persistent: Vec<&str> = storage
            .var_directories
            .iter()
            .filter(|d| d.recommendation == StorageRecommendation::PersistentVolume)
            .map(|d| d.path.as_str())
            .collect();
        if !persistent.is_empty() {
            writeln!(out, "# Directories observed on the source host that held state:")?;
            for path in &persistent {
                writeln!(out, "#   {path}")?;
            }
            writeln!(out, "part {} --fstype=xfs --grow", "/var")?;
            writeln!(out)?;
        }
    }

    writeln!(out, "%post --erroronfail")?;
    writeln!(out, "bootc switch --mutate-in-place --transport registry {image_ref}")?;
    writeln!(out, "%end")?;

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{StorageSection, VarDirectory};

    #[test]
    fn emits_ostreecontainer_and_bootc_switch() {
        let snap = Snapshot::new("/", chrono::DateTime::UNIX_EPOCH);
        let rendered = render(&snap, "quay.io/example/rebuilt:latest").unwrap();
        assert!(rendered.contains("ostreecontainer --url=quay.io/example/rebuilt:latest"));
        assert!(rendered.contains("bootc switch --mutate-in-place --transport registry quay.io/example/rebuilt:latest"));
    }

    #[test]
    fn lists_persistent_var_directories_as_comments() {
        let mut snap = Snapshot::new("/", chrono::DateTime::UNIX_EPOCH);
        snap.storage = Some(StorageSection {
            var_directories: vec![VarDirectory {
                path: "/var/lib/pgsql".into(),
                size_estimate: 1024,
                recommendation: StorageRecommendation::PersistentVolume,
            }],
            ..Default::default()
        });
        let rendered = render(&snap, "quay.io/example/rebuilt:latest").unwrap();
        assert!(rendered.contains("#   /var/lib/pgsql"));
    }

    #[test]
    fn rejects_unsafe_image_ref() {
        let snap = Snapshot::new("/", chrono::DateTime::UNIX_EPOCH);
        assert!(render(&snap, "quay.io/example; rm -rf /").is_err());
    }
}
