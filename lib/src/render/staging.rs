//! Materializes every file-bearing snapshot section into `<output_dir>/config`,
//! mirroring each file's absolute in-image path, so the Containerfile can
//! `COPY` them verbatim.

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};

use crate::schema::Snapshot;

/// One file staged under `config/`, paired with the absolute path it should
/// land at inside the built image.
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub image_path: Utf8PathBuf,
    pub staged_rel_path: Utf8PathBuf,
}

pub fn stage_all(snapshot: &Snapshot, output_dir: &Utf8Path) -> Result<Vec<StagedFile>> {
    let config_dir = output_dir.join("config");
    let mut staged = Vec::new();

    if let Some(config) = &snapshot.config {
        for file in &config.files {
            stage_one(&config_dir, &file.path, &file.content, &mut staged)?;
        }
    }
    if let Some(containers) = &snapshot.containers {
        for unit in &containers.quadlet_units {
            stage_one(&config_dir, &unit.path, &unit.content, &mut staged)?;
        }
    }
    if let Some(network) = &snapshot.network {
        for conn in &network.connections {
            stage_one(&config_dir, &conn.path, &conn.content, &mut staged)?;
        }
        for zone in &network.firewall_zones {
            stage_one(&config_dir, &zone.path, &zone.content, &mut staged)?;
        }
    }
    if let Some(kernel) = &snapshot.kernel {
        for bucket in [&kernel.modules_load_d, &kernel.modprobe_d, &kernel.dracut_conf] {
            for entry in bucket {
                stage_one(&config_dir, &entry.path, &entry.content, &mut staged)?;
            }
        }
    }
    if let Some(selinux) = &snapshot.selinux {
        for rule in &selinux.audit_rules {
            stage_one(&config_dir, &rule.path, &rule.content, &mut staged)?;
        }
    }
    if let Some(scheduled) = &snapshot.scheduled {
        for unit in &scheduled.generated_timer_units {
            let timer_path = Utf8PathBuf::from(format!("/etc/systemd/system/{}", unit.name));
            stage_one(&config_dir, &timer_path, &unit.timer_content, &mut staged)?;
            let service_path =
                Utf8PathBuf::from(format!("/etc/systemd/system/{}", unit.name.replace(".timer", ".service")));
            stage_one(&config_dir, &service_path, &unit.service_content, &mut staged)?;
        }
    }

    Ok(staged)
}

fn stage_one(
    config_dir: &Utf8Path,
    image_path: &Utf8Path,
    content: &str,
    staged: &mut Vec<StagedFile>,
) -> Result<()> {
    let rel = Utf8PathBuf::from(image_path.as_str().trim_start_matches('/'));
    let dest = config_dir.join(&rel);
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating staging directory {parent}"))?;
    }
    std::fs::write(&dest, content).with_context(|| format!("writing staged file {dest}"))?;
    staged.push(StagedFile {
        image_path: image_path.to_owned(),
        staged_rel_path: rel,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ConfigFileEntry, ConfigSection};

    #[test]
    fn stages_config_file_at_mirrored_path() {
        let tmp = tempfile::tempdir().unwrap();
        let output_dir = Utf8Path::from_path(tmp.path()).unwrap();
        let mut snapshot = Snapshot::new("/", chrono::DateTime::UNIX_EPOCH);
        snapshot.config = Some(ConfigSection {
            files: vec![ConfigFileEntry {
                path: "/etc/ssh/sshd_config".into(),
                content: "PermitRootLogin no\n".to_owned(),
                ..Default::default()
            }],
        });
        let staged = stage_all(&snapshot, output_dir).unwrap();
        assert_eq!(staged.len(), 1);
        let written = output_dir.join("config/etc/ssh/sshd_config");
        assert_eq!(std::fs::read_to_string(written).unwrap(), "PermitRootLogin no\n");
    }
}
