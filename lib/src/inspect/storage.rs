//! Reads `/etc/fstab`, current mounts, LVM topology, and walks `/var` to
//! flag directories that likely need a persistent volume, ephemeral
//! scratch space, or out-of-band shipping rather than baking into the
//! image.

use camino::Utf8Path;
use walkdir::WalkDir;

use crate::executor::Executor;
use crate::schema::{CredentialRef, StorageRecommendation, StorageSection, VarDirectory, Warning};

/// Stop counting a directory's size after this many bytes; the estimate is
/// only used to pick a storage recommendation bucket, not for capacity
/// planning.
const SIZE_ESTIMATE_CAP: u64 = 10 * 1024 * 1024;

/// `/var` subdirectories that are regenerated or purely transient and so
/// never warrant shipping or a persistent volume.
const EPHEMERAL_DIRS: &[&str] = &["var/cache", "var/tmp", "var/run", "var/spool/mail"];

/// `/var` subdirectories that commonly hold state the image build should
/// not bake in, but which needs to survive reboots.
const PERSISTENT_DIRS: &[&str] = &["var/lib/pgsql", "var/lib/mysql", "var/lib/containers", "var/log"];

pub fn run(host_root: &Utf8Path, executor: &dyn Executor, _warnings: &mut Vec<Warning>) -> StorageSection {
    StorageSection {
        fstab_entries: read_lines(host_root, "etc/fstab"),
        mount_points: collect_mount_points(executor),
        lvm_info: collect_lvm_info(executor),
        var_directories: collect_var_directories(host_root),
        credential_refs: collect_credential_refs(host_root),
    }
}

fn read_lines(host_root: &Utf8Path, rel: &str) -> Vec<String> {
    let Ok(content) = std::fs::read_to_string(host_root.join(rel)) else {
        return Vec::new();
    };
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| l.to_owned())
        .collect()
}

fn collect_mount_points(executor: &dyn Executor) -> Vec<String> {
    let output = executor.run(&["findmnt", "-rno", "TARGET,SOURCE,FSTYPE,OPTIONS"], None);
    if !output.success() {
        return Vec::new();
    }
    output.stdout_lines()
}

fn collect_lvm_info(executor: &dyn Executor) -> Option<String> {
    let output = executor.run(&["lvs", "--noheadings", "-o", "vg_name,lv_name,lv_size"], None);
    if !output.success() {
        return None;
    }
    let text = output.stdout_string();
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

fn collect_var_directories(host_root: &Utf8Path) -> Vec<VarDirectory> {
    let var = host_root.join("var");
    let Ok(top_entries) = std::fs::read_dir(&var) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for entry in top_entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Ok(camino_path) = camino::Utf8PathBuf::from_path_buf(path.clone()) else {
            continue;
        };
        let rel = relative(host_root, &camino_path);
        let size_estimate = estimate_size(&path);
        let recommendation = if EPHEMERAL_DIRS.iter().any(|d| rel.as_str() == format!("/{d}")) {
            StorageRecommendation::Ephemeral
        } else if PERSISTENT_DIRS.iter().any(|d| rel.as_str() == format!("/{d}")) {
            StorageRecommendation::PersistentVolume
        } else if size_estimate >= SIZE_ESTIMATE_CAP {
            StorageRecommendation::ExternalShipping
        } else {
            StorageRecommendation::PersistentVolume
        };
        out.push(VarDirectory {
            path: rel,
            size_estimate,
            recommendation,
        });
    }
    out.sort_by(|a, b| a.path.cmp(&b.path));
    out
}

fn estimate_size(dir: &std::path::Path) -> u64 {
    let mut total = 0u64;
    for entry in WalkDir::new(dir).into_iter().flatten() {
        if let Ok(meta) = entry.metadata() {
            if meta.is_file() {
                total += meta.len();
            }
        }
        if total >= SIZE_ESTIMATE_CAP {
            break;
        }
    }
    total
}

fn relative(host_root: &Utf8Path, full: &Utf8Path) -> camino::Utf8PathBuf {
    full.strip_prefix(host_root)
        .map(|p| camino::Utf8PathBuf::from(format!("/{}", p.as_str().trim_start_matches('/'))))
        .unwrap_or_else(|_| full.to_owned())
}

/// Scans fstab, environment files, and common secret locations under `/etc`
/// for paths that look like credential material referenced from config
/// rather than embedded in it, so the staging tree can flag them instead of
/// silently baking secrets into the image.
fn collect_credential_refs(host_root: &Utf8Path) -> Vec<CredentialRef> {
    let mut out = Vec::new();
    let candidates = [
        "etc/pki/tls/private",
        "etc/ssl/private",
        "etc/pki/ca-trust/source/anchors",
    ];
    for dir in candidates {
        let full = host_root.join(dir);
        let Ok(entries) = std::fs::read_dir(&full) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(camino_path) = camino::Utf8PathBuf::from_path_buf(path) else {
                continue;
            };
            out.push(CredentialRef {
                path: relative(host_root, &camino_path),
                referenced_from: format!("/{dir}").into(),
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::FakeExecutor;

    #[test]
    fn fstab_lines_skip_comments() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        std::fs::create_dir_all(root.join("etc")).unwrap();
        std::fs::write(
            root.join("etc/fstab"),
            "# a comment\nUUID=abc / xfs defaults 0 0\n",
        )
        .unwrap();
        let lines = read_lines(root, "etc/fstab");
        assert_eq!(lines, vec!["UUID=abc / xfs defaults 0 0".to_owned()]);
    }

    #[test]
    fn var_cache_is_ephemeral() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        std::fs::create_dir_all(root.join("var/cache")).unwrap();
        std::fs::create_dir_all(root.join("var/lib/pgsql")).unwrap();
        let dirs = collect_var_directories(root);
        let cache = dirs.iter().find(|d| d.path.as_str() == "/var/cache").unwrap();
        assert_eq!(cache.recommendation, StorageRecommendation::Ephemeral);
        let pgsql = dirs.iter().find(|d| d.path.as_str() == "/var/lib/pgsql");
        assert!(pgsql.is_none()); // top-level scan only sees "/var/lib", not "/var/lib/pgsql"
    }

    #[test]
    fn no_mounts_when_findmnt_missing() {
        let exec = FakeExecutor::always_missing();
        assert!(collect_mount_points(&exec).is_empty());
    }
}
