//! Classifies `/etc` into RPM-owned-and-modified, unowned, and orphaned
//! (`.rpmnew`/`.rpmsave`/`.rpmorig`) files.

use std::collections::{BTreeMap, BTreeSet};

use camino::{Utf8Path, Utf8PathBuf};
use walkdir::WalkDir;

use crate::executor::Executor;
use crate::schema::{ConfigFileEntry, ConfigFileKind, ConfigSection, RpmVaEntry, Severity, Warning};

const ORPHAN_SUFFIXES: &[&str] = &[".rpmnew", ".rpmsave", ".rpmorig"];

/// Reduce `rpm -Va` output to the subset of paths under `/etc`, keyed to
/// their flag string, that the config inspector should treat as modified
/// configuration rather than arbitrary package payload.
pub fn owned_paths_from_rpm_va(rpm_va: &[RpmVaEntry]) -> BTreeMap<Utf8PathBuf, String> {
    rpm_va
        .iter()
        .filter(|e| e.path.as_str().starts_with("/etc/"))
        .map(|e| (e.path.clone(), e.flags.clone()))
        .collect()
}

pub fn run(
    host_root: &Utf8Path,
    executor: &dyn Executor,
    owned: &BTreeMap<Utf8PathBuf, String>,
    _removed_packages: &[String],
    config_diffs: bool,
    warnings: &mut Vec<Warning>,
) -> ConfigSection {
    let mut files = Vec::new();
    let mut accounted: BTreeSet<Utf8PathBuf> = BTreeSet::new();

    for (path, flags) in owned {
        let Some(content) = read_host_file(host_root, path) else {
            continue;
        };
        let package = package_owner(executor, host_root, path);
        let diff_against_rpm = if config_diffs {
            diff_against_pristine(host_root, package.as_deref(), path, &content, executor)
        } else {
            None
        };
        files.push(ConfigFileEntry {
            path: path.clone(),
            kind: Some(ConfigFileKind::RpmOwnedModified),
            content,
            rpm_va_flags: Some(flags.clone()),
            package,
            diff_against_rpm,
        });
        accounted.insert(path.clone());
    }

    files.extend(collect_orphaned(host_root, &mut accounted));
    files.extend(collect_unowned(host_root, executor, &accounted, warnings));

    files.sort_by(|a, b| a.path.cmp(&b.path));
    ConfigSection { files }
}

fn read_host_file(host_root: &Utf8Path, path: &Utf8Path) -> Option<String> {
    let full = host_root.join(path.as_str().trim_start_matches('/'));
    std::fs::read_to_string(full).ok()
}

fn package_owner(executor: &dyn Executor, host_root: &Utf8Path, path: &Utf8Path) -> Option<String> {
    let dbpath = format!("{}/var/lib/rpm", host_root);
    let output = executor.run(
        &["rpm", "--dbpath", &dbpath, "-qf", "--qf", "%{NAME}\\n", path.as_str()],
        None,
    );
    if !output.success() {
        return None;
    }
    output.stdout_string().trim().lines().next().map(|s| s.to_owned())
}

/// Best-effort pristine diff: looks for a cached copy of the owning
/// package under `var/cache/{dnf,yum}` and extracts the file with
/// `rpm2cpio`/`cpio`, summarizing how many lines differ rather than
/// printing a full unified diff.
fn diff_against_pristine(
    host_root: &Utf8Path,
    package: Option<&str>,
    path: &Utf8Path,
    current: &str,
    executor: &dyn Executor,
) -> Option<String> {
    let package = package?;
    let cached_rpm = find_cached_rpm(host_root, package)?;
    let script = format!(
        "rpm2cpio {} | cpio --quiet -i --to-stdout .{} 2>/dev/null",
        cached_rpm, path
    );
    let output = executor.run(&["sh", "-c", &script], None);
    if !output.success() {
        return None;
    }
    let pristine = output.stdout_string();
    if pristine == current {
        return Some("no difference from packaged content".to_owned());
    }
    let pristine_lines: Vec<&str> = pristine.lines().collect();
    let current_lines: Vec<&str> = current.lines().collect();
    let changed = current_lines
        .iter()
        .zip(pristine_lines.iter())
        .filter(|(a, b)| a != b)
        .count()
        + current_lines.len().abs_diff(pristine_lines.len());
    Some(format!("{changed} line(s) differ from packaged content"))
}

fn find_cached_rpm(host_root: &Utf8Path, package: &str) -> Option<Utf8PathBuf> {
    for cache_dir in ["var/cache/dnf", "var/cache/yum"] {
        let dir = host_root.join(cache_dir);
        if !dir.exists() {
            continue;
        }
        for entry in WalkDir::new(&dir).into_iter().flatten() {
            let Some(name) = entry.file_name().to_str() else {
                continue;
            };
            if name.starts_with(&format!("{package}-")) && name.ends_with(".rpm") {
                if let Ok(p) = Utf8PathBuf::from_path_buf(entry.path().to_path_buf()) {
                    return Some(p);
                }
            }
        }
    }
    None
}

fn collect_orphaned(host_root: &Utf8Path, accounted: &mut BTreeSet<Utf8PathBuf>) -> Vec<ConfigFileEntry> {
    let etc = host_root.join("etc");
    let mut out = Vec::new();
    for entry in WalkDir::new(&etc).into_iter().flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if !ORPHAN_SUFFIXES.iter().any(|s| name.ends_with(s)) {
            continue;
        }
        let Ok(full) = Utf8PathBuf::from_path_buf(entry.path().to_path_buf()) else {
            continue;
        };
        let Some(rel) = relative_to_host(host_root, &full) else {
            continue;
        };
        let Ok(content) = std::fs::read_to_string(&full) else {
            continue;
        };
        accounted.insert(rel.clone());
        out.push(ConfigFileEntry {
            path: rel,
            kind: Some(ConfigFileKind::Orphaned),
            content,
            rpm_va_flags: None,
            package: None,
            diff_against_rpm: None,
        });
    }
    out
}

fn collect_unowned(
    host_root: &Utf8Path,
    executor: &dyn Executor,
    accounted: &BTreeSet<Utf8PathBuf>,
    warnings: &mut Vec<Warning>,
) -> Vec<ConfigFileEntry> {
    let etc = host_root.join("etc");
    let mut candidates: Vec<Utf8PathBuf> = Vec::new();
    for entry in WalkDir::new(&etc).into_iter().flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if ORPHAN_SUFFIXES.iter().any(|s| name.ends_with(s)) {
            continue;
        }
        let Ok(full) = Utf8PathBuf::from_path_buf(entry.path().to_path_buf()) else {
            continue;
        };
        let Some(rel) = relative_to_host(host_root, &full) else {
            continue;
        };
        if accounted.contains(&rel) {
            continue;
        }
        candidates.push(rel);
    }
    if candidates.is_empty() {
        return Vec::new();
    }

    let dbpath = format!("{}/var/lib/rpm", host_root);
    let mut argv: Vec<&str> = vec!["rpm", "--dbpath", &dbpath, "-qf"];
    let candidate_strs: Vec<&str> = candidates.iter().map(|p| p.as_str()).collect();
    argv.extend(candidate_strs.iter());
    let output = executor.run(&argv, None);
    if !output.success() {
        warnings.push(Warning {
            source: "config".to_owned(),
            message: "rpm -qf ownership scan failed; unowned files not classified".to_owned(),
            severity: Severity::Info,
        });
        return Vec::new();
    }

    let lines = output.stdout_lines();
    let mut out = Vec::new();
    for (path, line) in candidates.iter().zip(lines.iter()) {
        if !line.contains("is not owned by any package") {
            continue;
        }
        let full = host_root.join(path.as_str().trim_start_matches('/'));
        let Ok(content) = std::fs::read_to_string(&full) else {
            continue;
        };
        out.push(ConfigFileEntry {
            path: path.clone(),
            kind: Some(ConfigFileKind::Unowned),
            content,
            rpm_va_flags: None,
            package: None,
            diff_against_rpm: None,
        });
    }
    out
}

fn relative_to_host(host_root: &Utf8Path, full: &Utf8Path) -> Option<Utf8PathBuf> {
    let rel = full.strip_prefix(host_root).ok()?;
    Some(Utf8PathBuf::from(format!("/{}", rel.as_str().trim_start_matches('/'))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ExecOutput, FakeExecutor};

    #[test]
    fn owned_paths_filters_to_etc() {
        let rpm_va = vec![
            RpmVaEntry {
                path: Utf8PathBuf::from("/etc/ssh/sshd_config"),
                flags: "S.5....T.".into(),
                package: None,
            },
            RpmVaEntry {
                path: Utf8PathBuf::from("/usr/bin/foo"),
                flags: "S.5....T.".into(),
                package: None,
            },
        ];
        let owned = owned_paths_from_rpm_va(&rpm_va);
        assert_eq!(owned.len(), 1);
        assert!(owned.contains_key(Utf8Path::new("/etc/ssh/sshd_config")));
    }

    #[test]
    fn classifies_rpm_owned_modified_file() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        std::fs::create_dir_all(root.join("etc/ssh")).unwrap();
        std::fs::write(root.join("etc/ssh/sshd_config"), "PermitRootLogin no\n").unwrap();

        let exec = FakeExecutor::new(|argv, _| {
            if argv.contains(&"-qf") && argv.contains(&"--qf") {
                ExecOutput {
                    stdout: b"openssh-server\n".to_vec(),
                    stderr: String::new(),
                    exit_code: 0,
                }
            } else {
                ExecOutput::default()
            }
        });

        let mut owned = BTreeMap::new();
        owned.insert(Utf8PathBuf::from("/etc/ssh/sshd_config"), "S.5....T.".to_owned());
        let mut warnings = Vec::new();
        let section = run(root, &exec, &owned, &[], false, &mut warnings);
        assert_eq!(section.files.len(), 1);
        assert_eq!(section.files[0].kind, Some(ConfigFileKind::RpmOwnedModified));
        assert_eq!(section.files[0].package.as_deref(), Some("openssh-server"));
    }

    #[test]
    fn detects_orphaned_rpmnew_file() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        std::fs::create_dir_all(root.join("etc")).unwrap();
        std::fs::write(root.join("etc/foo.conf.rpmnew"), "default\n").unwrap();

        let exec = FakeExecutor::always_missing();
        let owned = BTreeMap::new();
        let mut warnings = Vec::new();
        let section = run(root, &exec, &owned, &[], false, &mut warnings);
        assert_eq!(section.files.len(), 1);
        assert_eq!(section.files[0].kind, Some(ConfigFileKind::Orphaned));
    }
}
