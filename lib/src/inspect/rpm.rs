//! Parses the host's installed RPM package set, diffs it against the
//! resolved baseline, and collects `rpm -Va` verification reports, repo
//! files, and dnf transaction history.

use camino::{Utf8Path, Utf8PathBuf};

use crate::baseline::BaselineResult;
use crate::executor::Executor;
use crate::schema::{PackageEntry, PackageState, RepoFile, RpmSection, RpmVaEntry, Severity, Warning};

const QUERYFORMAT: &str = "%|EPOCH?{%{EPOCH}}:{(none)}|:%{NAME}-%{VERSION}-%{RELEASE}.%{ARCH}\\n";

pub fn run(
    host_root: &Utf8Path,
    executor: &dyn Executor,
    baseline: &BaselineResult,
    warnings: &mut Vec<Warning>,
) -> RpmSection {
    let installed = query_installed(host_root, executor, warnings);
    let (added, removed, modified_names) = diff_against_baseline(&installed, baseline);

    let rpm_va = query_rpm_va(host_root, executor, warnings);
    let modified_set: std::collections::BTreeSet<&str> =
        rpm_va.iter().map(|e| e.path.as_str()).collect();
    let _ = modified_set; // rpm -Va reports files, not packages; kept for the config inspector

    let mut packages_added = Vec::new();
    let mut packages_removed = Vec::new();
    let mut packages_modified = Vec::new();
    for nevra in added {
        packages_added.push(make_entry_from_nevra(nevra, PackageState::Added));
    }
    for name in removed {
        packages_removed.push(make_placeholder_entry(&name, PackageState::Removed));
    }
    for name in modified_names {
        packages_modified.push(make_placeholder_entry(&name, PackageState::Modified));
    }

    RpmSection {
        packages_added,
        packages_removed,
        packages_modified,
        rpm_va,
        repo_files: collect_repo_files(host_root),
        dnf_history_removed: query_dnf_history_removed(host_root, executor, warnings),
        base_image: baseline.base_image.clone(),
        baseline_package_names: baseline
            .package_names
            .as_ref()
            .map(|s| s.iter().cloned().collect()),
        no_baseline: baseline.no_baseline,
    }
}

/// A NEVRA line parsed into its components, epoch normalized so `(none)`
/// reads as `0`.
struct Nevra {
    name: String,
    epoch: String,
    version: String,
    release: String,
    arch: String,
}

/// Builds an entry from a fully-parsed NEVRA: the real epoch/version/release/arch
/// the host reports, used for packages that are actually installed (added, modified).
fn make_entry_from_nevra(nevra: &Nevra, state: PackageState) -> PackageEntry {
    PackageEntry {
        name: nevra.name.clone(),
        epoch: nevra.epoch.clone(),
        version: nevra.version.clone(),
        release: nevra.release.clone(),
        arch: nevra.arch.clone(),
        state,
    }
}

/// Builds an entry from a bare package name with no version info available,
/// used for packages the baseline carried but the host no longer has installed.
fn make_placeholder_entry(name: &str, state: PackageState) -> PackageEntry {
    PackageEntry {
        name: name.to_owned(),
        epoch: "0".to_owned(),
        version: String::new(),
        release: String::new(),
        arch: String::new(),
        state,
    }
}

fn query_installed(
    host_root: &Utf8Path,
    executor: &dyn Executor,
    warnings: &mut Vec<Warning>,
) -> Vec<Nevra> {
    let dbpath = format!("{}/var/lib/rpm", host_root);
    let primary = executor.run(
        &["rpm", "--dbpath", &dbpath, "-qa", "--queryformat", QUERYFORMAT],
        None,
    );
    let output = if primary.success() {
        primary
    } else {
        let fallback = executor.run(
            &["rpm", "--root", host_root.as_str(), "-qa", "--queryformat", QUERYFORMAT],
            None,
        );
        if !fallback.success() {
            warnings.push(Warning {
                source: "rpm".to_owned(),
                message: "both --dbpath and --root rpm invocations failed".to_owned(),
                severity: Severity::Warning,
            });
        }
        fallback
    };
    output
        .stdout_lines()
        .into_iter()
        .filter_map(|l| parse_nevra(&l))
        .filter(|n| !is_virtual_package(&n.name))
        .collect()
}

fn parse_nevra(line: &str) -> Option<Nevra> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let (epoch, rest) = line.split_once(':')?;
    let epoch = if epoch == "(none)" { "0" } else { epoch };
    // rest is name-version-release.arch; arch is the last dot-separated component.
    let (nvr, arch) = rest.rsplit_once('.')?;
    let mut parts = nvr.rsplitn(3, '-');
    let release = parts.next()?;
    let version = parts.next()?;
    let name = parts.next()?;
    Some(Nevra {
        name: name.to_owned(),
        epoch: epoch.to_owned(),
        version: version.to_owned(),
        release: release.to_owned(),
        arch: arch.to_owned(),
    })
}

fn is_virtual_package(name: &str) -> bool {
    name == "gpg-pubkey" || name.starts_with("gpg-pubkey-")
}

/// Diffs `installed` against the baseline package-name set. Added packages
/// keep their parsed NEVRA (real epoch/version/release/arch are available
/// since the host actually has them installed); removed packages are known
/// only by name, since the baseline carries no version information.
fn diff_against_baseline<'a>(
    installed: &'a [Nevra],
    baseline: &BaselineResult,
) -> (Vec<&'a Nevra>, Vec<String>, Vec<String>) {
    let installed_names: std::collections::BTreeSet<&str> =
        installed.iter().map(|n| n.name.as_str()).collect();
    if baseline.no_baseline || baseline.package_names.is_none() {
        let mut added: Vec<&Nevra> = installed.iter().collect();
        added.sort_by(|a, b| a.name.cmp(&b.name));
        return (added, Vec::new(), Vec::new());
    }
    let baseline_names = baseline.package_names.as_ref().unwrap();
    let baseline_name_set: std::collections::BTreeSet<&str> =
        baseline_names.iter().map(|s| s.as_str()).collect();
    let mut added: Vec<&Nevra> = installed
        .iter()
        .filter(|n| !baseline_name_set.contains(n.name.as_str()))
        .collect();
    added.sort_by(|a, b| a.name.cmp(&b.name));
    let removed: Vec<String> = baseline_names
        .iter()
        .filter(|n| !installed_names.contains(n.as_str()))
        .cloned()
        .collect();
    (added, removed, Vec::new())
}

fn query_rpm_va(
    host_root: &Utf8Path,
    executor: &dyn Executor,
    warnings: &mut Vec<Warning>,
) -> Vec<RpmVaEntry> {
    let dbpath = format!("{}/var/lib/rpm", host_root);
    let output = executor.run(&["rpm", "--dbpath", &dbpath, "-Va"], None);
    if !output.success() && output.stdout.is_empty() {
        warnings.push(Warning {
            source: "rpm".to_owned(),
            message: "rpm -Va produced no output".to_owned(),
            severity: Severity::Info,
        });
    }
    output
        .stdout_lines()
        .into_iter()
        .filter_map(|l| parse_rpm_va_line(&l))
        .collect()
}

/// Parse one `rpm -Va` line: a 9-character flag string, an optional
/// single-character file-type marker (`c`onfig, `g`host, `d`oc, `l`icense,
/// `r`eadme), then the path.
fn parse_rpm_va_line(line: &str) -> Option<RpmVaEntry> {
    if line.len() < 10 {
        return None;
    }
    let (flags, rest) = line.split_at(9);
    let rest = rest.trim_start();
    let mut tokens = rest.splitn(2, char::is_whitespace);
    let first = tokens.next()?;
    let path = if first.len() == 1 && "cgdlr".contains(first) {
        tokens.next()?.trim()
    } else {
        rest
    };
    if path.is_empty() {
        return None;
    }
    Some(RpmVaEntry {
        path: Utf8PathBuf::from(path),
        flags: flags.to_owned(),
        package: None,
    })
}

fn collect_repo_files(host_root: &Utf8Path) -> Vec<RepoFile> {
    let mut files = Vec::new();
    for dir in ["etc/yum.repos.d", "etc/dnf"] {
        let dir_path = host_root.join(dir);
        let Ok(entries) = std::fs::read_dir(&dir_path) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            let rel = path
                .strip_prefix(host_root.as_std_path())
                .unwrap_or(&path)
                .to_string_lossy()
                .into_owned();
            files.push(RepoFile {
                path: Utf8PathBuf::from(format!("/{}", rel.trim_start_matches('/'))),
                content,
            });
        }
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    files
}

fn query_dnf_history_removed(
    _host_root: &Utf8Path,
    executor: &dyn Executor,
    _warnings: &mut Vec<Warning>,
) -> Vec<String> {
    let list = executor.run(&["dnf", "history", "list", "all"], None);
    if !list.success() {
        return Vec::new();
    }
    let mut removed = Vec::new();
    for line in list.stdout_lines() {
        if !line.contains("Erase") {
            continue;
        }
        let Some(id) = line.split('|').next().map(|s| s.trim()) else {
            continue;
        };
        if id.parse::<u32>().is_err() {
            continue;
        }
        let info = executor.run(&["dnf", "history", "info", id], None);
        if !info.success() {
            continue;
        }
        for info_line in info.stdout_lines() {
            let info_line = info_line.trim();
            if let Some(pkg) = info_line.strip_prefix("Erase ") {
                if let Some(name) = pkg.rsplit_once('-').map(|(n, _)| n) {
                    removed.push(name.to_owned());
                }
            }
        }
    }
    removed.sort();
    removed.dedup();
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ExecOutput, FakeExecutor};
    use std::collections::BTreeSet;

    #[test]
    fn parses_nevra_with_explicit_epoch() {
        let n = parse_nevra("1:bash-5.1.8-6.el9.x86_64").unwrap();
        assert_eq!(n.epoch, "1");
        assert_eq!(n.name, "bash");
        assert_eq!(n.version, "5.1.8");
        assert_eq!(n.release, "6.el9");
        assert_eq!(n.arch, "x86_64");
    }

    #[test]
    fn normalizes_none_epoch_to_zero() {
        let n = parse_nevra("(none):httpd-2.4.37-51.el9.x86_64").unwrap();
        assert_eq!(n.epoch, "0");
    }

    #[test]
    fn filters_gpg_pubkeys() {
        let tmp_host = Utf8Path::new("/mnt/host");
        let exec = FakeExecutor::new(|argv, _| {
            if argv.contains(&"-qa") {
                ExecOutput {
                    stdout: b"0:bash-5.1.8-6.el9.x86_64\n0:gpg-pubkey-abc-def.noarch\n".to_vec(),
                    stderr: String::new(),
                    exit_code: 0,
                }
            } else {
                ExecOutput::default()
            }
        });
        let mut warnings = Vec::new();
        let baseline = BaselineResult {
            package_names: None,
            base_image: String::new(),
            no_baseline: true,
        };
        let section = run(tmp_host, &exec, &baseline, &mut warnings);
        assert_eq!(section.packages_added.len(), 1);
        assert_eq!(section.packages_added[0].name, "bash");
    }

    #[test]
    fn package_diff_against_baseline() {
        let installed = vec![
            Nevra {
                name: "bash".into(),
                epoch: "0".into(),
                version: "1".into(),
                release: "1".into(),
                arch: "x86_64".into(),
            },
            Nevra {
                name: "httpd".into(),
                epoch: "0".into(),
                version: "1".into(),
                release: "1".into(),
                arch: "x86_64".into(),
            },
        ];
        let baseline = BaselineResult {
            package_names: Some(BTreeSet::from(["bash".to_owned(), "coreutils".to_owned()])),
            base_image: "img".into(),
            no_baseline: false,
        };
        let (added, removed, _) = diff_against_baseline(&installed, &baseline);
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].name, "httpd");
        assert_eq!(added[0].version, "1");
        assert_eq!(removed, vec!["coreutils".to_owned()]);
    }

    #[test]
    fn parses_rpm_va_line_with_config_marker() {
        let entry = parse_rpm_va_line("S.5....T.  c /etc/ssh/sshd_config").unwrap();
        assert_eq!(entry.flags, "S.5....T.");
        assert_eq!(entry.path.as_str(), "/etc/ssh/sshd_config");
    }

    #[test]
    fn parses_rpm_va_line_without_marker() {
        let entry = parse_rpm_va_line("S.5....T.  /usr/bin/foo").unwrap();
        assert_eq!(entry.path.as_str(), "/usr/bin/foo");
    }
}
