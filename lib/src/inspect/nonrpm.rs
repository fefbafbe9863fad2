//! Finds software installed outside the RPM database: git checkouts,
//! Python virtualenvs, and (opt-in, since it shells out per binary)
//! compiled binaries under `/opt` and `/usr/local`.

use camino::{Utf8Path, Utf8PathBuf};
use walkdir::WalkDir;

use crate::executor::Executor;
use crate::schema::{NonRpmItem, NonRpmMethod, NonRpmSoftwareSection, Severity, Warning};

const SEARCH_ROOTS: &[&str] = &["opt", "srv"];

pub fn run(
    host_root: &Utf8Path,
    executor: &dyn Executor,
    deep_binary_scan: bool,
    warnings: &mut Vec<Warning>,
) -> NonRpmSoftwareSection {
    let mut items = Vec::new();
    items.extend(collect_git_checkouts(host_root, executor));
    items.extend(collect_python_venvs(host_root));
    if deep_binary_scan {
        items.extend(collect_compiled_binaries(host_root, executor, warnings));
    }
    items.sort_by(|a, b| a.path.cmp(&b.path));
    NonRpmSoftwareSection { items }
}

fn collect_git_checkouts(host_root: &Utf8Path, executor: &dyn Executor) -> Vec<NonRpmItem> {
    let mut out = Vec::new();
    for root in SEARCH_ROOTS {
        let full = host_root.join(root);
        if !full.exists() {
            continue;
        }
        for entry in WalkDir::new(&full).max_depth(4).into_iter().flatten() {
            if entry.file_name() != ".git" || !entry.file_type().is_dir() {
                continue;
            }
            let Some(repo_dir) = entry.path().parent() else { continue };
            let Ok(repo_dir) = Utf8PathBuf::from_path_buf(repo_dir.to_path_buf()) else { continue };
            let remote = git_query(executor, &repo_dir, &["remote", "get-url", "origin"]);
            let commit = git_query(executor, &repo_dir, &["rev-parse", "HEAD"]);
            let branch = git_query(executor, &repo_dir, &["rev-parse", "--abbrev-ref", "HEAD"]);
            out.push(NonRpmItem {
                method: NonRpmMethod::Git,
                path: host_relative(host_root, &repo_dir),
                git_remote: remote,
                git_commit: commit,
                git_branch: branch,
                ..Default::default()
            });
        }
    }
    out
}

fn git_query(executor: &dyn Executor, repo_dir: &Utf8Path, args: &[&str]) -> Option<String> {
    let mut argv = vec!["git", "-C", repo_dir.as_str()];
    argv.extend(args);
    let output = executor.run(&argv, None);
    if !output.success() {
        return None;
    }
    let trimmed = output.stdout_string().trim().to_owned();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn collect_python_venvs(host_root: &Utf8Path) -> Vec<NonRpmItem> {
    let mut out = Vec::new();
    for root in SEARCH_ROOTS.iter().chain(["home"].iter()) {
        let full = host_root.join(root);
        if !full.exists() {
            continue;
        }
        for entry in WalkDir::new(&full).max_depth(5).into_iter().flatten() {
            if entry.file_name() != "pyvenv.cfg" {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(entry.path()) else { continue };
            let version = content
                .lines()
                .find_map(|l| l.strip_prefix("version"))
                .and_then(|l| l.trim_start_matches([' ', '=']).split_whitespace().next())
                .map(|s| s.to_owned());
            let Some(venv_dir) = entry.path().parent() else { continue };
            let Ok(venv_dir) = Utf8PathBuf::from_path_buf(venv_dir.to_path_buf()) else { continue };
            let packages = collect_dist_info_packages(&venv_dir);
            let has_c_extensions = has_compiled_extensions(&venv_dir);
            out.push(NonRpmItem {
                method: NonRpmMethod::PythonVenv,
                path: host_relative(host_root, &venv_dir),
                lang: Some("python".to_owned()),
                version,
                packages,
                has_c_extensions,
                ..Default::default()
            });
        }
    }
    out
}

fn collect_dist_info_packages(venv_dir: &Utf8Path) -> Vec<String> {
    let mut out = Vec::new();
    for entry in WalkDir::new(venv_dir).max_depth(6).into_iter().flatten() {
        let Some(name) = entry.file_name().to_str() else { continue };
        if let Some(pkg) = name.strip_suffix(".dist-info") {
            let pkg_name = pkg.rsplit_once('-').map(|(n, _)| n).unwrap_or(pkg);
            out.push(pkg_name.to_owned());
        }
    }
    out.sort();
    out.dedup();
    out
}

fn has_compiled_extensions(venv_dir: &Utf8Path) -> bool {
    WalkDir::new(venv_dir)
        .max_depth(8)
        .into_iter()
        .flatten()
        .any(|e| e.file_name().to_str().is_some_and(|n| n.ends_with(".so")))
}

fn collect_compiled_binaries(host_root: &Utf8Path, executor: &dyn Executor, warnings: &mut Vec<Warning>) -> Vec<NonRpmItem> {
    let mut out = Vec::new();
    let dirs = [host_root.join("opt"), host_root.join("usr/local/bin")];
    for dir in dirs {
        if !dir.exists() {
            continue;
        }
        for entry in WalkDir::new(&dir).max_depth(4).into_iter().flatten() {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(path) = Utf8PathBuf::from_path_buf(entry.path().to_path_buf()) else { continue };
            let file_out = executor.run(&["readelf", "-h", path.as_str()], None);
            if !file_out.success() {
                continue; // not an ELF binary, or readelf unavailable
            }
            let dyn_out = executor.run(&["readelf", "-d", path.as_str()], None);
            let is_static = !dyn_out.success() || dyn_out.stdout.is_empty();
            let shared_libs = dyn_out
                .stdout_lines()
                .into_iter()
                .filter(|l| l.contains("(NEEDED)"))
                .filter_map(|l| l.rsplit_once('[').map(|(_, rest)| rest.trim_end_matches(']').to_owned()))
                .collect();
            out.push(NonRpmItem {
                method: NonRpmMethod::CompiledBinary,
                path: host_relative(host_root, &path),
                is_static,
                shared_libs,
                ..Default::default()
            });
        }
    }
    if out.is_empty() {
        warnings.push(Warning {
            source: "nonrpm".to_owned(),
            message: "deep binary scan found no ELF binaries under /opt or /usr/local/bin".to_owned(),
            severity: Severity::Info,
        });
    }
    out
}

fn host_relative(host_root: &Utf8Path, full: &Utf8Path) -> Utf8PathBuf {
    full.strip_prefix(host_root)
        .map(|p| Utf8PathBuf::from(format!("/{}", p.as_str().trim_start_matches('/'))))
        .unwrap_or_else(|_| full.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ExecOutput, FakeExecutor};

    #[test]
    fn finds_git_checkout_and_queries_remote() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        std::fs::create_dir_all(root.join("opt/myapp/.git")).unwrap();

        let exec = FakeExecutor::new(|argv, _| {
            if argv.contains(&"get-url") {
                ExecOutput { stdout: b"https://example.com/app.git\n".to_vec(), stderr: String::new(), exit_code: 0 }
            } else if argv.contains(&"HEAD") && argv.contains(&"rev-parse") && argv.len() == 4 {
                ExecOutput { stdout: b"abc123\n".to_vec(), stderr: String::new(), exit_code: 0 }
            } else {
                ExecOutput { stdout: b"main\n".to_vec(), stderr: String::new(), exit_code: 0 }
            }
        });
        let items = collect_git_checkouts(root, &exec);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].git_remote.as_deref(), Some("https://example.com/app.git"));
    }

    #[test]
    fn finds_python_venv_with_packages() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        let venv = root.join("opt/myapp/venv");
        std::fs::create_dir_all(&venv).unwrap();
        std::fs::write(venv.join("pyvenv.cfg"), "version = 3.11.4\n").unwrap();
        std::fs::create_dir_all(venv.join("lib/python3.11/site-packages/requests-2.31.0.dist-info")).unwrap();

        let items = collect_python_venvs(root);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].version.as_deref(), Some("3.11.4"));
        assert_eq!(items[0].packages, vec!["requests".to_owned()]);
    }

    #[test]
    fn deep_binary_scan_skips_non_elf_files() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        std::fs::create_dir_all(root.join("usr/local/bin")).unwrap();
        std::fs::write(root.join("usr/local/bin/script.sh"), "#!/bin/sh\n").unwrap();
        let exec = FakeExecutor::always_missing();
        let mut warnings = Vec::new();
        let items = collect_compiled_binaries(root, &exec, &mut warnings);
        assert!(items.is_empty());
    }
}
