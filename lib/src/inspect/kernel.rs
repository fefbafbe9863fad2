//! Collects the kernel command line, GRUB defaults, sysctl overrides,
//! loaded/non-default modules, and `modules-load.d`/`modprobe.d`/dracut
//! configuration.

use std::collections::BTreeMap;

use camino::Utf8Path;

use crate::executor::Executor;
use crate::schema::{KernelBootSection, RepoFile, Severity, Warning};

/// Modules present in a stock kernel build; anything loaded beyond this set
/// is reported as "non-default". Deliberately small and conservative: it is
/// meant to catch obviously hand-loaded modules, not to be exhaustive.
const STOCK_MODULES: &[&str] = &[
    "ext4", "xfs", "nvme", "virtio_net", "virtio_blk", "sd_mod", "dm_mod", "overlay",
];

pub fn run(host_root: &Utf8Path, executor: &dyn Executor, warnings: &mut Vec<Warning>) -> KernelBootSection {
    let loaded_modules = collect_loaded_modules(host_root, executor);
    let non_default_modules = loaded_modules
        .iter()
        .filter(|m| !STOCK_MODULES.contains(&m.as_str()))
        .cloned()
        .collect();

    KernelBootSection {
        cmdline: read_cmdline(host_root),
        grub_defaults: read_grub_defaults(host_root),
        sysctl_overrides: read_sysctl_overrides(host_root, warnings),
        loaded_modules,
        non_default_modules,
        modules_load_d: read_repo_files(host_root, "etc/modules-load.d"),
        modprobe_d: read_repo_files(host_root, "etc/modprobe.d"),
        dracut_conf: read_repo_files(host_root, "etc/dracut.conf.d"),
    }
}

fn read_cmdline(host_root: &Utf8Path) -> String {
    std::fs::read_to_string(host_root.join("proc/cmdline"))
        .or_else(|_| std::fs::read_to_string(host_root.join("etc/kernel/cmdline")))
        .unwrap_or_default()
        .trim()
        .to_owned()
}

fn read_grub_defaults(host_root: &Utf8Path) -> BTreeMap<String, String> {
    let Ok(content) = std::fs::read_to_string(host_root.join("etc/default/grub")) else {
        return BTreeMap::new();
    };
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let (key, value) = line.split_once('=')?;
            Some((key.trim().to_owned(), value.trim().trim_matches('"').to_owned()))
        })
        .collect()
}

fn read_sysctl_overrides(host_root: &Utf8Path, warnings: &mut Vec<Warning>) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for dir in ["etc/sysctl.d", "etc/sysctl.conf"] {
        let path = host_root.join(dir);
        let files: Vec<std::path::PathBuf> = if path.is_dir() {
            std::fs::read_dir(&path)
                .into_iter()
                .flatten()
                .flatten()
                .map(|e| e.path())
                .collect()
        } else if path.is_file() {
            vec![path.into_std_path_buf()]
        } else {
            Vec::new()
        };
        for file in files {
            let Ok(content) = std::fs::read_to_string(&file) else {
                warnings.push(Warning {
                    source: "kernel".to_owned(),
                    message: format!("could not read {}", file.display()),
                    severity: Severity::Info,
                });
                continue;
            };
            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    out.insert(key.trim().to_owned(), value.trim().to_owned());
                }
            }
        }
    }
    out
}

fn collect_loaded_modules(host_root: &Utf8Path, executor: &dyn Executor) -> Vec<String> {
    if let Ok(content) = std::fs::read_to_string(host_root.join("proc/modules")) {
        return content
            .lines()
            .filter_map(|l| l.split_whitespace().next())
            .map(|s| s.to_owned())
            .collect();
    }
    let output = executor.run(&["lsmod"], None);
    if !output.success() {
        return Vec::new();
    }
    output
        .stdout_lines()
        .into_iter()
        .skip(1)
        .filter_map(|l| l.split_whitespace().next().map(|s| s.to_owned()))
        .collect()
}

fn read_repo_files(host_root: &Utf8Path, dir: &str) -> Vec<RepoFile> {
    let full = host_root.join(dir);
    let Ok(entries) = std::fs::read_dir(&full) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(&path) else { continue };
        out.push(RepoFile {
            path: format!("/{dir}/{}", entry.file_name().to_string_lossy()).into(),
            content,
        });
    }
    out.sort_by(|a, b| a.path.cmp(&b.path));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::FakeExecutor;

    #[test]
    fn grub_defaults_strip_quotes() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        std::fs::create_dir_all(root.join("etc/default")).unwrap();
        std::fs::write(root.join("etc/default/grub"), "GRUB_TIMEOUT=5\nGRUB_CMDLINE_LINUX=\"quiet splash\"\n").unwrap();
        let defaults = read_grub_defaults(root);
        assert_eq!(defaults.get("GRUB_CMDLINE_LINUX").unwrap(), "quiet splash");
    }

    #[test]
    fn non_default_modules_flagged() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        std::fs::create_dir_all(root.join("proc")).unwrap();
        std::fs::write(root.join("proc/modules"), "ext4 1 - Live 0x0\nweirdmod 1 - Live 0x0\n").unwrap();
        let exec = FakeExecutor::always_missing();
        let mut warnings = Vec::new();
        let section = run(root, &exec, &mut warnings);
        assert_eq!(section.loaded_modules, vec!["ext4".to_owned(), "weirdmod".to_owned()]);
        assert_eq!(section.non_default_modules, vec!["weirdmod".to_owned()]);
    }

    #[test]
    fn sysctl_conf_single_file_parsed() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        std::fs::create_dir_all(root.join("etc")).unwrap();
        std::fs::write(root.join("etc/sysctl.conf"), "net.ipv4.ip_forward = 1\n").unwrap();
        let mut warnings = Vec::new();
        let overrides = read_sysctl_overrides(root, &mut warnings);
        assert_eq!(overrides.get("net.ipv4.ip_forward").unwrap(), "1");
    }
}
