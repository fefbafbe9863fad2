//! Collects SELinux enforcement mode, policy type, custom modules, boolean
//! overrides, file-context rules, audit dispatcher rules, and FIPS/PAM
//! configuration that a rebuilt image needs to reproduce.

use std::collections::BTreeMap;

use camino::Utf8Path;

use crate::executor::Executor;
use crate::schema::{RepoFile, SelinuxSection, Severity, Warning};

pub fn run(host_root: &Utf8Path, executor: &dyn Executor, warnings: &mut Vec<Warning>) -> SelinuxSection {
    let (mode, policy_type) = read_config(host_root);

    SelinuxSection {
        mode,
        policy_type,
        custom_modules: collect_custom_modules(executor),
        boolean_overrides: collect_boolean_overrides(executor, warnings),
        fcontext_rules: collect_fcontext_rules(host_root),
        audit_rules: read_repo_files(host_root, "etc/audit/rules.d"),
        fips_mode: read_fips_mode(host_root),
        pam_configs: collect_pam_configs(host_root),
    }
}

fn read_config(host_root: &Utf8Path) -> (String, String) {
    let Ok(content) = std::fs::read_to_string(host_root.join("etc/selinux/config")) else {
        return (String::new(), String::new());
    };
    let mut mode = String::new();
    let mut policy_type = String::new();
    for line in content.lines() {
        let line = line.trim();
        if let Some(value) = line.strip_prefix("SELINUX=") {
            mode = value.trim().to_owned();
        } else if let Some(value) = line.strip_prefix("SELINUXTYPE=") {
            policy_type = value.trim().to_owned();
        }
    }
    (mode, policy_type)
}

fn collect_custom_modules(executor: &dyn Executor) -> Vec<String> {
    let output = executor.run(&["semodule", "-l"], None);
    if !output.success() {
        return Vec::new();
    }
    output
        .stdout_lines()
        .into_iter()
        .filter_map(|l| l.split_whitespace().next().map(|s| s.to_owned()))
        // Base policy modules ship with the policy package; only modules
        // installed locally (by definition, anything "semodule -l" prints
        // that isn't part of the stock targeted/mls policy set) matter
        // here, but without a clean base list to diff against we report
        // the full custom-module namespace convention instead: modules
        // whose name doesn't start with a known upstream prefix.
        .filter(|name| !name.starts_with("container") && !name.starts_with("unconfined"))
        .collect()
}

fn collect_boolean_overrides(executor: &dyn Executor, warnings: &mut Vec<Warning>) -> BTreeMap<String, bool> {
    let output = executor.run(&["semanage", "boolean", "-l", "-C"], None);
    if !output.success() {
        warnings.push(Warning {
            source: "selinux".to_owned(),
            message: "semanage boolean -l -C failed; no boolean overrides recorded".to_owned(),
            severity: Severity::Info,
        });
        return BTreeMap::new();
    }
    output
        .stdout_lines()
        .into_iter()
        .filter_map(|line| parse_boolean_line(&line))
        .collect()
}

/// `semanage boolean -l -C` lists only customized booleans, one per line:
/// `name (current, default)  description`.
fn parse_boolean_line(line: &str) -> Option<(String, bool)> {
    let line = line.trim();
    let (name, rest) = line.split_once(char::is_whitespace)?;
    let paren_start = rest.find('(')?;
    let paren_end = rest.find(')')?;
    let current = rest[paren_start + 1..paren_end].split(',').next()?.trim();
    Some((name.to_owned(), current == "on"))
}

fn collect_fcontext_rules(host_root: &Utf8Path) -> Vec<String> {
    let dir = host_root.join("etc/selinux").join("local");
    let mut out = Vec::new();
    for candidate in [
        dir.clone(),
        host_root.join("etc/selinux/targeted/contexts/files.local"),
    ] {
        if let Ok(content) = std::fs::read_to_string(&candidate) {
            out.extend(content.lines().map(|l| l.trim().to_owned()).filter(|l| !l.is_empty()));
        }
    }
    out
}

fn read_fips_mode(host_root: &Utf8Path) -> bool {
    std::fs::read_to_string(host_root.join("proc/sys/crypto/fips_enabled"))
        .map(|s| s.trim() == "1")
        .unwrap_or(false)
}

fn collect_pam_configs(host_root: &Utf8Path) -> Vec<String> {
    let dir = host_root.join("etc/pam.d");
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return Vec::new();
    };
    let mut out: Vec<String> = entries
        .flatten()
        .filter_map(|e| e.file_name().to_str().map(|s| s.to_owned()))
        .collect();
    out.sort();
    out
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
    use crate::executor::{ExecOutput, FakeExecutor};

    #[test]
    fn reads_enforcing_mode_and_policy_type() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        std::fs::create_dir_all(root.join("etc/selinux")).unwrap();
        std::fs::write(root.join("etc/selinux/config"), "SELINUX=enforcing\nSELINUXTYPE=targeted\n").unwrap();
        let (mode, policy_type) = read_config(root);
        assert_eq!(mode, "enforcing");
        assert_eq!(policy_type, "targeted");
    }

    #[test]
    fn parses_customized_boolean_as_on() {
        let parsed = parse_boolean_line("httpd_can_network_connect (on , off)  allow httpd to connect");
        assert_eq!(parsed, Some(("httpd_can_network_connect".to_owned(), true)));
    }

    #[test]
    fn no_overrides_when_semanage_missing() {
        let exec = FakeExecutor::always_missing();
        let mut warnings = Vec::new();
        let overrides = collect_boolean_overrides(&exec, &mut warnings);
        assert!(overrides.is_empty());
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn fips_mode_detected_from_proc() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        std::fs::create_dir_all(root.join("proc/sys/crypto")).unwrap();
        std::fs::write(root.join("proc/sys/crypto/fips_enabled"), "1\n").unwrap();
        assert!(read_fips_mode(root));
    }

    #[test]
    fn custom_modules_parsed_from_semodule_list() {
        let exec = FakeExecutor::constant(ExecOutput {
            stdout: b"mymodule\t1.0\ncontainer-selinux\t1.0\n".to_vec(),
            stderr: String::new(),
            exit_code: 0,
        });
        let modules = collect_custom_modules(&exec);
        assert_eq!(modules, vec!["mymodule".to_owned()]);
    }
}
