//! Collects local users, groups, sudoers rules, and references to SSH
//! authorized-keys files. Password hash fields in `/etc/shadow` and
//! `/etc/gshadow` are replaced at the source, since the generic redaction
//! pass only scans free-text fields, not these fixed-format ones.

use camino::{Utf8Path, Utf8PathBuf};

use crate::schema::{GroupEntry, UserEntry, UserGroupSection, Warning};

/// Users below this uid are system accounts, uninteresting for a rebuild
/// recipe save for the handful of built-ins every distro ships (root is
/// always kept).
const SYSTEM_UID_CEILING: u32 = 1000;

pub fn run(host_root: &Utf8Path, _warnings: &mut Vec<Warning>) -> UserGroupSection {
    let passwd_entries = read_lines(host_root, "etc/passwd");
    let group_entries = read_lines(host_root, "etc/group");
    let shadow_entries = read_lines(host_root, "etc/shadow")
        .into_iter()
        .map(|l| redact_shadow_line(&l))
        .collect();
    let gshadow_entries = read_lines(host_root, "etc/gshadow")
        .into_iter()
        .map(|l| redact_shadow_line(&l))
        .collect();

    UserGroupSection {
        users: parse_users(&passwd_entries),
        groups: parse_groups(&group_entries),
        sudoers_rules: collect_sudoers(host_root),
        ssh_authorized_keys_refs: collect_ssh_keys(host_root, &passwd_entries),
        passwd_entries,
        shadow_entries,
        group_entries,
        gshadow_entries,
        subuid_entries: read_lines(host_root, "etc/subuid"),
        subgid_entries: read_lines(host_root, "etc/subgid"),
    }
}

fn read_lines(host_root: &Utf8Path, rel: &str) -> Vec<String> {
    std::fs::read_to_string(host_root.join(rel))
        .map(|c| c.lines().map(|l| l.to_owned()).collect())
        .unwrap_or_default()
}

/// Replace the second colon-separated field (the password hash, or lock
/// marker) with a fixed placeholder, leaving account metadata intact.
fn redact_shadow_line(line: &str) -> String {
    let mut fields: Vec<&str> = line.split(':').collect();
    if fields.len() > 1 {
        fields[1] = "REDACTED_PASSWORD_HASH";
    }
    fields.join(":")
}

fn parse_users(passwd_entries: &[String]) -> Vec<UserEntry> {
    let mut out = Vec::new();
    for line in passwd_entries {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() < 7 {
            continue;
        }
        let Ok(uid) = fields[2].parse::<u32>() else { continue };
        let Ok(gid) = fields[3].parse::<u32>() else { continue };
        if uid != 0 && uid < SYSTEM_UID_CEILING {
            continue;
        }
        out.push(UserEntry {
            name: fields[0].to_owned(),
            uid,
            gid,
            home: fields[5].to_owned(),
            shell: fields[6].to_owned(),
        });
    }
    out.sort_by_key(|u| u.uid);
    out
}

fn parse_groups(group_entries: &[String]) -> Vec<GroupEntry> {
    let mut out = Vec::new();
    for line in group_entries {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() < 4 {
            continue;
        }
        let Ok(gid) = fields[2].parse::<u32>() else { continue };
        let members = if fields[3].is_empty() {
            Vec::new()
        } else {
            fields[3].split(',').map(|s| s.to_owned()).collect()
        };
        if members.is_empty() && gid != 0 && gid < SYSTEM_UID_CEILING {
            continue;
        }
        out.push(GroupEntry {
            name: fields[0].to_owned(),
            gid,
            members,
        });
    }
    out.sort_by_key(|g| g.gid);
    out
}

fn collect_sudoers(host_root: &Utf8Path) -> Vec<String> {
    let mut out = Vec::new();
    if let Ok(content) = std::fs::read_to_string(host_root.join("etc/sudoers")) {
        out.extend(sudoers_rules_from(&content));
    }
    let dir = host_root.join("etc/sudoers.d");
    if let Ok(entries) = std::fs::read_dir(&dir) {
        for entry in entries.flatten() {
            if let Ok(content) = std::fs::read_to_string(entry.path()) {
                out.extend(sudoers_rules_from(&content));
            }
        }
    }
    out
}

fn sudoers_rules_from(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with("Defaults") && !l.starts_with('@'))
        .map(|l| l.to_owned())
        .collect()
}

fn collect_ssh_keys(host_root: &Utf8Path, passwd_entries: &[String]) -> Vec<Utf8PathBuf> {
    let mut homes: Vec<String> = passwd_entries
        .iter()
        .filter_map(|l| l.split(':').nth(5).map(|s| s.to_owned()))
        .collect();
    homes.push("/root".to_owned());
    homes.sort();
    homes.dedup();

    let mut out = Vec::new();
    for home in homes {
        let rel = home.trim_start_matches('/');
        let candidate = host_root.join(rel).join(".ssh/authorized_keys");
        if candidate.is_file() {
            out.push(format!("{home}/.ssh/authorized_keys").into());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_shadow_password_field() {
        let line = "alice:$6$abc$def:19000:0:99999:7:::";
        let redacted = redact_shadow_line(line);
        assert!(redacted.starts_with("alice:REDACTED_PASSWORD_HASH:"));
    }

    #[test]
    fn parses_human_users_and_skips_system_accounts() {
        let entries = vec![
            "root:x:0:0:root:/root:/bin/bash".to_owned(),
            "daemon:x:2:2:daemon:/sbin:/usr/sbin/nologin".to_owned(),
            "alice:x:1001:1001:Alice:/home/alice:/bin/bash".to_owned(),
        ];
        let users = parse_users(&entries);
        let names: Vec<&str> = users.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["root", "alice"]);
    }

    #[test]
    fn sudoers_skips_defaults_and_comments() {
        let content = "# comment\nDefaults env_reset\n%wheel ALL=(ALL) ALL\n";
        let rules = sudoers_rules_from(content);
        assert_eq!(rules, vec!["%wheel ALL=(ALL) ALL".to_owned()]);
    }

    #[test]
    fn finds_root_authorized_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        std::fs::create_dir_all(root.join("root/.ssh")).unwrap();
        std::fs::write(root.join("root/.ssh/authorized_keys"), "ssh-ed25519 AAAA...\n").unwrap();
        let refs = collect_ssh_keys(root, &[]);
        assert_eq!(refs, vec![Utf8PathBuf::from("/root/.ssh/authorized_keys")]);
    }
}
