//! Collects cron jobs, systemd timers, and `at` jobs, and converts
//! convertible cron schedules into `systemd.time`-style timer units. Cron
//! sources scanned: `/etc/crontab`, `/etc/cron.d/*`, `/var/spool/cron/*`,
//! and the four `run-parts` period directories `/etc/cron.{hourly,daily,
//! weekly,monthly}`.

use camino::Utf8Path;

use crate::cron;
use crate::schema::{AtJob, CronJob, GeneratedTimerUnit, ScheduledTaskSection, SystemdTimer, TimerSource, Warning};

pub fn run(host_root: &Utf8Path, warnings: &mut Vec<Warning>) -> ScheduledTaskSection {
    let cron_jobs = collect_cron_jobs(host_root, warnings);
    let generated_timer_units = cron_jobs
        .iter()
        .enumerate()
        .filter(|(_, j)| j.converted)
        .map(|(i, j)| generate_timer_unit(i, j))
        .collect();

    ScheduledTaskSection {
        cron_jobs,
        systemd_timers: collect_systemd_timers(host_root),
        at_jobs: collect_at_jobs(host_root),
        generated_timer_units,
    }
}

fn collect_cron_jobs(host_root: &Utf8Path, warnings: &mut Vec<Warning>) -> Vec<CronJob> {
    let mut out = Vec::new();

    if let Some(content) = read(host_root, "etc/crontab") {
        out.extend(parse_system_crontab(&content, "/etc/crontab", warnings));
    }

    let cron_d = host_root.join("etc/cron.d");
    if let Ok(entries) = std::fs::read_dir(&cron_d) {
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(content) = std::fs::read_to_string(&path) else { continue };
            let source = format!("/etc/cron.d/{}", entry.file_name().to_string_lossy());
            out.extend(parse_system_crontab(&content, &source, warnings));
        }
    }

    let spool = host_root.join("var/spool/cron");
    if let Ok(entries) = std::fs::read_dir(&spool) {
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(content) = std::fs::read_to_string(&path) else { continue };
            let user = entry.file_name().to_string_lossy().into_owned();
            let source = format!("/var/spool/cron/{user}");
            out.extend(parse_user_crontab(&content, &source, &user, warnings));
        }
    }

    for period in ["hourly", "daily", "weekly", "monthly"] {
        out.extend(collect_period_scripts(host_root, period, warnings));
    }

    out
}

/// `/etc/cron.{hourly,daily,weekly,monthly}` hold executable scripts run by
/// `run-parts` on the matching schedule; each one becomes a cron job whose
/// "schedule" is the period's named shortcut rather than a five-field
/// expression.
fn collect_period_scripts(host_root: &Utf8Path, period: &str, warnings: &mut Vec<Warning>) -> Vec<CronJob> {
    let dir = host_root.join(format!("etc/cron.{period}"));
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let source = format!("/etc/cron.{period}");
        let command = format!("/etc/cron.{period}/{name}");
        out.push(make_cron_job(&source, format!("@{period}"), None, command, warnings));
    }
    out
}

fn read(host_root: &Utf8Path, rel: &str) -> Option<String> {
    std::fs::read_to_string(host_root.join(rel)).ok()
}

fn is_schedulable_line(line: &str) -> bool {
    !line.is_empty()
        && !line.starts_with('#')
        && line
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit() || c == '*' || c == '@')
}

/// Split a crontab schedule off the front of a line: either five
/// whitespace-separated fields, or a single `@shortcut` token.
fn split_schedule(line: &str) -> Option<(String, &str)> {
    if let Some(rest) = line.strip_prefix('@') {
        let (token, rest) = rest.split_once(char::is_whitespace)?;
        return Some((format!("@{token}"), rest.trim_start()));
    }
    let mut fields = line.splitn(6, char::is_whitespace);
    let schedule: Vec<&str> = (&mut fields).take(5).collect();
    if schedule.len() < 5 {
        return None;
    }
    let rest = fields.next()?;
    Some((schedule.join(" "), rest))
}

/// System-wide crontabs (`/etc/crontab`, `/etc/cron.d/*`) carry an explicit
/// user field between the schedule and the command.
fn parse_system_crontab(content: &str, source: &str, warnings: &mut Vec<Warning>) -> Vec<CronJob> {
    let mut out = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if !is_schedulable_line(line) {
            continue;
        }
        let Some((schedule, rest)) = split_schedule(line) else { continue };
        let Some((user, command)) = rest.split_once(char::is_whitespace) else { continue };
        out.push(make_cron_job(source, schedule, Some(user.to_owned()), command.trim().to_owned(), warnings));
    }
    out
}

/// Per-user crontabs (`/var/spool/cron/<user>`) have no user field.
fn parse_user_crontab(content: &str, source: &str, user: &str, warnings: &mut Vec<Warning>) -> Vec<CronJob> {
    let mut out = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if !is_schedulable_line(line) {
            continue;
        }
        let Some((schedule, command)) = split_schedule(line) else { continue };
        out.push(make_cron_job(source, schedule, Some(user.to_owned()), command.trim().to_owned(), warnings));
    }
    out
}

fn make_cron_job(source: &str, schedule: String, user: Option<String>, command: String, warnings: &mut Vec<Warning>) -> CronJob {
    let conversion = cron::convert(&schedule);
    if !conversion.converted {
        warnings.push(Warning {
            source: "scheduled".to_owned(),
            message: format!("cron schedule `{schedule}` in {source} could not be converted to OnCalendar"),
            severity: crate::schema::Severity::Info,
        });
    }
    CronJob {
        source: source.into(),
        schedule,
        user,
        command,
        on_calendar: conversion.on_calendar,
        converted: conversion.converted,
    }
}

fn collect_systemd_timers(host_root: &Utf8Path) -> Vec<SystemdTimer> {
    let mut out = Vec::new();
    for (dir, source) in [
        ("etc/systemd/system", TimerSource::Local),
        ("usr/lib/systemd/system", TimerSource::Vendor),
    ] {
        let full = host_root.join(dir);
        let Ok(entries) = std::fs::read_dir(&full) else { continue };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("timer") {
                continue;
            }
            let Ok(timer_content) = std::fs::read_to_string(&path) else { continue };
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            let on_calendar = extract_ini_value(&timer_content, "OnCalendar");
            let exec_start = extract_unit_sibling(&full, &name, "Service")
                .and_then(|c| extract_ini_value(&c, "ExecStart").map(|v| (c, v)))
                .map(|(_, v)| v);
            let service_content = extract_unit_sibling(&full, &name, "Service");
            out.push(SystemdTimer {
                name,
                source,
                on_calendar,
                exec_start,
                timer_content,
                service_content,
            });
        }
    }
    out.sort_by(|a, b| a.name.cmp(&b.name));
    out
}

fn extract_unit_sibling(dir: &Utf8Path, timer_name: &str, new_suffix: &str) -> Option<String> {
    let base = timer_name.strip_suffix(".timer")?;
    std::fs::read_to_string(dir.join(format!("{base}.{}", new_suffix.to_lowercase()))).ok()
}

fn extract_ini_value(content: &str, key: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let line = line.trim();
        let (k, v) = line.split_once('=')?;
        if k.trim() == key {
            Some(v.trim().to_owned())
        } else {
            None
        }
    })
}

fn collect_at_jobs(host_root: &Utf8Path) -> Vec<AtJob> {
    let spool = host_root.join("var/spool/at");
    let Ok(entries) = std::fs::read_dir(&spool) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(&path) else { continue };
        let command = content
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty() && !l.starts_with('#'))
            .unwrap_or_default()
            .to_owned();
        let Ok(camino_path) = camino::Utf8PathBuf::from_path_buf(path) else { continue };
        out.push(AtJob { path: camino_path, command });
    }
    out
}

fn generate_timer_unit(index: usize, job: &CronJob) -> GeneratedTimerUnit {
    let name = format!("rehost-cron-{index}.timer");
    let on_calendar = job.on_calendar.as_deref().unwrap_or("*-*-*");
    let timer_content = format!(
        "[Unit]\nDescription=Converted from cron job in {}\n\n[Timer]\nOnCalendar={on_calendar}\nPersistent=true\n\n[Install]\nWantedBy=timers.target\n",
        job.source
    );
    let user_line = job
        .user
        .as_deref()
        .map(|u| format!("User={u}\n"))
        .unwrap_or_default();
    let service_content = format!(
        "[Unit]\nDescription=Converted from cron job in {}\n\n[Service]\nType=oneshot\n{user_line}ExecStart={}\n",
        job.source, job.command
    );
    GeneratedTimerUnit { name, timer_content, service_content }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_system_crontab_with_user_field() {
        let mut warnings = Vec::new();
        let jobs = parse_system_crontab("0 2 * * * root /usr/bin/backup.sh\n", "/etc/crontab", &mut warnings);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].user.as_deref(), Some("root"));
        assert_eq!(jobs[0].command, "/usr/bin/backup.sh");
        assert!(jobs[0].converted);
    }

    #[test]
    fn parses_user_crontab_without_user_field() {
        let mut warnings = Vec::new();
        let jobs = parse_user_crontab("*/5 * * * * /usr/bin/poll.sh\n", "/var/spool/cron/alice", "alice", &mut warnings);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].user.as_deref(), Some("alice"));
    }

    #[test]
    fn skips_env_assignment_lines() {
        let mut warnings = Vec::new();
        let jobs = parse_system_crontab("MAILTO=root\n0 2 * * * root /usr/bin/backup.sh\n", "/etc/crontab", &mut warnings);
        assert_eq!(jobs.len(), 1);
    }

    #[test]
    fn collects_scripts_from_period_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let host_root = Utf8Path::from_path(tmp.path()).unwrap();
        std::fs::create_dir_all(host_root.join("etc/cron.daily")).unwrap();
        std::fs::write(host_root.join("etc/cron.daily/logrotate"), "#!/bin/sh\n").unwrap();
        std::fs::write(host_root.join("etc/cron.daily/.hidden"), "#!/bin/sh\n").unwrap();

        let mut warnings = Vec::new();
        let jobs = collect_period_scripts(host_root, "daily", &mut warnings);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].source.as_str(), "/etc/cron.daily");
        assert_eq!(jobs[0].command, "/etc/cron.daily/logrotate");
        assert!(jobs[0].converted);
    }

    #[test]
    fn unconvertible_schedule_produces_warning() {
        let mut warnings = Vec::new();
        let jobs = parse_system_crontab("@reboot root /usr/bin/start.sh\n", "/etc/crontab", &mut warnings);
        assert_eq!(jobs.len(), 1);
        assert!(!jobs[0].converted);
        assert_eq!(warnings.len(), 1);
    }
}
