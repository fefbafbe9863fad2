//! Diffs enabled/disabled systemd unit state against the distribution's
//! preset policy so the rendered recipe only re-asserts what the operator
//! actually changed.

use camino::Utf8Path;

use crate::executor::Executor;
use crate::schema::{ServiceSection, ServiceStateChange, Severity, UnitAction, Warning};

pub fn run(
    host_root: &Utf8Path,
    executor: &dyn Executor,
    presets: Option<&str>,
    warnings: &mut Vec<Warning>,
) -> ServiceSection {
    let list = executor.run(
        &[
            "systemctl",
            "list-unit-files",
            "--type=service",
            "--no-legend",
            "--root",
            host_root.as_str(),
        ],
        None,
    );
    if !list.success() {
        warnings.push(Warning {
            source: "services".to_owned(),
            message: "systemctl list-unit-files failed".to_owned(),
            severity: Severity::Warning,
        });
        return ServiceSection::default();
    }

    let preset_defaults = presets.map(parse_presets).unwrap_or_default();

    let mut enabled_units = Vec::new();
    let mut disabled_units = Vec::new();
    let mut state_changes = Vec::new();

    for line in list.stdout_lines() {
        let mut fields = line.split_whitespace();
        let Some(unit) = fields.next() else { continue };
        let Some(current_state) = fields.next() else { continue };
        if !matches!(current_state, "enabled" | "disabled" | "static" | "masked") {
            continue;
        }

        let default_state = preset_defaults
            .iter()
            .find(|(pattern, _)| unit_matches(unit, pattern))
            .map(|(_, state)| state.clone())
            .unwrap_or_else(|| current_state.to_owned());

        let action = if current_state == default_state {
            UnitAction::Unchanged
        } else {
            match current_state {
                "enabled" => UnitAction::Enable,
                "masked" => UnitAction::Mask,
                _ => UnitAction::Disable,
            }
        };

        match action {
            UnitAction::Enable => enabled_units.push(unit.to_owned()),
            UnitAction::Disable => disabled_units.push(unit.to_owned()),
            UnitAction::Mask | UnitAction::Unchanged => {}
        }

        state_changes.push(ServiceStateChange {
            unit: unit.to_owned(),
            current_state: current_state.to_owned(),
            default_state,
            action,
        });
    }

    enabled_units.sort();
    disabled_units.sort();
    state_changes.sort_by(|a, b| a.unit.cmp(&b.unit));

    ServiceSection {
        state_changes,
        enabled_units,
        disabled_units,
    }
}

/// Parse a preset file's content (`enable <glob>` / `disable <glob>` lines,
/// as produced by `/usr/lib/systemd/system-preset/*.preset`) into an
/// ordered list of (glob, default-state) pairs. First match wins, matching
/// systemd's own preset evaluation order.
fn parse_presets(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|line| {
            let mut parts = line.splitn(2, char::is_whitespace);
            let verb = parts.next()?;
            let pattern = parts.next()?.trim();
            match verb {
                "enable" => Some((pattern.to_owned(), "enabled".to_owned())),
                "disable" => Some((pattern.to_owned(), "disabled".to_owned())),
                _ => None,
            }
        })
        .collect()
}

/// Minimal glob match supporting only a trailing `*`, which covers the vast
/// majority of real preset files (`enable sshd.service`, `disable *`).
fn unit_matches(unit: &str, pattern: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => unit.starts_with(prefix),
        None => unit == pattern,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ExecOutput, FakeExecutor};

    #[test]
    fn unchanged_when_state_matches_preset() {
        let exec = FakeExecutor::constant(ExecOutput {
            stdout: b"sshd.service enabled\n".to_vec(),
            stderr: String::new(),
            exit_code: 0,
        });
        let mut warnings = Vec::new();
        let section = run(Utf8Path::new("/"), &exec, Some("enable sshd.service\n"), &mut warnings);
        assert_eq!(section.state_changes.len(), 1);
        assert_eq!(section.state_changes[0].action, UnitAction::Unchanged);
        assert!(section.enabled_units.is_empty());
    }

    #[test]
    fn flags_deviation_from_preset() {
        let exec = FakeExecutor::constant(ExecOutput {
            stdout: b"telnet.service enabled\n".to_vec(),
            stderr: String::new(),
            exit_code: 0,
        });
        let mut warnings = Vec::new();
        let section = run(Utf8Path::new("/"), &exec, Some("disable *\n"), &mut warnings);
        assert_eq!(section.state_changes.len(), 1);
        assert_eq!(section.state_changes[0].action, UnitAction::Enable);
    }

    #[test]
    fn glob_prefix_match() {
        assert!(unit_matches("foo.service", "foo.*"));
        assert!(!unit_matches("bar.service", "foo.*"));
        assert!(unit_matches("exact.service", "exact.service"));
    }

    #[test]
    fn no_presets_means_every_unit_reports_its_current_state_as_default() {
        let exec = FakeExecutor::constant(ExecOutput {
            stdout: b"sshd.service enabled\n".to_vec(),
            stderr: String::new(),
            exit_code: 0,
        });
        let mut warnings = Vec::new();
        let section = run(Utf8Path::new("/"), &exec, None, &mut warnings);
        assert_eq!(section.state_changes.len(), 1);
        assert_eq!(section.state_changes[0].action, UnitAction::Unchanged);
        assert!(section.enabled_units.is_empty());
    }
}
