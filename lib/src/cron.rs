//! Conversion of crontab schedule expressions to systemd `OnCalendar`
//! fragments.
//!
//! Handles the five standard fields (step, range, list, and bare values),
//! numeric day-of-week (converted to the three-letter names systemd wants),
//! and the named shortcuts (`@daily`, `@hourly`, ...). Anything this can't
//! faithfully translate -- `@reboot`, a malformed expression -- comes back
//! with `converted = false` so the caller can emit a needs-review marker
//! instead of a broken timer.

/// The result of converting one cron schedule expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronConversion {
    pub on_calendar: Option<String>,
    pub converted: bool,
}

const WEEKDAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Convert a crontab schedule expression (either the five standard fields or
/// one of the `@`-prefixed shortcuts) into a systemd `OnCalendar=` value.
pub fn convert(expr: &str) -> CronConversion {
    let expr = expr.trim();
    if let Some(shortcut) = expr.strip_prefix('@') {
        return convert_shortcut(shortcut);
    }
    convert_standard(expr)
}

fn convert_shortcut(shortcut: &str) -> CronConversion {
    let on_calendar = match shortcut {
        "yearly" | "annually" => Some("*-01-01 00:00:00"),
        "monthly" => Some("*-*-01 00:00:00"),
        "weekly" => Some("Mon *-*-* 00:00:00"),
        "daily" | "midnight" => Some("*-*-* 00:00:00"),
        "hourly" => Some("*-*-* *:00:00"),
        // @reboot has no calendar-time meaning; it maps to a oneshot unit
        // triggered at boot, not a timer, so there is nothing to convert.
        _ => None,
    };
    match on_calendar {
        Some(s) => CronConversion {
            on_calendar: Some(s.to_owned()),
            converted: true,
        },
        None => CronConversion {
            on_calendar: None,
            converted: false,
        },
    }
}

fn convert_standard(expr: &str) -> CronConversion {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    let [minute, hour, dom, month, dow] = fields[..] else {
        return CronConversion {
            on_calendar: None,
            converted: false,
        };
    };
    let (Some(minute), Some(hour), Some(dom), Some(month), Some(dow)) = (
        convert_field(minute, 0, 59),
        convert_field(hour, 0, 23),
        convert_field(dom, 1, 31),
        convert_field(month, 1, 12),
        convert_dow_field(dow),
    ) else {
        return CronConversion {
            on_calendar: None,
            converted: false,
        };
    };
    let date_part = format!("*-{month}-{dom}");
    let on_calendar = if dow == "*" {
        format!("{date_part} {hour}:{minute}:00")
    } else {
        format!("{dow} {date_part} {hour}:{minute}:00")
    };
    CronConversion {
        on_calendar: Some(on_calendar),
        converted: true,
    }
}

/// Validate and pass through a single numeric cron field (`*`, `N`, `N-M`,
/// `N,M,...`, or `*/N`, `N-M/S`); systemd's calendar syntax accepts the same
/// shapes for these fields.
fn convert_field(field: &str, min: u32, max: u32) -> Option<String> {
    for part in field.split(',') {
        let (range_part, step) = match part.split_once('/') {
            Some((r, s)) => (r, Some(s)),
            None => (part, None),
        };
        if let Some(step) = step {
            if step.is_empty() || step.parse::<u32>().is_err() {
                return None;
            }
        }
        if range_part == "*" {
            continue;
        }
        let bounds = match range_part.split_once('-') {
            Some((lo, hi)) => (lo, hi),
            None => (range_part, range_part),
        };
        for v in [bounds.0, bounds.1] {
            let n: u32 = v.parse().ok()?;
            if n < min || n > max {
                return None;
            }
        }
    }
    Some(field.to_owned())
}

/// Day-of-week is special: cron allows 0-7 (both 0 and 7 mean Sunday). Only a
/// single literal digit is converted to systemd's three-letter weekday name;
/// a range or list is passed through with its digits intact (`1-5` becomes
/// `1..5`, `1,3,5` stays `1,3,5`), matching how the rest of the field kinds
/// are handled. Checking the field's shape (range, then list) before the
/// digit-to-name lookup is what keeps a range from being misread as a name.
fn convert_dow_field(field: &str) -> Option<String> {
    if field == "*" {
        return Some("*".to_owned());
    }
    convert_field(field, 0, 7)?;
    if field.contains('-') && !field.contains('/') {
        let (lo, hi) = field.split_once('-')?;
        return Some(format!("{lo}..{hi}"));
    }
    if field.contains(',') {
        return Some(field.to_owned());
    }
    if let Ok(n) = field.parse::<u32>() {
        let n = normalize_dow(n)?;
        return Some(WEEKDAY_NAMES[n as usize].to_owned());
    }
    Some(field.to_owned())
}

fn normalize_dow(n: u32) -> Option<u32> {
    match n {
        0..=6 => Some(n),
        7 => Some(0),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_fifteen_minutes() {
        let c = convert("*/15 * * * *");
        assert!(c.converted);
        assert!(c.on_calendar.unwrap().contains("*/15"));
    }

    #[test]
    fn named_daily() {
        let c = convert("@daily");
        assert!(c.converted);
        assert_eq!(c.on_calendar.unwrap(), "*-*-* 00:00:00");
    }

    #[test]
    fn named_hourly() {
        let c = convert("@hourly");
        assert_eq!(c.on_calendar.unwrap(), "*-*-* *:00:00");
    }

    #[test]
    fn reboot_is_not_converted() {
        let c = convert("@reboot");
        assert!(!c.converted);
        assert!(c.on_calendar.is_none());
    }

    #[test]
    fn malformed_is_not_converted() {
        let c = convert("this is not cron");
        assert!(!c.converted);
    }

    #[test]
    fn day_of_week_range_stays_numeric() {
        let c = convert("0 3 * * 1-5");
        assert!(c.converted);
        assert!(c.on_calendar.unwrap().starts_with("1..5"));
    }

    #[test]
    fn single_day_of_week_becomes_name() {
        let c = convert("0 3 * * 1");
        assert!(c.converted);
        assert!(c.on_calendar.unwrap().starts_with("Mon"));
    }

    #[test]
    fn day_of_week_list_stays_numeric() {
        let c = convert("0 3 * * 1,3,5");
        assert!(c.converted);
        assert!(c.on_calendar.unwrap().starts_with("1,3,5"));
    }

    #[test]
    fn sunday_as_seven_normalizes() {
        let c = convert("0 0 * * 7");
        assert!(c.converted);
        assert!(c.on_calendar.unwrap().starts_with("Sun"));
    }

    #[test]
    fn out_of_range_field_fails() {
        let c = convert("99 * * * *");
        assert!(!c.converted);
    }
}
