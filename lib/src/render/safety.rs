//! Guards against shell injection when snapshot-derived text is embedded
//! into generated shell commands (`RUN` lines in the Containerfile, the
//! kickstart `%post` script). Anything that could break out of a simple
//! single-line command is rejected outright rather than escaped, since the
//! renderer has no way to know the author's intent for a value shaped like
//! `; rm -rf /`.

const FORBIDDEN: &[char] = &['\n', '\r', ';', '`', '|', '$'];

/// Returns `Err` naming the first forbidden character found, rather than
/// trying to escape it. A line containing `$(` is also rejected even though
/// `$` alone is already forbidden, since it's the single most common
/// injection shape and deserves its own message.
pub fn check_shell_safe(value: &str) -> Result<(), String> {
    if let Some(idx) = value.find("$(") {
        return Err(format!("command substitution `$(` at byte {idx} is not allowed in generated shell text"));
    }
    for c in FORBIDDEN {
        if value.contains(*c) {
            return Err(format!("character {c:?} is not allowed in generated shell text: {value:?}"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_semicolon() {
        assert!(check_shell_safe("echo hi; rm -rf /").is_err());
    }

    #[test]
    fn rejects_command_substitution() {
        assert!(check_shell_safe("echo $(whoami)").is_err());
    }

    #[test]
    fn rejects_backtick() {
        assert!(check_shell_safe("echo `whoami`").is_err());
    }

    #[test]
    fn accepts_plain_text() {
        assert!(check_shell_safe("httpd.service").is_ok());
    }
}
