//! Parses the reserved `--solo5:*` log-level options from the head of
//! the guest command line. Matches the upstream `cmdline.c` algorithm
//! exactly: options are recognized in a fixed order, a match requires
//! the option text to be followed by whitespace or end-of-string, and
//! the scan stops at the first word that isn't a reserved option —
//! everything from there on (including its leading whitespace) is
//! handed to the application unparsed.

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Quiet,
    Error,
    Warn,
    Info,
    Debug,
}

const RESERVED: &[(&str, LogLevel)] = &[
    ("--solo5:quiet", LogLevel::Quiet),
    ("--solo5:error", LogLevel::Error),
    ("--solo5:warn", LogLevel::Warn),
    ("--solo5:info", LogLevel::Info),
    ("--solo5:debug", LogLevel::Debug),
];

/// Returns `(level, application_cmdline)`. `level` is `None` if no
/// reserved option was present; it is otherwise the *last* reserved
/// option recognized, matching a command line that happens to repeat
/// or override the flag.
pub fn parse(mut cmdline: &str) -> (Option<LogLevel>, &str) {
    let mut level = None;

    loop {
        let trimmed = cmdline.trim_start_matches(|c: char| c == ' ' || c == '\t');

        let Some((opt, lvl)) = RESERVED.iter().find_map(|(opt, lvl)| {
            let rest = trimmed.strip_prefix(opt)?;
            let boundary = rest.is_empty() || rest.starts_with(' ') || rest.starts_with('\t');
            boundary.then_some((*opt, *lvl))
        }) else {
            break;
        };

        level = Some(lvl);
        let consumed = opt.len();
        let after = &trimmed[consumed..];
        let after = after.trim_start_matches(|c: char| c == ' ' || c == '\t');
        cmdline = after;
    }

    (level, cmdline)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_reserved_options_returns_full_cmdline() {
        let (level, rest) = parse("Hello_Solo5");
        assert_eq!(level, None);
        assert_eq!(rest, "Hello_Solo5");
    }

    #[test]
    fn single_reserved_option_is_consumed() {
        let (level, rest) = parse("--solo5:debug app arg1 arg2");
        assert_eq!(level, Some(LogLevel::Debug));
        assert_eq!(rest, "app arg1 arg2");
    }

    #[test]
    fn bare_reserved_option_at_end_of_string() {
        let (level, rest) = parse("--solo5:quiet");
        assert_eq!(level, Some(LogLevel::Quiet));
        assert_eq!(rest, "");
    }

    #[test]
    fn prefix_that_is_not_followed_by_a_boundary_does_not_match() {
        let (level, rest) = parse("--solo5:debugger app");
        assert_eq!(level, None);
        assert_eq!(rest, "--solo5:debugger app");
    }

    #[test]
    fn last_of_several_reserved_options_wins() {
        let (level, rest) = parse("--solo5:quiet --solo5:debug app");
        assert_eq!(level, Some(LogLevel::Debug));
        assert_eq!(rest, "app");
    }
}
